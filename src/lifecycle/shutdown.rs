//! Shutdown coordination.

use tokio::sync::broadcast;

/// Coordinator for stopping one proxy instance's background tasks.
///
/// Provides a broadcast channel that the accept loop and the flush loop
/// subscribe to. Subscribe before spawning: a receiver created after
/// [`Shutdown::trigger`] does not see the signal.
#[derive(Debug)]
pub struct Shutdown {
    /// Broadcast channel sender.
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
