//! Connection state machine and lifecycle tracking.
//!
//! # Responsibilities
//! - Name the states a relayed connection moves through
//! - Generate unique connection IDs for tracing
//! - Count active connections per proxy instance

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection state for lifecycle tracking.
///
/// ```text
/// Accepted → Sniffing → {Reconstructing | GrpcNotified | Passthrough}
///          → ConnectingUpstream → Relaying → Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted and wrapped in a peekable reader.
    Accepted,
    /// Classifying the leading bytes.
    Sniffing,
    /// An HTTP request was parsed; its reconstruction goes out first.
    Reconstructing,
    /// The h2c preface was seen and reported.
    GrpcNotified,
    /// Bytes are relayed without interpretation.
    Passthrough,
    /// Dialing the destination.
    ConnectingUpstream,
    /// Copying bytes in both directions.
    Relaying,
    /// Both sockets closed.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Accepted => "accepted",
            ConnectionState::Sniffing => "sniffing",
            ConnectionState::Reconstructing => "reconstructing",
            ConnectionState::GrpcNotified => "grpc_notified",
            ConnectionState::Passthrough => "passthrough",
            ConnectionState::ConnectingUpstream => "connecting_upstream",
            ConnectionState::Relaying => "relaying",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Tracks active connections of one proxy instance.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active_count: Arc<AtomicU64>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new active connection. Returns a guard that decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            active_count: Arc::clone(&self.active_count),
            id: ConnectionId::new(),
        }
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    active_count: Arc<AtomicU64>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}
