//! One listen port relayed to one destination.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::{AppConfig, InterceptConfig, ProxyInstanceConfig};
use crate::lifecycle::Shutdown;
use crate::net::{ConnectionTracker, Listener, ListenerError};
use crate::notify::{FlushReport, NotificationAggregator, Notificator};
use crate::observability::metrics;
use crate::proxy::handler::{ConnectionHandler, InstanceContext};

/// Process-wide knobs every instance shares.
#[derive(Debug, Clone)]
pub struct InstanceSettings {
    pub intercept: InterceptConfig,
    pub connect_timeout: Duration,
    pub flush_interval: Duration,
}

impl InstanceSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            intercept: config.intercept.clone(),
            connect_timeout: config.timeouts.upstream_connect(),
            flush_interval: config.notifications.flush_interval(),
        }
    }
}

impl Default for InstanceSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

struct Running {
    shutdown: Shutdown,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
    flush_task: JoinHandle<()>,
}

/// A listener, its connections and its notification aggregator.
///
/// Each instance owns its aggregator; nothing is shared between instances
/// except the notificator.
pub struct ProxyInstance {
    ctx: Arc<InstanceContext>,
    flush_interval: Duration,
    tracker: ConnectionTracker,
    running: Option<Running>,
}

impl ProxyInstance {
    pub fn new(config: ProxyInstanceConfig, settings: InstanceSettings, notifier: Arc<dyn Notificator>) -> Self {
        let destination = config.destination();
        let aggregator = Arc::new(NotificationAggregator::new(destination.clone(), Arc::clone(&notifier)));
        let ctx = InstanceContext {
            config,
            destination,
            intercept: settings.intercept,
            connect_timeout: settings.connect_timeout,
            aggregator,
            notifier,
        };
        Self {
            ctx: Arc::new(ctx),
            flush_interval: settings.flush_interval,
            tracker: ConnectionTracker::new(),
            running: None,
        }
    }

    /// Bind the listener and start accepting and periodic flushing.
    ///
    /// Returns the bound address. Calling `start` on a running instance
    /// returns its current address.
    pub async fn start(&mut self) -> Result<SocketAddr, ListenerError> {
        if let Some(running) = &self.running {
            return Ok(running.local_addr);
        }

        let listener = Listener::bind(&self.ctx.config.listen_target()).await?;
        let local_addr = listener.local_addr();

        let shutdown = Shutdown::new();
        let accept_rx = shutdown.subscribe();
        let flush_rx = shutdown.subscribe();

        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.ctx),
            self.tracker.clone(),
            accept_rx,
        ));
        let flush_task = self.ctx.aggregator.spawn_flush_loop(self.flush_interval, flush_rx);

        tracing::info!(
            address = %local_addr,
            destination = %self.ctx.destination,
            notify_http = self.ctx.config.notify_http,
            "Proxy instance listening"
        );

        self.running = Some(Running {
            shutdown,
            local_addr,
            accept_task,
            flush_task,
        });
        Ok(local_addr)
    }

    /// Stop accepting, stop the flush timer, then flush what is pending.
    ///
    /// Connections already relaying are left to finish on their own.
    pub async fn stop(&mut self) -> FlushReport {
        if let Some(running) = self.running.take() {
            running.shutdown.trigger();
            if let Err(e) = running.accept_task.await {
                tracing::error!(error = %e, "Accept loop task failed");
            }
            if let Err(e) = running.flush_task.await {
                tracing::error!(error = %e, "Flush loop task failed");
            }
            tracing::info!(
                address = %running.local_addr,
                destination = %self.ctx.destination,
                active_connections = self.active_connections(),
                "Proxy instance stopped accepting"
            );
        }
        self.ctx.aggregator.flush().await
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    pub fn config(&self) -> &ProxyInstanceConfig {
        &self.ctx.config
    }

    pub fn destination(&self) -> &str {
        &self.ctx.destination
    }

    pub fn aggregator(&self) -> &Arc<NotificationAggregator> {
        &self.ctx.aggregator
    }

    /// Connections accepted and not yet closed.
    pub fn active_connections(&self) -> u64 {
        self.tracker.active_count()
    }
}

impl Drop for ProxyInstance {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.shutdown.trigger();
        }
    }
}

async fn accept_loop(
    listener: Listener,
    ctx: Arc<InstanceContext>,
    tracker: ConnectionTracker,
    mut shutdown: broadcast::Receiver<()>,
) {
    let listen_port = listener.local_addr().port();
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!(port = listen_port, "Listener received shutdown signal, exiting loop");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    metrics::record_connection(listen_port);
                    let guard = tracker.track();
                    let span = tracing::info_span!(
                        "connection",
                        connection_id = %guard.id(),
                        peer_addr = %peer,
                        port = listen_port
                    );
                    let handler = ConnectionHandler::new(Arc::clone(&ctx), guard, peer);
                    tokio::spawn(handler.run(stream).instrument(span));
                }
                Err(e) => {
                    tracing::error!(port = listen_port, error = %e, "Failed to accept connection");
                }
            }
        }
    }
}
