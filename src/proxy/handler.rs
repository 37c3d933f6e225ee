//! Per-connection pipeline.
//!
//! # Responsibilities
//! - Enable TCP keepalive on the client socket
//! - Sniff the leading bytes when the instance has `notify_http` set
//! - Record intercepted HTTP requests, report h2c connections
//! - Dial the destination and relay
//!
//! ```text
//! client ──▶ PeekableStream ──▶ sniff ──┬─ Http   ──▶ intercept ──▶ aggregator.record
//!                                       ├─ H2c    ──▶ spawn grpc notification
//!                                       └─ Opaque ──▶ (nothing)
//!        ──▶ dial destination ──▶ relay(prefix ++ remaining client bytes)
//! ```

use std::io::{self, Cursor};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;

use crate::config::{InterceptConfig, ProxyInstanceConfig};
use crate::net::{ConnectionGuard, ConnectionState, PeekableStream};
use crate::notify::{NotificationAggregator, NotificationEvent, Notificator};
use crate::observability::metrics;
use crate::proxy::relay::relay;
use crate::sniff::{self, intercept, Protocol};

/// Keepalive idle time applied to accepted client sockets.
pub const CLIENT_KEEPALIVE: Duration = Duration::from_secs(30);

/// State shared by every connection of one proxy instance.
pub(crate) struct InstanceContext {
    pub config: ProxyInstanceConfig,
    pub destination: String,
    pub intercept: InterceptConfig,
    pub connect_timeout: Duration,
    pub aggregator: Arc<NotificationAggregator>,
    pub notifier: Arc<dyn Notificator>,
}

/// Drives one accepted connection from sniffing to close.
pub(crate) struct ConnectionHandler {
    ctx: Arc<InstanceContext>,
    guard: ConnectionGuard,
    peer: SocketAddr,
    state: ConnectionState,
}

impl ConnectionHandler {
    pub fn new(ctx: Arc<InstanceContext>, guard: ConnectionGuard, peer: SocketAddr) -> Self {
        Self {
            ctx,
            guard,
            peer,
            state: ConnectionState::Accepted,
        }
    }

    pub async fn run(mut self, client: TcpStream) {
        if let Err(e) = enable_keepalive(&client) {
            tracing::debug!(error = %e, "Failed to enable keepalive on client socket");
        }

        let (client_rx, client_tx) = client.into_split();
        let mut reader = PeekableStream::new(client_rx);

        let prefix = self.inspect(&mut reader).await;

        self.transition(ConnectionState::ConnectingUpstream);
        let upstream = match self.connect_upstream().await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(
                    destination = %self.ctx.destination,
                    error = %e,
                    "Failed to connect to destination"
                );
                metrics::record_upstream_failure(self.ctx.config.listen_port);
                self.transition(ConnectionState::Closed);
                return;
            }
        };

        self.transition(ConnectionState::Relaying);
        let (upstream_rx, upstream_tx) = upstream.into_split();
        let source = Cursor::new(prefix).chain(reader);
        let outcome = relay(source, client_tx, upstream_rx, upstream_tx).await;

        match &outcome.error {
            Some(e) => tracing::debug!(direction = %outcome.direction, error = %e, "Relay ended with error"),
            None => tracing::debug!(direction = %outcome.direction, bytes = outcome.bytes, "Relay ended"),
        }
        self.transition(ConnectionState::Closed);
    }

    /// Classify the stream and act on it. Returns the bytes to send upstream
    /// ahead of whatever is still unread in `reader`.
    async fn inspect<R>(&mut self, reader: &mut PeekableStream<R>) -> Vec<u8>
    where
        R: AsyncRead + Unpin,
    {
        if !self.ctx.config.notify_http {
            self.transition(ConnectionState::Passthrough);
            return Vec::new();
        }

        self.transition(ConnectionState::Sniffing);
        let protocol = sniff::sniff(reader, self.ctx.intercept.sniff_timeout()).await;
        metrics::record_sniffed(protocol.as_str());
        tracing::debug!(protocol = protocol.as_str(), "Stream classified");

        match protocol {
            Protocol::H2c => {
                self.notify_grpc();
                self.transition(ConnectionState::GrpcNotified);
                Vec::new()
            }
            Protocol::Http => {
                let settings = &self.ctx.intercept;
                match intercept(reader, settings.parse_timeout(), settings.max_request_bytes).await {
                    Ok(request) => {
                        tracing::debug!(
                            method = %request.method,
                            path = %request.target,
                            body_bytes = request.body.len(),
                            "Intercepted HTTP request"
                        );
                        self.ctx
                            .aggregator
                            .record(NotificationEvent::from_request(self.peer, &request));
                        self.transition(ConnectionState::Reconstructing);
                        request.to_bytes()
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "HTTP interception failed, relaying raw bytes");
                        metrics::record_intercept_failure(e.reason());
                        self.transition(ConnectionState::Passthrough);
                        Vec::new()
                    }
                }
            }
            Protocol::Opaque => {
                self.transition(ConnectionState::Passthrough);
                Vec::new()
            }
        }
    }

    /// Report the h2c connection without holding up the relay.
    fn notify_grpc(&self) {
        let notifier = Arc::clone(&self.ctx.notifier);
        let destination = self.ctx.destination.clone();
        let remote_addr = self.peer.to_string();
        tracing::info!(remote_addr = %remote_addr, "h2c connection detected");

        tokio::spawn(async move {
            match notifier.send_info_new_grpc_request(&remote_addr, &destination).await {
                Ok(()) => metrics::record_notification("grpc_request", true),
                Err(e) => {
                    metrics::record_notification("grpc_request", false);
                    tracing::error!(
                        remote_addr = %remote_addr,
                        destination = %destination,
                        error = %e,
                        "Failed to send gRPC notification"
                    );
                }
            }
        });
    }

    async fn connect_upstream(&self) -> io::Result<TcpStream> {
        let timeout = self.ctx.connect_timeout;
        tokio::time::timeout(timeout, TcpStream::connect(&self.ctx.destination))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect timed out after {}s", timeout.as_secs()),
                )
            })?
    }

    fn transition(&mut self, next: ConnectionState) {
        tracing::trace!(
            connection_id = %self.guard.id(),
            from = %self.state,
            to = %next,
            "Connection state changed"
        );
        self.state = next;
    }
}

fn enable_keepalive(stream: &TcpStream) -> io::Result<()> {
    let keepalive = TcpKeepalive::new().with_time(CLIENT_KEEPALIVE);
    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}
