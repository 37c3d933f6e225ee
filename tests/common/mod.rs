//! Shared utilities for integration tests: a recording notificator, fake
//! destinations and a proxy instance builder.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{routing::any, Router};
use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use tcp_proxy::config::ProxyInstanceConfig;
use tcp_proxy::notify::{ErrorDetail, NotificationEvent, Notificator, NotifyError};
use tcp_proxy::proxy::{InstanceSettings, ProxyInstance};

/// Everything a [`RecordingNotifier`] was asked to send.
#[derive(Debug, Clone)]
pub enum Recorded {
    Info {
        message: String,
        lines: Vec<String>,
    },
    TaskError {
        service: String,
        message: String,
    },
    Request {
        event: NotificationEvent,
        destination: String,
        occurrences: u64,
    },
    Grpc {
        remote_addr: String,
        destination: String,
    },
}

/// Notificator that keeps every call in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<Recorded>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Recorded> {
        self.calls.lock().unwrap().clone()
    }

    /// `(event, destination, occurrences)` of every HTTP request notification.
    pub fn requests(&self) -> Vec<(NotificationEvent, String, u64)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Recorded::Request {
                    event,
                    destination,
                    occurrences,
                } => Some((event, destination, occurrences)),
                _ => None,
            })
            .collect()
    }

    /// `(remote_addr, destination)` of every h2c notification.
    pub fn grpc(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Recorded::Grpc {
                    remote_addr,
                    destination,
                } => Some((remote_addr, destination)),
                _ => None,
            })
            .collect()
    }

    fn push(&self, call: Recorded) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Notificator for RecordingNotifier {
    async fn send_info_message(&self, message: &str, extra_lines: &[String]) -> Result<(), NotifyError> {
        self.push(Recorded::Info {
            message: message.to_string(),
            lines: extra_lines.to_vec(),
        });
        Ok(())
    }

    async fn send_task_error_message(
        &self,
        service: &str,
        _started_at: DateTime<Utc>,
        _finished_at: DateTime<Utc>,
        message: &str,
        _errors: &[ErrorDetail],
    ) -> Result<(), NotifyError> {
        self.push(Recorded::TaskError {
            service: service.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }

    async fn send_info_new_request(
        &self,
        event: &NotificationEvent,
        destination: &str,
        occurrences: u64,
    ) -> Result<(), NotifyError> {
        self.push(Recorded::Request {
            event: event.clone(),
            destination: destination.to_string(),
            occurrences,
        });
        Ok(())
    }

    async fn send_info_new_grpc_request(&self, remote_addr: &str, destination: &str) -> Result<(), NotifyError> {
        self.push(Recorded::Grpc {
            remote_addr: remote_addr.to_string(),
            destination: destination.to_string(),
        });
        Ok(())
    }
}

/// A fake destination the proxy relays to.
pub trait RemoteServer {
    fn destination_port(&self) -> u16;
}

/// HTTP destination answering every path with `ok <method> <path>`.
pub struct HttpTestServer {
    addr: SocketAddr,
}

impl HttpTestServer {
    pub async fn start() -> Self {
        async fn reply(method: axum::http::Method, uri: axum::http::Uri) -> String {
            format!("ok {} {}", method, uri.path())
        }

        let app = Router::new().route("/", any(reply)).route("/{*path}", any(reply));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr }
    }
}

impl RemoteServer for HttpTestServer {
    fn destination_port(&self) -> u16 {
        self.addr.port()
    }
}

/// Line protocol destination: answers `PING` with `OK`.
pub struct TcpPingServer {
    addr: SocketAddr,
}

impl TcpPingServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let (rx, mut tx) = socket.into_split();
                    let mut lines = BufReader::new(rx).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        let reply: &[u8] = if line.trim() == "PING" { b"OK\n" } else { b"ERR\n" };
                        if tx.write_all(reply).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        Self { addr }
    }
}

impl RemoteServer for TcpPingServer {
    fn destination_port(&self) -> u16 {
        self.addr.port()
    }
}

/// Destination that records every byte it receives and echoes it back.
pub struct CaptureServer {
    addr: SocketAddr,
    captured: Arc<Mutex<Vec<u8>>>,
}

impl CaptureServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let sink = Arc::clone(&sink);
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    loop {
                        let n = match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => n,
                        };
                        sink.lock().unwrap().extend_from_slice(&buf[..n]);
                        if socket.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        Self { addr, captured }
    }

    pub fn captured(&self) -> Vec<u8> {
        self.captured.lock().unwrap().clone()
    }

    /// Wait until at least `len` bytes arrived, or `timeout` passed.
    pub async fn wait_for(&self, len: usize, timeout: Duration) -> Vec<u8> {
        eventually(timeout, || self.captured().len() >= len).await;
        self.captured()
    }
}

impl RemoteServer for CaptureServer {
    fn destination_port(&self) -> u16 {
        self.addr.port()
    }
}

/// Start a proxy on an ephemeral loopback port in front of `remote`.
pub async fn start_proxy(
    remote: &dyn RemoteServer,
    notify_http: bool,
    notifier: Arc<dyn Notificator>,
) -> (ProxyInstance, SocketAddr) {
    let config = ProxyInstanceConfig {
        listen_address: "127.0.0.1".to_string(),
        ..ProxyInstanceConfig::new(0, "127.0.0.1", remote.destination_port())
    }
    .with_notify_http(notify_http);

    let mut proxy = ProxyInstance::new(config, InstanceSettings::default(), notifier);
    let addr = proxy.start().await.unwrap();
    (proxy, addr)
}

/// HTTP client that opens a fresh connection per request and ignores
/// proxy environment variables.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

/// Poll `condition` every 10ms until it holds or `timeout` passes.
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
