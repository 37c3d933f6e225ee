//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define proxy metrics (connections, sniffed protocols, notifications)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `tcp_proxy_connections_total` (counter): accepted connections by listen port
//! - `tcp_proxy_sniffed_total` (counter): classified streams by protocol
//! - `tcp_proxy_intercept_failures_total` (counter): HTTP parse fallbacks by reason
//! - `tcp_proxy_upstream_connect_failures_total` (counter): failed dials by listen port
//! - `tcp_proxy_notifications_total` (counter): deliveries by kind and outcome
//! - `tcp_proxy_flushed_entries_total` (counter): aggregated entries drained
//!
//! # Design Decisions
//! - Low-overhead metric updates; without an installed recorder they are no-ops
//! - Recording never touches the data path

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder with an HTTP listener on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_connection(listen_port: u16) {
    metrics::counter!("tcp_proxy_connections_total", "listen_port" => listen_port.to_string()).increment(1);
}

pub fn record_sniffed(protocol: &'static str) {
    metrics::counter!("tcp_proxy_sniffed_total", "protocol" => protocol).increment(1);
}

pub fn record_intercept_failure(reason: &'static str) {
    metrics::counter!("tcp_proxy_intercept_failures_total", "reason" => reason).increment(1);
}

pub fn record_upstream_failure(listen_port: u16) {
    metrics::counter!(
        "tcp_proxy_upstream_connect_failures_total",
        "listen_port" => listen_port.to_string()
    )
    .increment(1);
}

pub fn record_notification(kind: &'static str, success: bool) {
    let outcome = if success { "ok" } else { "error" };
    metrics::counter!("tcp_proxy_notifications_total", "kind" => kind, "outcome" => outcome).increment(1);
}

pub fn record_flushed_entries(count: usize) {
    metrics::counter!("tcp_proxy_flushed_entries_total").increment(count as u64);
}
