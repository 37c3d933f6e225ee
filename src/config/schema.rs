//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the TCP proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Site identifier shown in every notification.
    pub box_name: String,

    /// Alert webhook. Empty means notifications are only logged.
    pub slack_hook_url: String,

    /// Proxy instances, started in this order.
    pub proxy_list: Vec<ProxyInstanceConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Sniffing and interception limits.
    pub intercept: InterceptConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Notification aggregation settings.
    pub notifications: NotificationConfig,
}

/// One listen port relayed to one destination.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProxyInstanceConfig {
    /// Address to bind (default "0.0.0.0").
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Port to listen on. Zero binds an ephemeral port.
    pub listen_port: u16,

    /// Destination host name or IP.
    pub destination_address: String,

    /// Destination port.
    pub destination_port: u16,

    /// Sniff traffic and notify about plaintext HTTP and h2c.
    #[serde(default)]
    pub notify_http: bool,
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

impl ProxyInstanceConfig {
    /// Build an instance config listening on all interfaces.
    pub fn new(listen_port: u16, destination_address: impl Into<String>, destination_port: u16) -> Self {
        Self {
            listen_address: default_listen_address(),
            listen_port,
            destination_address: destination_address.into(),
            destination_port,
            notify_http: false,
        }
    }

    /// Enable or disable HTTP notifications.
    pub fn with_notify_http(mut self, notify_http: bool) -> Self {
        self.notify_http = notify_http;
        self
    }

    /// `host:port` of the listener.
    pub fn listen_target(&self) -> String {
        format!("{}:{}", self.listen_address, self.listen_port)
    }

    /// `host:port` of the destination, as dialed and as reported in notifications.
    pub fn destination(&self) -> String {
        format!("{}:{}", self.destination_address, self.destination_port)
    }
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable, for development.
    #[default]
    Pretty,
    /// One JSON object per line, for log shipping.
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Limits for protocol sniffing and HTTP interception.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InterceptConfig {
    /// Maximum wait for enough bytes to classify a stream.
    pub sniff_timeout_ms: u64,

    /// Deadline for parsing one complete HTTP request.
    pub parse_timeout_ms: u64,

    /// Upper bound on head + body buffered for a single request.
    pub max_request_bytes: usize,
}

impl InterceptConfig {
    pub fn sniff_timeout(&self) -> Duration {
        Duration::from_millis(self.sniff_timeout_ms)
    }

    pub fn parse_timeout(&self) -> Duration {
        Duration::from_millis(self.parse_timeout_ms)
    }
}

impl Default for InterceptConfig {
    fn default() -> Self {
        Self {
            sniff_timeout_ms: 300,
            parse_timeout_ms: 300,
            max_request_bytes: 8 * 1024 * 1024, // 8MB
        }
    }
}

/// Timeout configuration for outbound operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Dial timeout for the destination.
    pub upstream_connect_secs: u64,

    /// Timeout for a single webhook delivery.
    pub notify_request_secs: u64,
}

impl TimeoutConfig {
    pub fn upstream_connect(&self) -> Duration {
        Duration::from_secs(self.upstream_connect_secs)
    }

    pub fn notify_request(&self) -> Duration {
        Duration::from_secs(self.notify_request_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            upstream_connect_secs: 10,
            notify_request_secs: 30,
        }
    }
}

/// Notification aggregation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Interval between periodic flushes of aggregated HTTP events.
    pub flush_interval_secs: u64,
}

impl NotificationConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: 300, // 5 minutes
        }
    }
}
