//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, ports valid)
//! - Detect conflicting listeners
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::AppConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("proxy_list is empty")]
    NoProxies,

    #[error("proxy_list[{index}]: destination_address is empty")]
    EmptyDestination { index: usize },

    #[error("proxy_list[{index}]: destination_port must be non-zero")]
    ZeroDestinationPort { index: usize },

    #[error("proxy_list[{index}]: listen port {port} on {address} is already used by another instance")]
    DuplicateListener { index: usize, address: String, port: u16 },

    #[error("{field} must be greater than zero")]
    ZeroValue { field: &'static str },

    #[error("metrics_address {0:?} is not a socket address")]
    InvalidMetricsAddress(String),

    #[error("slack_hook_url {0:?} must be an http(s) URL")]
    InvalidHookUrl(String),
}

/// Validate a parsed configuration, collecting every error found.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.proxy_list.is_empty() {
        errors.push(ValidationError::NoProxies);
    }

    let mut listeners = HashSet::new();
    for (index, proxy) in config.proxy_list.iter().enumerate() {
        if proxy.destination_address.trim().is_empty() {
            errors.push(ValidationError::EmptyDestination { index });
        }
        if proxy.destination_port == 0 {
            errors.push(ValidationError::ZeroDestinationPort { index });
        }
        // Port 0 is an ephemeral bind and never conflicts.
        if proxy.listen_port != 0
            && !listeners.insert((proxy.listen_address.clone(), proxy.listen_port))
        {
            errors.push(ValidationError::DuplicateListener {
                index,
                address: proxy.listen_address.clone(),
                port: proxy.listen_port,
            });
        }
    }

    let numeric = [
        ("intercept.sniff_timeout_ms", config.intercept.sniff_timeout_ms),
        ("intercept.parse_timeout_ms", config.intercept.parse_timeout_ms),
        ("intercept.max_request_bytes", config.intercept.max_request_bytes as u64),
        ("timeouts.upstream_connect_secs", config.timeouts.upstream_connect_secs),
        ("timeouts.notify_request_secs", config.timeouts.notify_request_secs),
        ("notifications.flush_interval_secs", config.notifications.flush_interval_secs),
    ];
    for (field, value) in numeric {
        if value == 0 {
            errors.push(ValidationError::ZeroValue { field });
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    let hook = config.slack_hook_url.trim();
    if !hook.is_empty() && !(hook.starts_with("http://") || hook.starts_with("https://")) {
        errors.push(ValidationError::InvalidHookUrl(config.slack_hook_url.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
