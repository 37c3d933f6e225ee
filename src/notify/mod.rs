//! Notification subsystem.
//!
//! # Data Flow
//! ```text
//! Connection handler
//!     → event.rs (NotificationEvent from an intercepted request)
//!     → aggregator.rs (dedup by (method, URL, IP), count occurrences)
//!     → periodic / shutdown flush
//!     → Notificator (slack.rs webhook, or log.rs when no webhook is set)
//!
//! h2c sightings bypass the aggregator and go straight to the Notificator.
//! ```
//!
//! # Design Decisions
//! - One aggregator per proxy instance, never shared
//! - Delivery happens outside the aggregator lock
//! - Delivery failures are logged; nothing is retried or re-queued

pub mod aggregator;
pub mod event;
pub mod log;
pub mod slack;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::AppConfig;

pub use aggregator::{AggregatedEntry, FlushReport, NotificationAggregator};
pub use event::{AggregationKey, NotificationEvent};
pub use log::LogNotifier;
pub use slack::SlackNotifier;

/// Errors returned by notification delivery.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("webhook returned status {0}")]
    Status(u16),
}

/// Detail attached to a task failure report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorDetail {
    pub error: Option<String>,
    /// Verbatim text (command output, response body) shown preformatted.
    pub quoted_text: Option<String>,
}

impl ErrorDetail {
    pub fn from_error(error: &dyn std::error::Error) -> Self {
        Self {
            error: Some(error.to_string()),
            quoted_text: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.error.as_deref().map_or(true, str::is_empty)
            && self.quoted_text.as_deref().map_or(true, str::is_empty)
    }
}

/// Delivery of operator notifications.
#[async_trait]
pub trait Notificator: Send + Sync {
    /// Free-form informational message with optional extra lines.
    async fn send_info_message(&self, message: &str, extra_lines: &[String]) -> Result<(), NotifyError>;

    /// Report a failed job with its time window and error details.
    async fn send_task_error_message(
        &self,
        service: &str,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        message: &str,
        errors: &[ErrorDetail],
    ) -> Result<(), NotifyError>;

    /// Report an aggregated HTTP request seen `occurrences` times.
    async fn send_info_new_request(
        &self,
        event: &NotificationEvent,
        destination: &str,
        occurrences: u64,
    ) -> Result<(), NotifyError>;

    /// Report an unencrypted HTTP/2 (h2c) connection.
    async fn send_info_new_grpc_request(&self, remote_addr: &str, destination: &str) -> Result<(), NotifyError>;
}

/// Build the notificator selected by `config`.
///
/// A blank `slack_hook_url` selects [`LogNotifier`].
pub fn notifier_from_config(config: &AppConfig) -> Result<Arc<dyn Notificator>, NotifyError> {
    let hook_url = config.slack_hook_url.trim();
    if hook_url.is_empty() {
        return Ok(Arc::new(LogNotifier::new(config.box_name.clone())));
    }
    let notifier = SlackNotifier::new(hook_url, config.box_name.clone(), config.timeouts.notify_request())?;
    Ok(Arc::new(notifier))
}
