//! Notificator that only writes structured log events.
//!
//! Used when no webhook is configured, so observed traffic is still visible.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::notify::{ErrorDetail, NotificationEvent, Notificator, NotifyError};

#[derive(Debug, Clone, Default)]
pub struct LogNotifier {
    box_name: String,
}

impl LogNotifier {
    pub fn new(box_name: impl Into<String>) -> Self {
        Self {
            box_name: box_name.into(),
        }
    }
}

#[async_trait]
impl Notificator for LogNotifier {
    async fn send_info_message(&self, message: &str, extra_lines: &[String]) -> Result<(), NotifyError> {
        tracing::info!(box_name = %self.box_name, details = ?extra_lines, "{message}");
        Ok(())
    }

    async fn send_task_error_message(
        &self,
        service: &str,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        message: &str,
        errors: &[ErrorDetail],
    ) -> Result<(), NotifyError> {
        tracing::error!(
            box_name = %self.box_name,
            service,
            started_at = %started_at,
            finished_at = %finished_at,
            errors = ?errors,
            "Service job failed: {message}"
        );
        Ok(())
    }

    async fn send_info_new_request(
        &self,
        event: &NotificationEvent,
        destination: &str,
        occurrences: u64,
    ) -> Result<(), NotifyError> {
        tracing::info!(
            box_name = %self.box_name,
            remote_ip = %event.remote_ip,
            method = %event.method,
            path = %event.url,
            content_type = %event.content_type,
            body_length = event.body_length,
            destination,
            occurrences,
            "New HTTP request"
        );
        Ok(())
    }

    async fn send_info_new_grpc_request(&self, remote_addr: &str, destination: &str) -> Result<(), NotifyError> {
        tracing::info!(
            box_name = %self.box_name,
            remote_ip = remote_addr,
            destination,
            "New unsecure gRPC request"
        );
        Ok(())
    }
}
