//! Slack incoming-webhook notificator.
//!
//! Messages are built from Block Kit JSON and POSTed to the configured hook.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::notify::{ErrorDetail, NotificationEvent, Notificator, NotifyError};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Posts notifications to a Slack incoming webhook.
pub struct SlackNotifier {
    client: reqwest::Client,
    hook_url: String,
    box_name: String,
}

impl SlackNotifier {
    pub fn new(
        hook_url: impl Into<String>,
        box_name: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            hook_url: hook_url.into(),
            box_name: box_name.into(),
        })
    }

    async fn post(&self, payload: &Value) -> Result<(), NotifyError> {
        let response = self.client.post(&self.hook_url).json(payload).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::OK {
            return Ok(());
        }
        Err(NotifyError::Status(status.as_u16()))
    }
}

#[async_trait]
impl Notificator for SlackNotifier {
    async fn send_info_message(&self, message: &str, extra_lines: &[String]) -> Result<(), NotifyError> {
        self.post(&info_payload(&self.box_name, message, extra_lines)).await
    }

    async fn send_task_error_message(
        &self,
        service: &str,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        message: &str,
        errors: &[ErrorDetail],
    ) -> Result<(), NotifyError> {
        match task_error_payload(&self.box_name, service, started_at, finished_at, message, errors) {
            Some(payload) => self.post(&payload).await,
            None => Ok(()),
        }
    }

    async fn send_info_new_request(
        &self,
        event: &NotificationEvent,
        destination: &str,
        occurrences: u64,
    ) -> Result<(), NotifyError> {
        self.post(&new_request_payload(&self.box_name, event, destination, occurrences))
            .await
    }

    async fn send_info_new_grpc_request(&self, remote_addr: &str, destination: &str) -> Result<(), NotifyError> {
        self.post(&grpc_payload(&self.box_name, remote_addr, destination)).await
    }
}

fn header(text: &str) -> Value {
    json!({ "type": "header", "text": { "type": "plain_text", "text": text } })
}

fn divider() -> Value {
    json!({ "type": "divider" })
}

fn mrkdwn(text: impl Into<String>) -> Value {
    json!({ "type": "mrkdwn", "text": text.into() })
}

fn field(title: &str, value: &str) -> Value {
    let value = if value.is_empty() { "-" } else { value };
    mrkdwn(format!("*{title}*:\t{value}"))
}

fn context(box_name: &str, extra: &[String]) -> Value {
    let mut elements = vec![mrkdwn(format!("box name: *{box_name}*"))];
    elements.extend(extra.iter().map(|line| mrkdwn(line.as_str())));
    json!({ "type": "context", "elements": elements })
}

pub(crate) fn new_request_payload(
    box_name: &str,
    event: &NotificationEvent,
    destination: &str,
    occurrences: u64,
) -> Value {
    let mut blocks = vec![
        header(":eyes: observe new http request"),
        json!({
            "type": "section",
            "fields": [field("From", &event.remote_ip), field("URL", &event.url)],
        }),
    ];
    if event.body_length > 0 {
        blocks.push(json!({
            "type": "section",
            "text": mrkdwn(format!("```{}```", event.body)),
        }));
    }
    blocks.push(context(
        box_name,
        &[
            format!("content-length: *{}*", event.body_length),
            format!("content-type: {}", event.content_type),
            format!("method: {}", event.method),
            format!("destination: {destination}"),
            format!("occurrences: *{occurrences}*"),
        ],
    ));
    json!({ "blocks": blocks })
}

pub(crate) fn grpc_payload(box_name: &str, remote_addr: &str, destination: &str) -> Value {
    json!({
        "blocks": [
            header(":eyes: observe new unsecure grpc request"),
            {
                "type": "section",
                "fields": [field("From", remote_addr), field("To", destination)],
            },
            context(box_name, &[]),
        ]
    })
}

pub(crate) fn info_payload(box_name: &str, message: &str, extra_lines: &[String]) -> Value {
    let mut blocks = vec![header(&format!(":warning: {message}")), divider()];
    if !extra_lines.is_empty() {
        blocks.extend(
            extra_lines
                .iter()
                .map(|line| json!({ "type": "section", "text": mrkdwn(line.as_str()) })),
        );
        blocks.push(divider());
    }
    blocks.push(context(box_name, &[]));
    json!({ "blocks": blocks })
}

/// `None` when no error detail carries content: there is nothing to report.
pub(crate) fn task_error_payload(
    box_name: &str,
    service: &str,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    message: &str,
    errors: &[ErrorDetail],
) -> Option<Value> {
    if errors.iter().all(ErrorDetail::is_empty) {
        return None;
    }

    let rich_text = |kind: &str, text: String| {
        json!({ "type": kind, "elements": [{ "type": "text", "text": text }] })
    };

    let mut elements = Vec::new();
    if !message.is_empty() {
        elements.push(rich_text("rich_text_section", message.to_string()));
    }
    let numbered = errors.len() > 1;
    for (i, detail) in errors.iter().enumerate() {
        if let Some(error) = detail.error.as_deref().filter(|e| !e.is_empty()) {
            let prefix = if numbered { format!("error {}: ", i + 1) } else { String::new() };
            elements.push(rich_text("rich_text_section", format!("{prefix}{error}\n")));
        }
        if let Some(quoted) = detail.quoted_text.as_deref().filter(|q| !q.is_empty()) {
            elements.push(rich_text("rich_text_preformatted", quoted.to_string()));
        }
    }

    let elapsed = (finished_at - started_at).to_std().unwrap_or_default();
    Some(json!({
        "blocks": [
            header(&format!(":bangbang: Service job failed: {service}")),
            divider(),
            { "type": "rich_text", "block_id": "block1", "elements": elements },
            {
                "type": "section",
                "fields": [
                    mrkdwn("*started at*"),
                    mrkdwn("*finished at*"),
                    mrkdwn(started_at.format(TIMESTAMP_FORMAT).to_string()),
                    mrkdwn(format!("{} ({:?})", finished_at.format(TIMESTAMP_FORMAT), elapsed)),
                ],
            },
            divider(),
            context(box_name, &[]),
        ]
    }))
}
