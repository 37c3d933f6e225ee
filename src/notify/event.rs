//! Observed HTTP events and their aggregation identity.

use std::net::{IpAddr, SocketAddr};

use crate::sniff::InterceptedRequest;

/// Bodies longer than this are truncated in the snapshot.
pub const BODY_SNAPSHOT_LIMIT: usize = 1024;

const TRUNCATION_MARKER: &str = "…<truncated>";

/// One observed HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    /// Peer address as observed (`ip:port`).
    pub remote_ip: String,
    pub url: String,
    pub method: String,
    pub content_type: String,
    /// Length-bounded, markdown-safe rendering of the body.
    pub body: String,
    /// Full body length in bytes.
    pub body_length: usize,
    key: AggregationKey,
}

impl NotificationEvent {
    pub fn new(
        remote: SocketAddr,
        method: impl Into<String>,
        url: impl Into<String>,
        content_type: impl Into<String>,
        body: &[u8],
    ) -> Self {
        let method = method.into();
        let url = url.into();
        let key = AggregationKey {
            method: method.clone(),
            url: url.clone(),
            ip: remote.ip(),
        };
        Self {
            remote_ip: remote.to_string(),
            url,
            method,
            content_type: content_type.into(),
            body: body_snapshot(body),
            body_length: body.len(),
            key,
        }
    }

    /// Build an event from an intercepted request.
    pub fn from_request(remote: SocketAddr, request: &InterceptedRequest) -> Self {
        Self::new(
            remote,
            request.method.as_str(),
            request.target.as_str(),
            request.content_type(),
            &request.body,
        )
    }

    /// Identity used to merge repeated requests.
    pub fn key(&self) -> &AggregationKey {
        &self.key
    }
}

/// `(method, URL, remote IP)`; the source port is deliberately not part of it,
/// so repeat requests from one caller over fresh connections merge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggregationKey {
    pub method: String,
    pub url: String,
    pub ip: IpAddr,
}

/// Render a body for display: truncated to [`BODY_SNAPSHOT_LIMIT`] bytes with a
/// marker, and with code fences broken up so the snapshot cannot escape the
/// code block it is rendered in.
pub fn body_snapshot(body: &[u8]) -> String {
    let mut text = if body.len() > BODY_SNAPSHOT_LIMIT {
        let mut text = String::from_utf8_lossy(&body[..BODY_SNAPSHOT_LIMIT]).into_owned();
        text.push_str(TRUNCATION_MARKER);
        text
    } else {
        String::from_utf8_lossy(body).into_owned()
    };
    if text.contains("```") {
        text = text.replace("```", "`\u{200b}``");
    }
    text
}
