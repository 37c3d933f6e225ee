//! Protocol sniffing.
//!
//! # Data Flow
//! ```text
//! PeekableStream (client bytes)
//!     → classify() on the buffered prefix
//!         H2C preface (24 bytes)     → Protocol::H2c
//!         known method token (4 B)   → Protocol::Http → http.rs interceptor
//!         anything else / too short  → Protocol::Opaque
//! ```
//!
//! # Design Decisions
//! - Detection only looks at buffered bytes; nothing is consumed
//! - Waiting for bytes is bounded: an undecided stream becomes Opaque
//! - The wait ends as soon as the prefix can no longer be an h2c preface

pub mod http;

use std::fmt;
use std::time::Duration;

use tokio::io::AsyncRead;
use tokio::time::{timeout_at, Instant};

use crate::net::PeekableStream;

pub use http::{intercept, InterceptError, InterceptedRequest};

/// Connection preface of HTTP/2 with prior knowledge.
pub const H2C_PREFACE: &[u8; 24] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Leading four bytes of the request methods treated as HTTP.
const METHOD_PREFIXES: [&[u8; 4]; 9] = [
    b"GET ", b"POST", b"PUT ", b"PATC", b"DELE", b"HEAD", b"OPTI", b"CONN", b"PRI ",
];

const METHOD_PREFIX_LEN: usize = 4;

/// Classification of the start of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Plaintext HTTP/1.x request.
    Http,
    /// Unencrypted HTTP/2 (gRPC without TLS, typically).
    H2c,
    /// Anything else, including streams too short to decide.
    Opaque,
}

impl Protocol {
    /// Label used for metrics and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::H2c => "h2c",
            Protocol::Opaque => "opaque",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a stream prefix.
///
/// Returns `None` while more bytes could change the answer. With `complete`
/// set (no more bytes will arrive in time) a decision is always returned.
pub fn classify(data: &[u8], complete: bool) -> Option<Protocol> {
    if data.len() >= H2C_PREFACE.len() {
        if data.starts_with(H2C_PREFACE) {
            return Some(Protocol::H2c);
        }
    } else if !complete && H2C_PREFACE.starts_with(data) {
        return None;
    }

    if data.len() >= METHOD_PREFIX_LEN {
        let head = &data[..METHOD_PREFIX_LEN];
        return Some(if METHOD_PREFIXES.iter().any(|prefix| head == &prefix[..]) {
            Protocol::Http
        } else {
            Protocol::Opaque
        });
    }

    complete.then_some(Protocol::Opaque)
}

/// Classify the start of `stream`, waiting at most `wait` for enough bytes.
///
/// Bytes read while waiting remain buffered in `stream`. Read errors and end
/// of stream end the wait; the decision is then made on what was buffered.
pub async fn sniff<R>(stream: &mut PeekableStream<R>, wait: Duration) -> Protocol
where
    R: AsyncRead + Unpin,
{
    let deadline = Instant::now() + wait;
    loop {
        if let Some(protocol) = classify(stream.buffered(), stream.is_eof()) {
            return protocol;
        }
        match timeout_at(deadline, stream.fill_more()).await {
            Ok(Ok(n)) if n > 0 => continue,
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Read failed while sniffing");
            }
            Err(_) => {
                tracing::trace!(buffered = stream.buffered().len(), "Sniff wait elapsed");
            }
        }
        return classify(stream.buffered(), true).unwrap_or(Protocol::Opaque);
    }
}
