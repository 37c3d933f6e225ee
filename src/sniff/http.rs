//! HTTP/1.x request interception.
//!
//! Parses exactly one request out of the look-ahead buffer. Nothing is
//! consumed unless the whole request (head and body) parsed; on any failure
//! the buffered bytes stay in place and the connection is relayed as-is.
//!
//! A parsed request is forwarded as a reconstruction: the original request
//! line and headers in their original order, with `Content-Length` set to the
//! buffered body length and `Transfer-Encoding` removed, followed by the
//! de-chunked body.

use std::io;
use std::str;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncRead;

use crate::net::PeekableStream;

const MAX_HEADERS: usize = 64;

/// Why a request could not be intercepted.
///
/// None of these are connection errors: the caller falls back to passthrough.
#[derive(Debug, Error)]
pub enum InterceptError {
    #[error("malformed request: {0}")]
    Malformed(#[from] httparse::Error),

    #[error("malformed chunked body")]
    InvalidChunk,

    #[error("invalid Content-Length")]
    InvalidContentLength,

    #[error("unsupported transfer coding")]
    UnsupportedTransferEncoding,

    #[error("request exceeds {0} bytes")]
    TooLarge(usize),

    #[error("connection closed before request completed")]
    UnexpectedEof,

    #[error("request not completed within {0:?}")]
    TimedOut(Duration),

    #[error("read failed: {0}")]
    Io(#[from] io::Error),
}

impl InterceptError {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            InterceptError::Malformed(_) => "malformed",
            InterceptError::InvalidChunk => "invalid_chunk",
            InterceptError::InvalidContentLength => "invalid_content_length",
            InterceptError::UnsupportedTransferEncoding => "unsupported_transfer_encoding",
            InterceptError::TooLarge(_) => "too_large",
            InterceptError::UnexpectedEof => "eof",
            InterceptError::TimedOut(_) => "timeout",
            InterceptError::Io(_) => "io",
        }
    }
}

/// One fully buffered HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedRequest {
    pub method: String,
    /// Request target exactly as sent (origin, absolute, authority or `*` form).
    pub target: String,
    /// Minor version of HTTP/1.x.
    pub version: u8,
    /// Header fields in wire order; values are kept as raw bytes.
    pub headers: Vec<(String, Vec<u8>)>,
    pub body: Vec<u8>,
    /// Head lines exactly as received. Without it the head is re-serialized
    /// from the parsed fields.
    pub(crate) wire: Option<WireHead>,
}

/// Raw head of a parsed request, split into lines with their terminators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WireHead {
    /// Request line, preceded by any empty lines the client sent first.
    request_line: Vec<u8>,
    /// One entry per header, parallel to `InterceptedRequest::headers`.
    header_lines: Vec<Vec<u8>>,
    /// The empty line closing the head.
    terminator: Vec<u8>,
}

impl WireHead {
    /// Split `head` into lines. `None` when the lines do not line up with
    /// `header_count` parsed headers.
    fn split(head: &[u8], header_count: usize) -> Option<Self> {
        let mut lines = head.split_inclusive(|&b| b == b'\n');

        let mut request_line = Vec::new();
        for line in lines.by_ref() {
            request_line.extend_from_slice(line);
            if !is_blank(line) {
                break;
            }
        }

        let mut header_lines: Vec<Vec<u8>> = lines.map(<[u8]>::to_vec).collect();
        let terminator = header_lines.pop()?;
        if !is_blank(&terminator) || header_lines.len() != header_count {
            return None;
        }
        Some(Self {
            request_line,
            header_lines,
            terminator,
        })
    }
}

fn is_blank(line: &[u8]) -> bool {
    line == b"\r\n" || line == b"\n"
}

impl InterceptedRequest {
    /// First value of header `name` (case-insensitive), if it is valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| str::from_utf8(v).ok())
    }

    pub fn content_type(&self) -> &str {
        self.header("content-type").unwrap_or_default()
    }

    /// Serialize the request for forwarding.
    ///
    /// Every head line other than the framing headers is copied byte for
    /// byte. `Content-Length` is written where the original one was (or after
    /// the last header when there was none) and always matches `body`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256 + self.body.len());
        match &self.wire {
            Some(wire) => out.extend_from_slice(&wire.request_line),
            None => out.extend_from_slice(
                format!("{} {} HTTP/1.{}\r\n", self.method, self.target, self.version).as_bytes(),
            ),
        }

        let length_line = format!("Content-Length: {}\r\n", self.body.len());
        let mut length_written = false;
        for (index, (name, value)) in self.headers.iter().enumerate() {
            if name.eq_ignore_ascii_case("transfer-encoding") {
                continue;
            }
            if name.eq_ignore_ascii_case("content-length") {
                if !length_written {
                    out.extend_from_slice(length_line.as_bytes());
                    length_written = true;
                }
                continue;
            }
            match self.wire.as_ref().and_then(|w| w.header_lines.get(index)) {
                Some(line) => out.extend_from_slice(line),
                None => {
                    out.extend_from_slice(name.as_bytes());
                    out.extend_from_slice(b": ");
                    out.extend_from_slice(value);
                    out.extend_from_slice(b"\r\n");
                }
            }
        }
        if !length_written {
            out.extend_from_slice(length_line.as_bytes());
        }

        match &self.wire {
            Some(wire) => out.extend_from_slice(&wire.terminator),
            None => out.extend_from_slice(b"\r\n"),
        }
        out.extend_from_slice(&self.body);
        out
    }
}

/// Parse one request from `stream` within `deadline`.
///
/// On success the request's wire bytes are consumed from the stream. On
/// failure nothing is consumed. The deadline only bounds this call.
pub async fn intercept<R>(
    stream: &mut PeekableStream<R>,
    deadline: Duration,
    max_bytes: usize,
) -> Result<InterceptedRequest, InterceptError>
where
    R: AsyncRead + Unpin,
{
    let (request, consumed) = tokio::time::timeout(deadline, read_request(stream, max_bytes))
        .await
        .map_err(|_| InterceptError::TimedOut(deadline))??;
    stream.consume(consumed);
    Ok(request)
}

async fn read_request<R>(
    stream: &mut PeekableStream<R>,
    max_bytes: usize,
) -> Result<(InterceptedRequest, usize), InterceptError>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(parsed) = parse_request(stream.buffered(), max_bytes)? {
            return Ok(parsed);
        }
        if stream.buffered().len() >= max_bytes {
            return Err(InterceptError::TooLarge(max_bytes));
        }
        if stream.is_eof() || stream.fill_more().await? == 0 {
            return Err(InterceptError::UnexpectedEof);
        }
    }
}

/// Parse a complete request from the start of `data`.
///
/// Returns the request and the number of wire bytes it occupied, or `None`
/// when more bytes are needed.
pub fn parse_request(
    data: &[u8],
    max_bytes: usize,
) -> Result<Option<(InterceptedRequest, usize)>, InterceptError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    let head_len = match req.parse(data)? {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => return Ok(None),
    };

    let framing = body_framing(req.headers)?;
    let rest = &data[head_len..];
    let (body, body_len) = match framing {
        Framing::Empty => (Vec::new(), 0),
        Framing::Length(len) => {
            if head_len.saturating_add(len) > max_bytes {
                return Err(InterceptError::TooLarge(max_bytes));
            }
            if rest.len() < len {
                return Ok(None);
            }
            (rest[..len].to_vec(), len)
        }
        Framing::Chunked => match decode_chunked(rest, head_len, max_bytes)? {
            Some(decoded) => decoded,
            None => return Ok(None),
        },
    };

    let request = InterceptedRequest {
        method: req.method.unwrap_or_default().to_string(),
        target: req.path.unwrap_or_default().to_string(),
        version: req.version.unwrap_or(1),
        headers: req
            .headers
            .iter()
            .map(|h| (h.name.to_string(), h.value.to_vec()))
            .collect(),
        body,
        wire: WireHead::split(&data[..head_len], req.headers.len()),
    };
    Ok(Some((request, head_len + body_len)))
}

enum Framing {
    Empty,
    Length(usize),
    Chunked,
}

fn body_framing(headers: &[httparse::Header<'_>]) -> Result<Framing, InterceptError> {
    let mut length: Option<usize> = None;
    let mut chunked = false;

    for header in headers {
        if header.name.eq_ignore_ascii_case("transfer-encoding") {
            let value = str::from_utf8(header.value)
                .map_err(|_| InterceptError::UnsupportedTransferEncoding)?;
            // Only chunked as the final coding delimits a request body.
            let last = value.rsplit(',').next().unwrap_or_default().trim();
            if !last.eq_ignore_ascii_case("chunked") {
                return Err(InterceptError::UnsupportedTransferEncoding);
            }
            chunked = true;
        } else if header.name.eq_ignore_ascii_case("content-length") {
            let parsed = str::from_utf8(header.value)
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok())
                .ok_or(InterceptError::InvalidContentLength)?;
            if length.is_some_and(|existing| existing != parsed) {
                return Err(InterceptError::InvalidContentLength);
            }
            length = Some(parsed);
        }
    }

    Ok(if chunked {
        Framing::Chunked
    } else {
        match length {
            Some(0) | None => Framing::Empty,
            Some(len) => Framing::Length(len),
        }
    })
}

/// Decode a chunked body including any trailer section.
///
/// Returns the decoded body and the number of wire bytes used. A chunk that
/// would take the request past `max_bytes` fails before anything is buffered.
fn decode_chunked(
    data: &[u8],
    head_len: usize,
    max_bytes: usize,
) -> Result<Option<(Vec<u8>, usize)>, InterceptError> {
    let mut body = Vec::new();
    let mut pos = 0;

    loop {
        let (size_len, size) = match httparse::parse_chunk_size(&data[pos..]) {
            Ok(httparse::Status::Complete(parsed)) => parsed,
            Ok(httparse::Status::Partial) => return Ok(None),
            Err(_) => return Err(InterceptError::InvalidChunk),
        };
        pos += size_len;

        if size == 0 {
            break;
        }

        let size = usize::try_from(size).map_err(|_| InterceptError::InvalidChunk)?;
        let end = pos.checked_add(size).ok_or(InterceptError::InvalidChunk)?;
        if head_len.saturating_add(end) > max_bytes {
            return Err(InterceptError::TooLarge(max_bytes));
        }
        let needed = end.checked_add(2).ok_or(InterceptError::InvalidChunk)?;
        if data.len() < needed {
            return Ok(None);
        }
        if &data[end..needed] != b"\r\n" {
            return Err(InterceptError::InvalidChunk);
        }
        body.extend_from_slice(&data[pos..end]);
        pos = needed;
    }

    // Trailer fields end with an empty line; they are not forwarded.
    loop {
        let Some(line_len) = data[pos..].windows(2).position(|w| w == b"\r\n") else {
            return Ok(None);
        };
        pos += line_len + 2;
        if line_len == 0 {
            return Ok(Some((body, pos)));
        }
    }
}
