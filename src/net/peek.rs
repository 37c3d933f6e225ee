//! Peekable buffered reader.
//!
//! Bytes pulled in while inspecting a stream stay in the buffer until they are
//! explicitly consumed or read out through [`AsyncRead`]. Inspection therefore
//! never loses or duplicates data: whatever was looked at is replayed first.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

const READ_CHUNK: usize = 4096;

/// A reader that can look ahead without consuming.
#[derive(Debug)]
pub struct PeekableStream<R> {
    inner: R,
    buf: Vec<u8>,
    /// Start of the unconsumed region of `buf`.
    pos: usize,
    eof: bool,
}

impl<R> PeekableStream<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            pos: 0,
            eof: false,
        }
    }

    /// Bytes read from the source but not yet consumed.
    pub fn buffered(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    /// Whether the source reported end of stream while filling.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Drop the first `n` buffered bytes.
    ///
    /// # Panics
    /// Panics if `n` exceeds the buffered length.
    pub fn consume(&mut self, n: usize) {
        assert!(n <= self.buffered().len(), "consume past buffered data");
        self.pos += n;
        if self.pos == self.buf.len() {
            self.buf.clear();
            self.pos = 0;
        }
    }
}

impl<R: AsyncRead + Unpin> PeekableStream<R> {
    /// Read more bytes from the source and append them to the buffer.
    ///
    /// Returns the number of bytes added; zero means end of stream. Cancel
    /// safe: if the future is dropped before completing, no data is lost.
    pub async fn fill_more(&mut self) -> io::Result<usize> {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        self.buf.reserve(READ_CHUNK);
        let n = self.inner.read_buf(&mut self.buf).await?;
        if n == 0 {
            self.eof = true;
        }
        Ok(n)
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for PeekableStream<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        out: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let pending = this.buffered();
        if !pending.is_empty() {
            let n = pending.len().min(out.remaining());
            out.put_slice(&pending[..n]);
            this.consume(n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.inner).poll_read(cx, out)
    }
}
