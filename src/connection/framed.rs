//! Frame-level I/O over any async byte stream.
//!
//! [`FrameReader`] owns the read buffer and turns bytes into [`RespValue`]s;
//! [`FrameWriter`] encodes and writes commands. Keeping the halves separate
//! lets one task own reads while other tasks issue writes on the same
//! connection.

use crate::error::{HaError, Result};
use crate::resp::parser::parse;
use crate::resp::types::RespValue;
use crate::resp::writer::encode_named_command;

use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default initial read buffer capacity (64 KB).
const DEFAULT_BUF_CAPACITY: usize = 64 * 1024;

/// Default maximum read buffer size (512 MB).
pub const DEFAULT_MAX_BUF_SIZE: usize = 512 * 1024 * 1024;

/// Reading half: decodes one RESP frame at a time.
pub struct FrameReader<R> {
    inner: R,
    /// Data read from the stream but not yet consumed by the parser.
    buf: BytesMut,
    max_buf_size: usize,
    read_timeout: Option<Duration>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_max_buf(inner, DEFAULT_MAX_BUF_SIZE)
    }

    pub fn with_max_buf(inner: R, max_buf_size: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY.min(max_buf_size)),
            max_buf_size,
            read_timeout: None,
        }
    }

    /// Set the read timeout; `None` waits forever.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.read_timeout = timeout.filter(|d| !d.is_zero());
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    /// Read and parse one complete RESP value.
    ///
    /// Fails with [`HaError::Timeout`] when no complete frame arrived within
    /// the read timeout. Partial data stays buffered, so the next call picks
    /// up where this one stopped.
    pub async fn read_frame(&mut self) -> Result<RespValue> {
        match self.read_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, self.read_frame_inner()).await {
                Ok(result) => result,
                Err(_) => Err(HaError::Timeout(format!(
                    "no frame received within {timeout:?}"
                ))),
            },
            None => self.read_frame_inner().await,
        }
    }

    async fn read_frame_inner(&mut self) -> Result<RespValue> {
        loop {
            if !self.buf.is_empty() {
                // Freeze a snapshot so bulk strings slice it without copying;
                // only unconsumed bytes are put back.
                let snapshot = self.buf.split().freeze();
                match parse(&snapshot) {
                    Ok((value, consumed)) => {
                        if consumed < snapshot.len() {
                            self.buf.extend_from_slice(&snapshot[consumed..]);
                        }
                        return Ok(value);
                    }
                    Err(HaError::Incomplete) => {
                        self.buf.extend_from_slice(&snapshot);
                    }
                    Err(e) => {
                        self.buf.extend_from_slice(&snapshot);
                        return Err(e);
                    }
                }
            }

            self.reserve()?;
            // read_buf is cancel-safe: a timeout here loses no bytes.
            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(HaError::Connection(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed by server",
                )));
            }
        }
    }

    /// Make room for the next read, enforcing the buffer ceiling.
    fn reserve(&mut self) -> Result<()> {
        if self.buf.capacity() - self.buf.len() >= 4096 {
            return Ok(());
        }
        let new_cap = (self.buf.capacity() * 2).max(DEFAULT_BUF_CAPACITY);
        if new_cap > self.max_buf_size {
            if self.buf.capacity() >= self.max_buf_size {
                return Err(HaError::Protocol(format!(
                    "RESP message too large: buffer would exceed {} bytes",
                    self.max_buf_size
                )));
            }
            self.buf.reserve(self.max_buf_size - self.buf.len());
        } else {
            self.buf.reserve(new_cap - self.buf.len());
        }
        Ok(())
    }
}

/// Writing half: encodes and sends commands.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Send pre-encoded bytes.
    pub async fn send_raw(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write_all(data).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Encode `name args…` and send it.
    pub async fn write_command(&mut self, name: &str, args: &[&str]) -> Result<()> {
        self.send_raw(&encode_named_command(name, args)).await
    }

    /// Shut down the write direction of the stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

// ── Tests ──────────────────────────────────────────────────────────
