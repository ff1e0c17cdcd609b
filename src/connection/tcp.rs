//! Async TCP connection to a Redis server or Sentinel.
//!
//! Pairs a [`FrameReader`] and [`FrameWriter`] over the two halves of a
//! `tokio::net::TcpStream` for request/response use. A connection can be
//! taken apart with [`RedisConnection::into_parts`] to hand the halves to a
//! subscription multiplexer.

use crate::connection::framed::{FrameReader, FrameWriter, DEFAULT_MAX_BUF_SIZE};
use crate::connection::CommandConn;
use crate::error::{HaError, Result};
use crate::resp::types::RespValue;
use crate::resp::writer::encode_command_str;

use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// A single async connection to a Redis server.
pub struct RedisConnection {
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
    peer: SocketAddr,
    /// Timestamp of last successful I/O (for idle checks).
    pub last_used: Instant,
}

impl RedisConnection {
    /// Connect to `addr` (e.g. "127.0.0.1:6379").
    pub async fn connect(addr: &str) -> Result<Self> {
        Self::connect_with_max_buf(addr, DEFAULT_MAX_BUF_SIZE).await
    }

    /// Connect with a configurable max buffer size.
    pub async fn connect_with_max_buf(addr: &str, max_buf_size: usize) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true).ok();
        let peer = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: FrameReader::with_max_buf(read_half, max_buf_size),
            writer: FrameWriter::new(write_half),
            peer,
            last_used: Instant::now(),
        })
    }

    /// Connect with a timeout.
    pub async fn connect_timeout(addr: &str, timeout: Duration) -> Result<Self> {
        Self::connect_timeout_with_max_buf(addr, timeout, DEFAULT_MAX_BUF_SIZE).await
    }

    /// Connect with a timeout and configurable max buffer size.
    pub async fn connect_timeout_with_max_buf(
        addr: &str,
        timeout: Duration,
        max_buf_size: usize,
    ) -> Result<Self> {
        match tokio::time::timeout(timeout, Self::connect_with_max_buf(addr, max_buf_size)).await {
            Ok(result) => result,
            Err(_) => Err(HaError::Timeout(format!(
                "connection to {addr} timed out after {timeout:?}"
            ))),
        }
    }

    /// Set the read timeout in milliseconds (0 disables it).
    pub fn set_read_timeout(&mut self, timeout_ms: u64) {
        self.reader
            .set_read_timeout(Some(Duration::from_millis(timeout_ms)));
    }

    /// Address of the server on the other end.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Send raw bytes to the server.
    pub async fn send_raw(&mut self, data: &[u8]) -> Result<()> {
        self.writer.send_raw(data).await?;
        self.last_used = Instant::now();
        Ok(())
    }

    /// Read and parse one complete RESP value from the server.
    pub async fn read_response(&mut self) -> Result<RespValue> {
        let value = self.reader.read_frame().await?;
        self.last_used = Instant::now();
        Ok(value)
    }

    /// Send a command (string args) and read the response.
    pub async fn execute_str(&mut self, args: &[&str]) -> Result<RespValue> {
        let cmd = encode_command_str(args);
        self.send_raw(&cmd).await?;
        self.read_response().await
    }

    /// Perform AUTH handshake.
    pub async fn auth(&mut self, username: Option<&str>, password: &str) -> Result<()> {
        let response = match username {
            Some(user) => self.execute_str(&["AUTH", user, password]).await?,
            None => self.execute_str(&["AUTH", password]).await?,
        };
        expect_ok("AUTH", response)
    }

    /// Select a database index.
    pub async fn select_db(&mut self, db: u16) -> Result<()> {
        if db == 0 {
            return Ok(());
        }
        let db_str = db.to_string();
        let response = self.execute_str(&["SELECT", &db_str]).await?;
        expect_ok("SELECT", response)
    }

    /// Initialize the connection with auth and db select.
    pub async fn init(
        &mut self,
        username: Option<&str>,
        password: Option<&str>,
        db: u16,
    ) -> Result<()> {
        if let Some(pass) = password {
            self.auth(username, pass).await?;
        }
        self.select_db(db).await?;
        Ok(())
    }

    /// Split into the framed halves, e.g. for a subscription multiplexer.
    pub fn into_parts(self) -> (FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>) {
        (self.reader, self.writer)
    }
}

impl CommandConn for RedisConnection {
    async fn execute_str(&mut self, args: &[&str]) -> Result<RespValue> {
        RedisConnection::execute_str(self, args).await
    }

    fn remote_addr(&self) -> String {
        self.peer.to_string()
    }
}

fn expect_ok(command: &str, response: RespValue) -> Result<()> {
    match response {
        RespValue::SimpleString(ref s) if s == "OK" => Ok(()),
        RespValue::Error(msg) | RespValue::BulkError(msg) => Err(HaError::redis(msg)),
        other => Err(HaError::Protocol(format!(
            "unexpected {command} response: {:?}",
            other.type_name()
        ))),
    }
}

// ── Tests ──────────────────────────────────────────────────────────
