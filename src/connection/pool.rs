//! Async connection pool for Redis connections.
//!
//! Uses a semaphore for max size control and a deque for idle connection reuse.
//! The idle queue uses `parking_lot::Mutex` (sync, held very briefly) so
//! connections can be returned in `Drop` without needing async.

use crate::config::{split_host_port, ConnectionConfig, DEFAULT_PORT};
use crate::connection::tcp::RedisConnection;
use crate::connection::{Dialer, Pool};
use crate::error::{HaError, Result};
use crate::resp::types::RespValue;
use crate::resp::writer::{encode_command_str, encode_pipeline};

use parking_lot::Mutex as SyncMutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// An async connection pool bound to a single server address.
pub struct ConnectionPool {
    /// Idle connections ready for reuse (sync mutex, held very briefly).
    idle: SyncMutex<VecDeque<RedisConnection>>,
    /// Semaphore limiting total checked-out connections; closed by `close`.
    semaphore: Arc<Semaphore>,
    config: ConnectionConfig,
    addr: String,
    max_size: usize,
    /// How long a connection can be idle before being dropped.
    idle_timeout: Duration,
}

impl ConnectionPool {
    /// Create a new connection pool from config. No connection is opened yet.
    pub fn new(config: ConnectionConfig) -> Self {
        let max_size = config.pool_size;
        let idle_timeout = Duration::from_millis(config.idle_timeout_ms);
        Self {
            idle: SyncMutex::new(VecDeque::with_capacity(max_size)),
            semaphore: Arc::new(Semaphore::new(max_size)),
            addr: config.primary_addr(),
            config,
            max_size,
            idle_timeout,
        }
    }

    /// Return the configured max pool size.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    /// Wait for a free slot and hand back a connection for it.
    async fn checkout(&self) -> Result<(RedisConnection, OwnedSemaphorePermit)> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| {
                HaError::Connection(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    format!("pool for {} is closed", self.addr),
                ))
            })?;

        let conn = {
            let mut idle = self.idle.lock();
            self.take_healthy_connection(&mut idle)
        };

        let conn = match conn {
            Some(c) => c,
            None => self.create_connection().await?,
        };
        Ok((conn, permit))
    }

    /// Create a new connection using the pool's config.
    async fn create_connection(&self) -> Result<RedisConnection> {
        if self.config.tls {
            return Err(HaError::Protocol(
                "TLS connections (rediss://) are not supported".into(),
            ));
        }

        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let mut conn = RedisConnection::connect_timeout_with_max_buf(
            &self.addr,
            timeout,
            self.config.max_buffer_size,
        )
        .await?;

        conn.set_read_timeout(self.config.read_timeout_ms);

        conn.init(
            self.config.username.as_deref(),
            self.config.password.as_deref(),
            self.config.db,
        )
        .await?;

        Ok(conn)
    }

    /// Number of idle connections, for introspection.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Free checkout slots; zero once closed.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Take a healthy connection from the idle queue (LIFO for cache warmth).
    fn take_healthy_connection(
        &self,
        idle: &mut VecDeque<RedisConnection>,
    ) -> Option<RedisConnection> {
        while let Some(conn) = idle.pop_back() {
            if conn.last_used.elapsed() > self.idle_timeout {
                continue;
            }
            return Some(conn);
        }
        None
    }

    /// Return a connection to the pool (sync, safe for Drop).
    fn return_connection(&self, conn: RedisConnection) {
        if self.is_closed() || conn.last_used.elapsed() > self.idle_timeout {
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < self.max_size {
            idle.push_back(conn);
        }
    }
}

impl Pool for ConnectionPool {
    type Conn = PooledConnection;

    fn addr(&self) -> &str {
        &self.addr
    }

    async fn execute(&self, args: &[&str]) -> Result<RespValue> {
        let (mut conn, _permit) = self.checkout().await?;
        let cmd = encode_command_str(args);
        conn.send_raw(&cmd).await?;
        // On error the connection is dropped rather than returned.
        let resp = conn.read_response().await?;
        self.return_connection(conn);
        Ok(resp)
    }

    async fn pipeline(&self, commands: &[Vec<String>]) -> Result<Vec<RespValue>> {
        let (mut conn, _permit) = self.checkout().await?;
        conn.send_raw(&encode_pipeline(commands)).await?;

        let mut responses = Vec::with_capacity(commands.len());
        for _ in commands {
            responses.push(conn.read_response().await?);
        }
        self.return_connection(conn);
        Ok(responses)
    }

    async fn get(self: Arc<Self>) -> Result<PooledConnection> {
        let (conn, permit) = self.checkout().await?;
        Ok(PooledConnection {
            conn: Some(conn),
            pool: self,
            _permit: permit,
        })
    }

    fn close(&self) {
        self.semaphore.close();
        self.idle.lock().clear();
    }
}

/// RAII guard that returns the connection to its pool on drop.
pub struct PooledConnection {
    conn: Option<RedisConnection>,
    pool: Arc<ConnectionPool>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// Access the underlying connection.
    pub fn conn(&mut self) -> &mut RedisConnection {
        self.conn.as_mut().expect("connection already taken")
    }

    /// Address of the pool this connection came from.
    pub fn pool_addr(&self) -> &str {
        &self.pool.addr
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.return_connection(conn);
        }
    }
}

/// Production [`Dialer`]: one [`ConnectionPool`] per master address.
#[derive(Debug, Clone)]
pub struct PoolDialer {
    /// Template for every pool; host and port are replaced per dial.
    pub config: ConnectionConfig,
}

impl PoolDialer {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }
}

impl Dialer for PoolDialer {
    type Pool = ConnectionPool;

    /// Build a pool for `addr` and open one connection to prove it is
    /// reachable; that connection stays idle in the pool.
    async fn dial(&self, addr: &str) -> Result<Arc<ConnectionPool>> {
        let (host, port) = split_host_port(addr, DEFAULT_PORT)?;
        let mut cfg = self.config.clone();
        cfg.host = host;
        cfg.port = port;

        let pool = Arc::new(ConnectionPool::new(cfg));
        drop(Arc::clone(&pool).get().await?);
        Ok(pool)
    }
}

// ── Tests ──────────────────────────────────────────────────────────
