//! Shared helpers for integration tests.
//!
//! Most tests run against in-process fakes: a duplex stream standing in for
//! a subscription connection, and fake pools/dialers/sentinels for failover.
//! Live tests connect to a real Redis server at `REDIS_URL` (default
//! `redis://127.0.0.1:6379`) and are skipped when none is reachable.

#![allow(dead_code)]

use rsedis_ha::config::ConnectionConfig;
use rsedis_ha::connection::{CommandConn, Dialer, FrameReader, Pool, RedisConnection};
use rsedis_ha::error::{HaError, Result};
use rsedis_ha::pubsub::{Message, SubConn};
use rsedis_ha::resp::RespValue;

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Semaphore};

// ── Subscription fakes ─────────────────────────────────────────────

/// Server end of a duplex subscription connection.
pub struct FakeServer {
    reader: FrameReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl FakeServer {
    /// Next command the client wrote, as strings.
    pub async fn command(&mut self) -> Vec<String> {
        match self.reader.read_frame().await.expect("client command") {
            RespValue::Array(items) => items
                .iter()
                .map(|v| v.as_str().expect("string argument").to_string())
                .collect(),
            other => panic!("expected command array, got {other:?}"),
        }
    }

    /// Assert nothing arrives from the client for `wait`.
    pub async fn expect_silence(&mut self, wait: Duration) {
        self.reader.set_read_timeout(Some(wait));
        let result = self.reader.read_frame().await;
        self.reader.set_read_timeout(None);
        match result {
            Err(err) if err.is_timeout() => {}
            other => panic!("expected no traffic, got {other:?}"),
        }
    }

    pub async fn send(&mut self, data: &[u8]) {
        self.writer.write_all(data).await.expect("server write");
    }

    /// Send `[kind, name, count]`, the shape of a (un)subscribe reply.
    pub async fn ack(&mut self, kind: &str, name: &str, count: i64) {
        let frame = format!(
            "*3\r\n${}\r\n{kind}\r\n${}\r\n{name}\r\n:{count}\r\n",
            kind.len(),
            name.len()
        );
        self.send(frame.as_bytes()).await;
    }

    pub async fn message(&mut self, channel: &str, payload: &str) {
        let frame = format!(
            "*3\r\n$7\r\nmessage\r\n${}\r\n{channel}\r\n${}\r\n{payload}\r\n",
            channel.len(),
            payload.len()
        );
        self.send(frame.as_bytes()).await;
    }

    pub async fn pmessage(&mut self, pattern: &str, channel: &str, payload: &str) {
        let frame = format!(
            "*4\r\n$8\r\npmessage\r\n${}\r\n{pattern}\r\n${}\r\n{channel}\r\n${}\r\n{payload}\r\n",
            pattern.len(),
            channel.len(),
            payload.len()
        );
        self.send(frame.as_bytes()).await;
    }

    /// Close the server end.
    pub async fn hang_up(mut self) {
        self.writer.shutdown().await.ok();
    }
}

/// A multiplexer wired to a fake server.
pub fn sub_pair(poll: Duration) -> (Arc<SubConn>, mpsc::Receiver<Message>, FakeServer) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (conn, messages) = SubConn::new(client, poll);
    let (r, w) = tokio::io::split(server);
    let server = FakeServer {
        reader: FrameReader::new(r),
        writer: w,
    };
    (Arc::new(conn), messages, server)
}

// ── Failover fakes ─────────────────────────────────────────────────

pub fn bulk(s: &str) -> RespValue {
    RespValue::BulkString(Bytes::copy_from_slice(s.as_bytes()))
}

/// A flat RESP2 field map.
pub fn fields(pairs: &[(&str, &str)]) -> RespValue {
    RespValue::Array(pairs.iter().flat_map(|(k, v)| [bulk(k), bulk(v)]).collect())
}

/// Pool that answers every command with its own address.
pub struct FakePool {
    addr: String,
    closed: AtomicBool,
    /// When set, `execute` waits for a permit before answering.
    gate: Option<Arc<Semaphore>>,
}

impl FakePool {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Fails the way a closed `ConnectionPool` does.
    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(HaError::Connection(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                format!("pool for {} is closed", self.addr),
            )));
        }
        Ok(())
    }
}

impl Pool for FakePool {
    type Conn = String;

    fn addr(&self) -> &str {
        &self.addr
    }

    /// Waits on the gate first, like a checkout waiting for a free slot,
    /// then fails if the pool was closed in the meantime.
    async fn execute(&self, _args: &[&str]) -> Result<RespValue> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate").forget();
        }
        self.check_open()?;
        Ok(bulk(&self.addr))
    }

    async fn pipeline(&self, commands: &[Vec<String>]) -> Result<Vec<RespValue>> {
        self.check_open()?;
        Ok(commands.iter().map(|_| bulk(&self.addr)).collect())
    }

    async fn get(self: Arc<Self>) -> Result<String> {
        self.check_open()?;
        Ok(self.addr.clone())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Dialer that records every address it is asked for.
#[derive(Default)]
pub struct FakeDialer {
    pub dialed: Mutex<Vec<String>>,
    pub pools: Mutex<Vec<Arc<FakePool>>>,
    pub fail: AtomicBool,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl FakeDialer {
    /// Make `execute` on the pool for `addr` block until the returned
    /// semaphore gets a permit.
    pub fn gate(&self, addr: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.gates.lock().insert(addr.to_string(), Arc::clone(&gate));
        gate
    }

    pub fn dial_count(&self) -> usize {
        self.dialed.lock().len()
    }

    pub fn pool(&self, i: usize) -> Arc<FakePool> {
        Arc::clone(&self.pools.lock()[i])
    }
}

impl Dialer for FakeDialer {
    type Pool = FakePool;

    async fn dial(&self, addr: &str) -> Result<Arc<FakePool>> {
        self.dialed.lock().push(addr.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(HaError::Connection(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("refused: {addr}"),
            )));
        }
        let pool = Arc::new(FakePool {
            addr: addr.to_string(),
            closed: AtomicBool::new(false),
            gate: self.gates.lock().get(addr).cloned(),
        });
        self.pools.lock().push(Arc::clone(&pool));
        Ok(pool)
    }
}

/// Sentinel connection with canned replies.
pub struct FakeSentinel {
    pub remote: String,
    pub master: RespValue,
    pub sentinels: RespValue,
    pub commands: Vec<Vec<String>>,
}

impl FakeSentinel {
    pub fn new(remote: &str, ip: &str, port: &str) -> Self {
        Self {
            remote: remote.to_string(),
            master: fields(&[("name", "bucket0"), ("ip", ip), ("port", port)]),
            sentinels: RespValue::Array(vec![]),
            commands: Vec::new(),
        }
    }

    pub fn report_master(&mut self, ip: &str, port: &str) {
        self.master = fields(&[("ip", ip), ("port", port)]);
    }
}

impl CommandConn for FakeSentinel {
    async fn execute_str(&mut self, args: &[&str]) -> Result<RespValue> {
        self.commands
            .push(args.iter().map(|s| s.to_string()).collect());
        match args.get(1).map(|s| s.to_ascii_uppercase()).as_deref() {
            Some("MASTER") => Ok(self.master.clone()),
            Some("SENTINELS") => Ok(self.sentinels.clone()),
            _ => Ok(RespValue::Error("ERR unknown subcommand".into())),
        }
    }

    fn remote_addr(&self) -> String {
        self.remote.clone()
    }
}

// ── Mock TCP servers ───────────────────────────────────────────────

/// Redis stand-in that answers every command with `+PONG`.
pub async fn mock_redis() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (r, mut w) = socket.into_split();
                let mut reader = FrameReader::new(r);
                while reader.read_frame().await.is_ok() {
                    if w.write_all(b"+PONG\r\n").await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    addr
}

/// Sentinel stand-in reporting `master` for every name and no peers.
pub async fn mock_sentinel(master: String) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let master = master.clone();
            tokio::spawn(async move {
                let (host, port) = master.rsplit_once(':').unwrap();
                let master_reply = format!(
                    "*4\r\n$2\r\nip\r\n${}\r\n{host}\r\n$4\r\nport\r\n${}\r\n{port}\r\n",
                    host.len(),
                    port.len()
                );
                let (r, mut w) = socket.into_split();
                let mut reader = FrameReader::new(r);
                while let Ok(RespValue::Array(args)) = reader.read_frame().await {
                    let sub = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                    let out: &[u8] = if sub.eq_ignore_ascii_case("master") {
                        master_reply.as_bytes()
                    } else if sub.eq_ignore_ascii_case("sentinels") {
                        b"*0\r\n"
                    } else {
                        b"+OK\r\n"
                    };
                    if w.write_all(out).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    addr
}

// ── Live server ────────────────────────────────────────────────────

/// Configuration for the live test server, or `None` (test skipped) when
/// nothing answers there.
pub async fn live_config() -> Option<ConnectionConfig> {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
    let mut config = ConnectionConfig::from_url(&url).expect("invalid REDIS_URL");
    config.connect_timeout_ms = 500;

    let mut conn =
        RedisConnection::connect_timeout(&config.primary_addr(), Duration::from_millis(500))
            .await
            .ok()?;
    conn.init(config.username.as_deref(), config.password.as_deref(), config.db)
        .await
        .ok()?;
    match conn.execute_str(&["PING"]).await {
        Ok(RespValue::SimpleString(ref s)) if s == "PONG" => Some(config),
        _ => None,
    }
}

/// Unique channel name per test run.
pub fn test_channel(name: &str) -> String {
    format!("rsedis_ha_test_{}_{name}", std::process::id())
}
