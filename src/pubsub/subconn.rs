//! Subscription connection multiplexer.
//!
//! A connection in subscribed mode carries two interleaved streams: replies
//! to the (P)SUBSCRIBE / (P)UNSUBSCRIBE / PING commands we send, and
//! `message` / `pmessage` pushes. [`SubConn`] runs one read task per
//! connection that splits them: pushes go to a bounded [`Message`] queue,
//! replies complete the oldest outstanding command.
//!
//! Commands may be issued from any number of tasks. Each one parks a
//! completion token in a single-slot queue before writing, so the order
//! tokens are taken matches the order commands reached the wire, which is
//! the order the server acknowledges them in.

use crate::config::ConnectionConfig;
use crate::connection::framed::{FrameReader, FrameWriter};
use crate::connection::tcp::RedisConnection;
use crate::error::{HaError, Result};
use crate::pubsub::message::{
    classify, subscription_change, Classified, Message, SubscriptionChange,
};
use crate::resp::types::RespValue;

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};

type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;
type SharedWriter = Arc<tokio::sync::Mutex<FrameWriter<BoxedWrite>>>;

/// Commands written but not yet acknowledged, beyond the one in flight.
const PENDING_CAPACITY: usize = 1;

/// Messages decoded but not yet taken by the consumer.
const OUTPUT_CAPACITY: usize = 1;

/// Channels and patterns the server has acknowledged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subscriptions {
    pub channels: BTreeSet<String>,
    pub patterns: BTreeSet<String>,
}

/// How many acknowledgments a command produces.
#[derive(Debug, Clone, Copy)]
enum Expect {
    Acks(usize),
    /// Bare UNSUBSCRIBE: one per channel subscribed when it is answered.
    AllChannels,
    /// Bare PUNSUBSCRIBE: one per pattern subscribed when it is answered.
    AllPatterns,
}

struct PendingCommand {
    expect: Expect,
    reply: oneshot::Sender<Result<RespValue>>,
}

/// The command whose acknowledgments are currently arriving.
struct InFlight {
    remaining: usize,
    reply: oneshot::Sender<Result<RespValue>>,
}

#[derive(Default)]
struct Shared {
    last_error: Mutex<Option<Arc<HaError>>>,
    subscriptions: Mutex<Subscriptions>,
    closed: AtomicBool,
}

/// A connection in subscribed mode.
///
/// Created together with the receiving end of its message queue. The queue
/// closes once the read task stops, whether through [`SubConn::close`], an
/// I/O or protocol failure, or the `SubConn` being dropped. After that,
/// [`SubConn::err`] tells the cases apart.
pub struct SubConn {
    writer: SharedWriter,
    pending: mpsc::Sender<PendingCommand>,
    close_tx: watch::Sender<bool>,
    shared: Arc<Shared>,
}

impl SubConn {
    /// Wrap a duplex byte stream. `poll_interval` bounds each read; an
    /// expired read is not an error, it only gives the read task a chance
    /// to notice a close request.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<S>(stream: S, poll_interval: Duration) -> (Self, mpsc::Receiver<Message>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = FrameReader::new(read_half);
        reader.set_read_timeout(Some(poll_interval));
        Self::from_parts(reader, FrameWriter::new(write_half))
    }

    /// Take over an established connection.
    pub fn from_connection(
        conn: RedisConnection,
        poll_interval: Duration,
    ) -> (Self, mpsc::Receiver<Message>) {
        let (mut reader, writer) = conn.into_parts();
        reader.set_read_timeout(Some(poll_interval));
        Self::from_parts(reader, writer)
    }

    /// Connect to `config.primary_addr()`, authenticate, and enter
    /// subscription mode. For a sentinel URL this is the first sentinel,
    /// whose event channels (`+switch-master`, …) can then be subscribed to.
    pub async fn connect(config: &ConnectionConfig) -> Result<(Self, mpsc::Receiver<Message>)> {
        if config.tls {
            return Err(HaError::Protocol(
                "TLS connections (rediss://) are not supported".into(),
            ));
        }
        let addr = config.primary_addr();
        let mut conn = RedisConnection::connect_timeout_with_max_buf(
            &addr,
            Duration::from_millis(config.connect_timeout_ms),
            config.max_buffer_size,
        )
        .await?;
        conn.set_read_timeout(config.read_timeout_ms);
        conn.init(
            config.username.as_deref(),
            config.password.as_deref(),
            config.db,
        )
        .await?;

        tracing::debug!(%addr, "subscription connection established");
        Ok(Self::from_connection(
            conn,
            Duration::from_millis(config.pubsub_poll_ms),
        ))
    }

    /// Start the read task over already-framed halves. The reader's own
    /// read timeout is used as the poll interval.
    pub fn from_parts<R, W>(
        reader: FrameReader<R>,
        writer: FrameWriter<W>,
    ) -> (Self, mpsc::Receiver<Message>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let boxed: BoxedWrite = Box::new(writer.into_inner());
        let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(FrameWriter::new(boxed)));
        let (pending_tx, pending_rx) = mpsc::channel(PENDING_CAPACITY);
        let (out_tx, out_rx) = mpsc::channel(OUTPUT_CAPACITY);
        let (close_tx, close_rx) = watch::channel(false);
        let shared = Arc::new(Shared::default());

        let read_loop = ReadLoop {
            reader,
            writer: Arc::clone(&writer),
            pending: pending_rx,
            current: None,
            out: out_tx,
            close: close_rx,
            shared: Arc::clone(&shared),
        };
        tokio::spawn(read_loop.run());

        let conn = Self {
            writer,
            pending: pending_tx,
            close_tx,
            shared,
        };
        (conn, out_rx)
    }

    /// Subscribe to `channels`. Returns once every channel is acknowledged.
    pub async fn subscribe(&self, channels: &[&str]) -> Result<()> {
        let expect = Expect::Acks(channels.len());
        self.command("SUBSCRIBE", channels, expect).await.map(drop)
    }

    /// Subscribe to glob-style `patterns`.
    pub async fn psubscribe(&self, patterns: &[&str]) -> Result<()> {
        let expect = Expect::Acks(patterns.len());
        self.command("PSUBSCRIBE", patterns, expect).await.map(drop)
    }

    /// Unsubscribe from `channels`, or from every channel when empty.
    pub async fn unsubscribe(&self, channels: &[&str]) -> Result<()> {
        let expect = if channels.is_empty() {
            Expect::AllChannels
        } else {
            Expect::Acks(channels.len())
        };
        self.command("UNSUBSCRIBE", channels, expect).await.map(drop)
    }

    /// Unsubscribe from `patterns`, or from every pattern when empty.
    pub async fn punsubscribe(&self, patterns: &[&str]) -> Result<()> {
        let expect = if patterns.is_empty() {
            Expect::AllPatterns
        } else {
            Expect::Acks(patterns.len())
        };
        self.command("PUNSUBSCRIBE", patterns, expect).await.map(drop)
    }

    /// Round-trip a PING through the connection.
    pub async fn ping(&self) -> Result<()> {
        self.command("PING", &[], Expect::Acks(1)).await.map(drop)
    }

    /// Ask the read task to stop. Idempotent; returns immediately.
    pub fn close(&self) {
        self.close_tx.send_replace(true);
    }

    /// The failure that stopped the read task, if any. `None` after a
    /// requested close. Only meaningful once the message queue has closed.
    pub fn err(&self) -> Option<Arc<HaError>> {
        self.shared.last_error.lock().clone()
    }

    /// Whether the read task has stopped.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Snapshot of the acknowledged channels and patterns.
    pub fn subscriptions(&self) -> Subscriptions {
        self.shared.subscriptions.lock().clone()
    }

    /// Register a completion token, write the command, wait for its last
    /// acknowledgment.
    ///
    /// Dropping the returned future after the token is queued but before
    /// the reply arrives desynchronises the connection; close it instead.
    async fn command(&self, name: &str, args: &[&str], expect: Expect) -> Result<RespValue> {
        let (reply, done) = oneshot::channel();
        self.pending
            .send(PendingCommand { expect, reply })
            .await
            .map_err(|_| HaError::Closed)?;

        let written = self.writer.lock().await.write_command(name, args).await;
        if let Err(err) = written {
            tracing::warn!(command = name, error = %err, "subscription write failed");
            self.close();
            return Err(err);
        }

        done.await.map_err(|_| HaError::Closed)?
    }
}

impl Drop for SubConn {
    fn drop(&mut self) {
        self.close();
    }
}

// ── Read task ──────────────────────────────────────────────────────

struct ReadLoop<R> {
    reader: FrameReader<R>,
    writer: SharedWriter,
    pending: mpsc::Receiver<PendingCommand>,
    current: Option<InFlight>,
    out: mpsc::Sender<Message>,
    close: watch::Receiver<bool>,
    shared: Arc<Shared>,
}

/// Resolves once a close is requested or the [`SubConn`] is gone.
async fn close_requested(close: &mut watch::Receiver<bool>) {
    let _ = close.wait_for(|closed| *closed).await;
}

impl<R: AsyncRead + Unpin + Send + 'static> ReadLoop<R> {
    async fn run(mut self) {
        tracing::debug!("subscription read loop started");
        match self.serve().await {
            Ok(()) => tracing::debug!("subscription read loop stopped"),
            Err(err) => {
                tracing::warn!(error = %err, "subscription connection failed");
                *self.shared.last_error.lock() = Some(Arc::new(err));
            }
        }
        self.shared.closed.store(true, Ordering::Release);

        // Dropping the reply senders completes every waiting command with
        // `Closed`; closing the queue turns away new ones.
        self.current = None;
        self.pending.close();
        while self.pending.try_recv().is_ok() {}

        // A writer still held means a command is mid-write; the stream
        // closes when both halves drop.
        if let Ok(mut writer) = self.writer.try_lock() {
            if let Err(err) = writer.shutdown().await {
                tracing::debug!(error = %err, "subscription shutdown failed");
            }
        }
        // `self.out` drops here, after `last_error` is set.
    }

    async fn serve(&mut self) -> Result<()> {
        loop {
            let frame = tokio::select! {
                biased;
                _ = close_requested(&mut self.close) => return Ok(()),
                frame = self.reader.read_frame() => frame,
            };
            let frame = match frame {
                Ok(frame) => frame,
                Err(err) if err.is_timeout() => continue,
                Err(err) => return Err(err),
            };

            match classify(frame)? {
                Classified::Push(message) => {
                    tokio::select! {
                        biased;
                        _ = close_requested(&mut self.close) => return Ok(()),
                        sent = self.out.send(message) => {
                            if sent.is_err() {
                                tracing::debug!("message receiver dropped");
                                return Ok(());
                            }
                        }
                    }
                }
                Classified::Ack(frame) => self.acknowledge(frame)?,
            }
        }
    }

    fn acknowledge(&mut self, frame: RespValue) -> Result<()> {
        let mut in_flight = match self.current.take() {
            Some(in_flight) => in_flight,
            None => {
                let command = self.pending.try_recv().map_err(|_| {
                    HaError::Protocol("acknowledgment with no pending command".into())
                })?;
                let remaining = {
                    let subs = self.shared.subscriptions.lock();
                    match command.expect {
                        Expect::Acks(n) => n,
                        Expect::AllChannels => subs.channels.len(),
                        Expect::AllPatterns => subs.patterns.len(),
                    }
                };
                InFlight {
                    remaining: remaining.max(1),
                    reply: command.reply,
                }
            }
        };

        // An error ends the command however many acks it was owed.
        if let Some(msg) = frame.as_error_msg() {
            let _ = in_flight.reply.send(Err(HaError::redis(msg)));
            return Ok(());
        }

        self.track(&frame);
        in_flight.remaining -= 1;
        if in_flight.remaining == 0 {
            let _ = in_flight.reply.send(Ok(frame));
        } else {
            self.current = Some(in_flight);
        }
        Ok(())
    }

    fn track(&self, frame: &RespValue) {
        let Some((change, Some(name))) = subscription_change(frame) else {
            return;
        };
        let mut subs = self.shared.subscriptions.lock();
        match change {
            SubscriptionChange::Subscribe => {
                subs.channels.insert(name.to_string());
            }
            SubscriptionChange::Unsubscribe => {
                subs.channels.remove(name);
            }
            SubscriptionChange::PSubscribe => {
                subs.patterns.insert(name.to_string());
            }
            SubscriptionChange::PUnsubscribe => {
                subs.patterns.remove(name);
            }
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

    const POLL: Duration = Duration::from_millis(20);

    struct Server {
        reader: FrameReader<ReadHalf<DuplexStream>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl Server {
        async fn command(&mut self) -> Vec<String> {
            match self.reader.read_frame().await.unwrap() {
                RespValue::Array(items) => items
                    .iter()
                    .map(|v| v.as_str().unwrap().to_string())
                    .collect(),
                other => panic!("expected command array, got {other:?}"),
            }
        }

        async fn send(&mut self, data: &[u8]) {
            self.writer.write_all(data).await.unwrap();
        }
    }

    fn pair() -> (SubConn, mpsc::Receiver<Message>, Server) {
        let (client, server) = tokio::io::duplex(4096);
        let (conn, rx) = SubConn::new(client, POLL);
        let (r, w) = tokio::io::split(server);
        let server = Server {
            reader: FrameReader::new(r),
            writer: w,
        };
        (conn, rx, server)
    }

    #[tokio::test]
    async fn unsolicited_ack_is_fatal() {
        let (conn, mut rx, mut server) = pair();
        server.send(b"+PONG\r\n").await;

        assert!(rx.recv().await.is_none());
        let err = conn.err().expect("error recorded");
        assert!(matches!(*err, HaError::Protocol(ref m) if m.contains("no pending command")));
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn bare_unsubscribe_waits_for_every_channel() {
        let (conn, _rx, mut server) = pair();
        let conn = Arc::new(conn);

        let c = Arc::clone(&conn);
        let sub = tokio::spawn(async move { c.subscribe(&["a", "b"]).await });
        assert_eq!(server.command().await, ["SUBSCRIBE", "a", "b"]);
        server
            .send(b"*3\r\n$9\r\nsubscribe\r\n$1\r\na\r\n:1\r\n*3\r\n$9\r\nsubscribe\r\n$1\r\nb\r\n:2\r\n")
            .await;
        sub.await.unwrap().unwrap();
        assert_eq!(conn.subscriptions().channels.len(), 2);

        let c = Arc::clone(&conn);
        let unsub = tokio::spawn(async move { c.unsubscribe(&[]).await });
        assert_eq!(server.command().await, ["UNSUBSCRIBE"]);
        server
            .send(b"*3\r\n$11\r\nunsubscribe\r\n$1\r\na\r\n:1\r\n")
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!unsub.is_finished());
        server
            .send(b"*3\r\n$11\r\nunsubscribe\r\n$1\r\nb\r\n:0\r\n")
            .await;
        unsub.await.unwrap().unwrap();
        assert!(conn.subscriptions().channels.is_empty());
    }

    #[tokio::test]
    async fn bare_unsubscribe_with_nothing_subscribed() {
        let (conn, _rx, mut server) = pair();
        let conn = Arc::new(conn);

        let c = Arc::clone(&conn);
        let unsub = tokio::spawn(async move { c.unsubscribe(&[]).await });
        server.command().await;
        server.send(b"*3\r\n$11\r\nunsubscribe\r\n_\r\n:0\r\n").await;
        unsub.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn error_reply_fails_command_only() {
        let (conn, _rx, mut server) = pair();
        let conn = Arc::new(conn);

        let c = Arc::clone(&conn);
        let sub = tokio::spawn(async move { c.subscribe(&["a", "b"]).await });
        server.command().await;
        server.send(b"-NOPERM no access to channel\r\n").await;
        let err = sub.await.unwrap().unwrap_err();
        assert!(matches!(err, HaError::Redis { .. }));

        let c = Arc::clone(&conn);
        let ping = tokio::spawn(async move { c.ping().await });
        assert_eq!(server.command().await, ["PING"]);
        server.send(b"*2\r\n$4\r\npong\r\n$0\r\n\r\n").await;
        ping.await.unwrap().unwrap();
        assert!(conn.err().is_none());
    }

    #[tokio::test]
    async fn dropping_conn_stops_read_loop() {
        let (conn, mut rx, _server) = pair();
        drop(conn);
        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
        assert!(matches!(got, Ok(None)));
    }
}
