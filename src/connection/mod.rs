pub mod framed;
pub mod pool;
pub mod tcp;

pub use framed::{FrameReader, FrameWriter};
pub use pool::{ConnectionPool, PoolDialer, PooledConnection};
pub use tcp::RedisConnection;

use crate::error::Result;
use crate::resp::types::RespValue;

use std::future::Future;
use std::sync::Arc;

/// A request/response connection, as used to talk to a Sentinel.
pub trait CommandConn: Send {
    /// Send one command and wait for its reply.
    fn execute_str(
        &mut self,
        args: &[&str],
    ) -> impl Future<Output = Result<RespValue>> + Send;

    /// `host:port` of the server on the other end.
    fn remote_addr(&self) -> String;
}

/// A pool of connections bound to one server address.
pub trait Pool: Send + Sync + 'static {
    /// Checked-out connection; dropping it returns it to the pool.
    type Conn: Send;

    /// Address every connection in this pool targets.
    fn addr(&self) -> &str;

    /// Execute a single command on a pooled connection.
    fn execute(&self, args: &[&str]) -> impl Future<Output = Result<RespValue>> + Send;

    /// Execute a batch of commands on one pooled connection.
    fn pipeline(
        &self,
        commands: &[Vec<String>],
    ) -> impl Future<Output = Result<Vec<RespValue>>> + Send;

    /// Check out a connection.
    fn get(self: Arc<Self>) -> impl Future<Output = Result<Self::Conn>> + Send;

    /// Stop handing out connections. Checked-out connections keep working.
    fn close(&self);
}

/// Builds a [`Pool`] for an address.
pub trait Dialer: Send + Sync + 'static {
    type Pool: Pool;

    fn dial(&self, addr: &str) -> impl Future<Output = Result<Arc<Self::Pool>>> + Send;
}
