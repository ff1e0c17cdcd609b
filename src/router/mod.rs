use crate::error::Result;
use crate::resp::types::RespValue;

use std::future::Future;

/// Sends commands to whichever server currently owns the data.
///
/// [`crate::SentinelClient`] is the implementation here: it routes to the
/// master Sentinel last reported.
pub trait Router: Send + Sync {
    /// Run one command and return its reply.
    fn execute(&self, args: &[&str]) -> impl Future<Output = Result<RespValue>> + Send;

    /// Run a batch of commands on one connection, replies in order.
    fn pipeline(
        &self,
        commands: &[Vec<String>],
    ) -> impl Future<Output = Result<Vec<RespValue>>> + Send;
}
