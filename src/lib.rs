//! High-availability building blocks for Redis clients.
//!
//! * [`pubsub::SubConn`] multiplexes subscription commands and published
//!   messages over one connection.
//! * [`sentinel::SentinelClient`] keeps a connection pool pointed at the
//!   master Sentinel currently reports, swapping pools on failover.

pub mod config;
pub mod connection;
pub mod error;
pub mod pubsub;
pub mod resp;
pub mod router;
pub mod sentinel;

pub use config::ConnectionConfig;
pub use error::{HaError, Result};
pub use pubsub::{Message, SubConn};
pub use router::Router;
pub use sentinel::SentinelClient;
