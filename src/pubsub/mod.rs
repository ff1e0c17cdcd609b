//! Publish/subscribe over a dedicated connection.

pub mod message;
pub mod subconn;

pub use message::{classify, Classified, Message};
pub use subconn::{SubConn, Subscriptions};
