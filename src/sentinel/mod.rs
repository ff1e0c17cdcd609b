//! Sentinel-managed master discovery and failover.

pub mod client;
pub mod reply;

pub use client::SentinelClient;
