//! Decoding of `SENTINEL MASTER` / `SENTINEL SENTINELS` replies.
//!
//! Sentinel describes each node as a field map: a flat `[key, value, …]`
//! array under RESP2, a map under RESP3.

use crate::config::join_host_port;
use crate::error::{HaError, Result};
use crate::resp::types::RespValue;

use std::collections::HashMap;

fn malformed(what: &str) -> HaError {
    HaError::Sentinel(format!("malformed {what} response"))
}

fn scalar(value: &RespValue) -> Option<String> {
    match value {
        RespValue::Integer(n) => Some(n.to_string()),
        other => other.as_str().map(str::to_string),
    }
}

/// Collect a field map. Non-scalar values (nested arrays, nulls) are skipped.
pub fn field_map(value: &RespValue, what: &str) -> Result<HashMap<String, String>> {
    let mut fields = HashMap::new();
    match value {
        RespValue::Array(items) => {
            if items.len() % 2 != 0 {
                return Err(malformed(what));
            }
            for pair in items.chunks_exact(2) {
                let key = pair[0].as_str().ok_or_else(|| malformed(what))?;
                if let Some(v) = scalar(&pair[1]) {
                    fields.insert(key.to_string(), v);
                }
            }
        }
        RespValue::Map(entries) => {
            for (k, v) in entries {
                let key = k.as_str().ok_or_else(|| malformed(what))?;
                if let Some(v) = scalar(v) {
                    fields.insert(key.to_string(), v);
                }
            }
        }
        _ => return Err(malformed(what)),
    }
    Ok(fields)
}

/// `ip:port` from a node's field map. Both fields must be present and
/// non-empty.
pub fn node_addr(fields: &HashMap<String, String>, what: &str) -> Result<String> {
    let ip = fields.get("ip").filter(|s| !s.is_empty());
    let port = fields.get("port").filter(|s| !s.is_empty());
    match (ip, port) {
        (Some(ip), Some(port)) => {
            let port: u16 = port.parse().map_err(|_| malformed(what))?;
            Ok(join_host_port(ip, port))
        }
        _ => Err(malformed(what)),
    }
}

fn reject_error(reply: &RespValue) -> Result<()> {
    match reply.as_error_msg() {
        Some(msg) => Err(HaError::redis(msg)),
        None => Ok(()),
    }
}

/// Master address from a `SENTINEL MASTER <name>` reply.
pub fn master_addr(reply: &RespValue) -> Result<String> {
    const WHAT: &str = "SENTINEL MASTER";
    reject_error(reply)?;
    let fields = field_map(reply, WHAT)?;
    node_addr(&fields, WHAT)
}

/// Peer addresses from a `SENTINEL SENTINELS <name>` reply. One bad entry
/// rejects the whole reply.
pub fn sentinel_addrs(reply: &RespValue) -> Result<Vec<String>> {
    const WHAT: &str = "SENTINEL SENTINELS";
    reject_error(reply)?;
    let RespValue::Array(nodes) = reply else {
        return Err(malformed(WHAT));
    };
    nodes
        .iter()
        .map(|node| node_addr(&field_map(node, WHAT)?, WHAT))
        .collect()
}

// ── Tests ──────────────────────────────────────────────────────────
