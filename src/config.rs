//! Connection configuration and URL parsing.
//!
//! Supports the following URL schemes:
//! - `redis://[user:pass@]host[:port][/db]`  standalone
//! - `rediss://[user:pass@]host[:port][/db]`  standalone + TLS
//! - `redis+sentinel://[user:pass@]master@host[:port][,host[:port]…][/db]`

use crate::error::{HaError, Result};

/// Default Redis port.
pub const DEFAULT_PORT: u16 = 6379;
/// Default Redis Sentinel port.
pub const DEFAULT_SENTINEL_PORT: u16 = 26379;

/// How to connect to Redis.
#[derive(Debug, Clone, PartialEq)]
pub enum Topology {
    /// Single Redis server.
    Standalone,
    /// Master tracked through Sentinel. `sentinels` are `host:port` seeds.
    Sentinel {
        master_name: String,
        sentinels: Vec<String>,
    },
}

/// Full connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Primary host (for standalone) or first sentinel.
    pub host: String,
    /// Primary port.
    pub port: u16,
    /// Optional username (Redis 6+ ACL).
    pub username: Option<String>,
    /// Optional password.
    pub password: Option<String>,
    /// Database index (0-15).
    pub db: u16,
    /// Whether to use TLS.
    pub tls: bool,
    /// Topology mode.
    pub topology: Topology,
    /// Connection pool size.
    pub pool_size: usize,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Read/response timeout in milliseconds for pooled connections
    /// (0 = no timeout).
    pub read_timeout_ms: u64,
    /// Idle timeout in milliseconds (connections idle longer are dropped).
    pub idle_timeout_ms: u64,
    /// Maximum read buffer size per connection in bytes.
    pub max_buffer_size: usize,
    /// Read timeout of a subscription connection. Timeouts there are not
    /// errors; this only bounds how long a close request can go unnoticed.
    pub pubsub_poll_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            username: None,
            password: None,
            db: 0,
            tls: false,
            topology: Topology::Standalone,
            pool_size: 8,
            connect_timeout_ms: 5000,
            read_timeout_ms: 30_000,
            idle_timeout_ms: 300_000,
            max_buffer_size: crate::connection::framed::DEFAULT_MAX_BUF_SIZE,
            pubsub_poll_ms: 1000,
        }
    }
}

impl ConnectionConfig {
    /// Parse a Redis URL into a ConnectionConfig.
    pub fn from_url(url: &str) -> Result<Self> {
        let mut config = Self::default();

        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| HaError::Protocol(format!("invalid URL, missing ://: {url}")))?;

        match scheme {
            "redis" => {}
            "rediss" => config.tls = true,
            "redis+sentinel" | "redis+sentinels" => {
                config.tls = scheme == "redis+sentinels";
                parse_sentinel_url(&mut config, rest)?;
                return Ok(config);
            }
            _ => {
                return Err(HaError::Protocol(format!("unknown URL scheme: {scheme}")));
            }
        }

        parse_standalone_url(&mut config, rest)?;
        Ok(config)
    }

    /// Return the primary address as "host:port".
    pub fn primary_addr(&self) -> String {
        join_host_port(&self.host, self.port)
    }
}

/// Parse `[user:pass@]host[:port][/db]`
fn parse_standalone_url(config: &mut ConnectionConfig, rest: &str) -> Result<()> {
    let host_part = parse_db_suffix(config, rest)?;

    let host_port = match host_part.rsplit_once('@') {
        Some((userinfo, hp)) => {
            parse_userinfo(config, userinfo);
            hp
        }
        None => host_part,
    };

    (config.host, config.port) = split_host_port(host_port, DEFAULT_PORT)?;
    Ok(())
}

/// Parse `[user:pass@]master@sentinel1[:port][,sentinel2[:port]…][/db]`
fn parse_sentinel_url(config: &mut ConnectionConfig, rest: &str) -> Result<()> {
    let host_part = parse_db_suffix(config, rest)?;

    // The last '@' separates the master name from the hosts; anything
    // before an earlier '@' is credentials.
    let (before_hosts, hosts) = host_part.rsplit_once('@').ok_or_else(|| {
        HaError::Protocol(
            "sentinel URL must include master name: redis+sentinel://master@host:port".into(),
        )
    })?;
    let master_name = match before_hosts.rsplit_once('@') {
        Some((userinfo, master)) => {
            parse_userinfo(config, userinfo);
            master
        }
        None => before_hosts,
    };

    if master_name.is_empty() {
        return Err(HaError::Protocol("empty sentinel master name".into()));
    }

    let mut sentinels = Vec::new();
    for addr in hosts.split(',').map(str::trim).filter(|a| !a.is_empty()) {
        let (host, port) = split_host_port(addr, DEFAULT_SENTINEL_PORT)?;
        if sentinels.is_empty() {
            config.host = host.clone();
            config.port = port;
        }
        sentinels.push(join_host_port(&host, port));
    }

    if sentinels.is_empty() {
        return Err(HaError::Protocol(
            "sentinel URL must include at least one sentinel host".into(),
        ));
    }

    config.topology = Topology::Sentinel {
        master_name: master_name.to_string(),
        sentinels,
    };
    Ok(())
}

// ── Address helpers ────────────────────────────────────────────────

/// Strip a trailing `/db` into `config.db`, returning what precedes it.
fn parse_db_suffix<'a>(config: &mut ConnectionConfig, rest: &'a str) -> Result<&'a str> {
    match rest.split_once('/') {
        Some((before, db_str)) if !db_str.is_empty() => {
            config.db = db_str
                .parse()
                .map_err(|_| HaError::Protocol(format!("invalid db number: {db_str}")))?;
            Ok(before)
        }
        Some((before, _)) => Ok(before),
        None => Ok(rest),
    }
}

/// Parse `user:pass`, `:pass` or a bare password into config.
fn parse_userinfo(config: &mut ConnectionConfig, userinfo: &str) {
    let (user, pass) = userinfo.split_once(':').unwrap_or(("", userinfo));
    if !user.is_empty() {
        config.username = Some(user.to_string());
    }
    if !pass.is_empty() {
        config.password = Some(pass.to_string());
    }
}

/// Parse `host[:port]` or `[ipv6]:port`.
pub(crate) fn split_host_port(s: &str, default_port: u16) -> Result<(String, u16)> {
    let parse_port = |p: &str| {
        p.parse::<u16>()
            .map_err(|_| HaError::Protocol(format!("invalid port: {p}")))
    };

    let (host, port) = if let Some(bracketed) = s.strip_prefix('[') {
        let (host, after) = bracketed
            .split_once(']')
            .ok_or_else(|| HaError::Protocol(format!("unclosed IPv6 bracket: {s}")))?;
        let port = match after.strip_prefix(':') {
            Some(p) => parse_port(p)?,
            None => default_port,
        };
        (host.to_string(), port)
    } else if let Some((h, p)) = s.rsplit_once(':') {
        match p.parse::<u16>() {
            Ok(port) => (h.to_string(), port),
            // Bare IPv6 without brackets.
            Err(_) if h.contains(':') => (s.to_string(), default_port),
            Err(_) => return Err(HaError::Protocol(format!("invalid port: {p}"))),
        }
    } else {
        (s.to_string(), default_port)
    };

    if host.is_empty() {
        return Ok(("127.0.0.1".to_string(), port));
    }
    Ok((host, port))
}

/// Format `host:port`, bracketing IPv6 hosts.
pub(crate) fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

// ── Tests ──────────────────────────────────────────────────────────
