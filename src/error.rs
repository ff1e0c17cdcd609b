use std::fmt;
use std::io;

/// Structured Redis error kinds for programmatic matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedisErrorKind {
    /// Generic ERR
    Err,
    /// WRONGTYPE Operation against a key holding the wrong kind of value
    WrongType,
    /// LOADING Redis is loading the dataset in memory
    Loading,
    /// READONLY You can't write against a read only replica
    ReadOnly,
    /// MASTERDOWN Link with MASTER is down
    MasterDown,
    /// NOAUTH Authentication required
    NoAuth,
    /// Any other Redis error prefix
    Other(String),
}

impl RedisErrorKind {
    /// Parse from a Redis error message string (e.g. "READONLY You can't…").
    pub fn from_error_msg(msg: &str) -> (Self, String) {
        let kind = if msg.starts_with("WRONGTYPE") {
            Self::WrongType
        } else if msg.starts_with("LOADING") {
            Self::Loading
        } else if msg.starts_with("READONLY") {
            Self::ReadOnly
        } else if msg.starts_with("MASTERDOWN") {
            Self::MasterDown
        } else if msg.starts_with("NOAUTH") {
            Self::NoAuth
        } else if msg.starts_with("ERR") {
            Self::Err
        } else {
            let prefix = msg.split_whitespace().next().unwrap_or("UNKNOWN");
            Self::Other(prefix.to_string())
        };
        (kind, msg.to_string())
    }
}

/// All error variants for rsedis-ha.
#[derive(Debug)]
pub enum HaError {
    /// TCP / IO level errors
    Connection(io::Error),
    /// RESP protocol parse errors and malformed pub/sub frames
    Protocol(String),
    /// RESP parser needs more data; not a real error, used as control flow.
    Incomplete,
    /// Redis returned an error string with structured kind
    Redis {
        kind: RedisErrorKind,
        message: String,
    },
    /// Operation timed out
    Timeout(String),
    /// Sentinel errors (malformed reply, no master pool, etc.)
    Sentinel(String),
    /// The connection or multiplexer has shut down.
    Closed,
}

impl HaError {
    /// Create a Redis error from a raw error message, auto-parsing the kind.
    pub fn redis(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        let (kind, message) = RedisErrorKind::from_error_msg(&msg);
        Self::Redis { kind, message }
    }

    /// True for errors a reader should treat as "nothing arrived yet".
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Connection(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

impl fmt::Display for HaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "connection error: {e}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Incomplete => write!(f, "incomplete RESP message"),
            Self::Redis { message, .. } => write!(f, "redis error: {message}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Sentinel(msg) => write!(f, "sentinel error: {msg}"),
            Self::Closed => write!(f, "connection closed"),
        }
    }
}

impl std::error::Error for HaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for HaError {
    fn from(e: io::Error) -> Self {
        Self::Connection(e)
    }
}

pub type Result<T> = std::result::Result<T, HaError>;

// ── Tests ──────────────────────────────────────────────────────────
