use bytes::Bytes;

/// RESP protocol values understood by the pub/sub and sentinel layers.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// +OK\r\n
    SimpleString(String),
    /// -ERR message\r\n
    Error(String),
    /// :1000\r\n
    Integer(i64),
    /// $6\r\nfoobar\r\n
    BulkString(Bytes),
    /// *2\r\n…
    Array(Vec<RespValue>),
    /// $-1\r\n  or  *-1\r\n  (RESP2), or _\r\n (RESP3)
    Null,
    /// %N\r\n (RESP3 map)
    Map(Vec<(RespValue, RespValue)>),
    /// !21\r\nSYNTAX invalid syntax\r\n (RESP3 bulk error)
    BulkError(String),
    /// >N\r\n… (RESP3 push message)
    Push { kind: String, data: Vec<RespValue> },
}

// ── Convenience accessors ──────────────────────────────────────────

impl RespValue {
    /// Try to interpret this value as a UTF-8 string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::SimpleString(s) => Some(s),
            Self::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Try to interpret this value as bytes.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::BulkString(b) => Some(b),
            Self::SimpleString(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Try to interpret this value as i64.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns true when this value represents null / nil.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns true when this is a Redis error (simple or bulk).
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_) | Self::BulkError(_))
    }

    /// Returns the error message if this is an error value.
    pub fn as_error_msg(&self) -> Option<&str> {
        match self {
            Self::Error(msg) => Some(msg),
            Self::BulkError(msg) => Some(msg),
            _ => None,
        }
    }

    /// Returns the type name as a static string (useful for error messages).
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SimpleString(_) => "simple_string",
            Self::Error(_) => "error",
            Self::Integer(_) => "integer",
            Self::BulkString(_) => "bulk_string",
            Self::Array(_) => "array",
            Self::Null => "null",
            Self::Map(_) => "map",
            Self::BulkError(_) => "bulk_error",
            Self::Push { .. } => "push",
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
