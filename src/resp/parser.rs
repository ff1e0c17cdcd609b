//! Streaming RESP parser for the subset of RESP2/RESP3 that subscription
//! and sentinel traffic uses.
//!
//! [`parse`] takes a byte buffer and returns `Ok((RespValue, bytes_consumed))`
//! or `Err(Incomplete)` when more data is needed, or `Err(Protocol(…))` on
//! malformed input. Bulk strings are sliced out of the shared `Bytes`
//! buffer, so message payloads are never copied.

use bytes::Bytes;
use crate::error::{HaError, Result};
use crate::resp::types::RespValue;
use memchr::memchr;

/// Parse one RESP value from the front of `buf`.
///
/// Returns `(value, bytes_consumed)` on success.
/// Returns `Err(Incomplete)` when the buffer is too short;
/// callers should read more data and retry.
pub fn parse(buf: &Bytes) -> Result<(RespValue, usize)> {
    if buf.is_empty() {
        return Err(HaError::Incomplete);
    }

    match buf[0] {
        b'+' => parse_simple_string(buf),
        b'-' => parse_simple_error(buf),
        b':' => parse_integer(buf),
        b'$' => parse_bulk_string(buf),
        b'*' => parse_array(buf),
        b'_' => parse_null(buf),
        b'!' => parse_bulk_error(buf),
        b'%' => parse_map(buf),
        b'>' => parse_push(buf),
        other => Err(HaError::Protocol(format!(
            "unsupported RESP type byte: 0x{other:02x}"
        ))),
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Find the next `\r\n` in `buf` starting at `offset`.
/// Returns the index of `\r`.
#[inline]
fn find_crlf(buf: &[u8], offset: usize) -> Result<usize> {
    let search = &buf[offset..];
    match memchr(b'\r', search) {
        Some(pos) => {
            let abs = offset + pos;
            if abs + 1 < buf.len() && buf[abs + 1] == b'\n' {
                Ok(abs)
            } else if abs + 1 >= buf.len() {
                Err(HaError::Incomplete)
            } else {
                Err(HaError::Protocol("expected \\n after \\r".into()))
            }
        }
        None => Err(HaError::Incomplete),
    }
}

/// Read the line starting at `buf[offset]` up to `\r\n`.
/// Returns `(line_bytes, index_after_crlf)`.
#[inline]
fn read_line(buf: &[u8], offset: usize) -> Result<(&[u8], usize)> {
    let cr = find_crlf(buf, offset)?;
    Ok((&buf[offset..cr], cr + 2))
}

/// Parse an integer from a byte slice (no allocations).
fn parse_int_from_bytes(bytes: &[u8]) -> Result<i64> {
    let (negative, digits) = match bytes.first() {
        Some(b'-') => (true, &bytes[1..]),
        Some(b'+') => (false, &bytes[1..]),
        Some(_) => (false, bytes),
        None => return Err(HaError::Protocol("empty integer".into())),
    };

    if digits.is_empty() {
        return Err(HaError::Protocol("integer has no digits".into()));
    }

    // Accumulate as negative so i64::MIN fits.
    let mut n: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(HaError::Protocol(format!(
                "invalid byte in integer: 0x{b:02x}"
            )));
        }
        n = n
            .checked_mul(10)
            .and_then(|n| n.checked_sub((b - b'0') as i64))
            .ok_or_else(|| HaError::Protocol("integer overflow".into()))?;
    }

    Ok(if negative { n } else { -n })
}

/// Parse a length/count header, rejecting negatives with `what` in the message.
fn parse_count(buf: &[u8], what: &str) -> Result<(usize, usize)> {
    let (line, next) = read_line(buf, 1)?;
    let count = parse_int_from_bytes(line)?;
    if count < 0 {
        return Err(HaError::Protocol(format!("negative {what} count")));
    }
    Ok((count as usize, next))
}

/// Parse `count` consecutive values starting at `next`.
fn parse_elements(buf: &Bytes, mut next: usize, count: usize) -> Result<(Vec<RespValue>, usize)> {
    // Cap the pre-allocation: the count comes off the wire.
    let mut elements = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let sub = buf.slice(next..);
        let (val, consumed) = parse(&sub)?;
        elements.push(val);
        next += consumed;
    }
    Ok((elements, next))
}

fn utf8_line(line: &[u8], what: &str) -> Result<String> {
    std::str::from_utf8(line)
        .map(str::to_string)
        .map_err(|e| HaError::Protocol(format!("invalid UTF-8 in {what}: {e}")))
}

// ── Type parsers ──────────────────────────────────────────────────

/// `+<string>\r\n`
fn parse_simple_string(buf: &Bytes) -> Result<(RespValue, usize)> {
    let (line, next) = read_line(buf, 1)?;
    let s = match line {
        b"OK" => "OK".to_string(),
        b"PONG" => "PONG".to_string(),
        _ => utf8_line(line, "simple string")?,
    };
    Ok((RespValue::SimpleString(s), next))
}

/// `-<error message>\r\n`
fn parse_simple_error(buf: &Bytes) -> Result<(RespValue, usize)> {
    let (line, next) = read_line(buf, 1)?;
    Ok((RespValue::Error(utf8_line(line, "error")?), next))
}

/// `:<integer>\r\n`
fn parse_integer(buf: &Bytes) -> Result<(RespValue, usize)> {
    let (line, next) = read_line(buf, 1)?;
    let i = parse_int_from_bytes(line)?;
    Ok((RespValue::Integer(i), next))
}

/// `$<length>\r\n<data>\r\n`  or  `$-1\r\n`
fn parse_bulk_string(buf: &Bytes) -> Result<(RespValue, usize)> {
    let (line, next) = read_line(buf, 1)?;
    let len = parse_int_from_bytes(line)?;

    if len < 0 {
        return Ok((RespValue::Null, next));
    }

    let data_end = next + len as usize;
    if buf.len() < data_end + 2 {
        return Err(HaError::Incomplete);
    }
    if &buf[data_end..data_end + 2] != b"\r\n" {
        return Err(HaError::Protocol(
            "bulk string not terminated by \\r\\n".into(),
        ));
    }

    Ok((RespValue::BulkString(buf.slice(next..data_end)), data_end + 2))
}

/// `*<count>\r\n<elements>`  or  `*-1\r\n`
fn parse_array(buf: &Bytes) -> Result<(RespValue, usize)> {
    let (line, next) = read_line(buf, 1)?;
    let count = parse_int_from_bytes(line)?;

    if count < 0 {
        return Ok((RespValue::Null, next));
    }

    let (elements, next) = parse_elements(buf, next, count as usize)?;
    Ok((RespValue::Array(elements), next))
}

/// `_\r\n`  (RESP3 null)
fn parse_null(buf: &Bytes) -> Result<(RespValue, usize)> {
    if buf.len() < 3 {
        return Err(HaError::Incomplete);
    }
    if &buf[1..3] != b"\r\n" {
        return Err(HaError::Protocol(
            "null type not terminated by \\r\\n".into(),
        ));
    }
    Ok((RespValue::Null, 3))
}

/// `!<length>\r\n<error>\r\n`
fn parse_bulk_error(buf: &Bytes) -> Result<(RespValue, usize)> {
    let (len, next) = parse_count(buf, "bulk error")?;

    if buf.len() < next + len + 2 {
        return Err(HaError::Incomplete);
    }
    if &buf[next + len..next + len + 2] != b"\r\n" {
        return Err(HaError::Protocol(
            "bulk error not terminated by \\r\\n".into(),
        ));
    }

    let s = utf8_line(&buf[next..next + len], "bulk error")?;
    Ok((RespValue::BulkError(s), next + len + 2))
}

/// `%<count>\r\n<key><value>…`
fn parse_map(buf: &Bytes) -> Result<(RespValue, usize)> {
    let (count, next) = parse_count(buf, "map")?;
    let (flat, next) = parse_elements(buf, next, count * 2)?;

    let mut pairs = Vec::with_capacity(flat.len() / 2);
    let mut it = flat.into_iter();
    while let (Some(k), Some(v)) = (it.next(), it.next()) {
        pairs.push((k, v));
    }
    Ok((RespValue::Map(pairs), next))
}

/// `><count>\r\n<kind><elements>…`
fn parse_push(buf: &Bytes) -> Result<(RespValue, usize)> {
    let (count, next) = parse_count(buf, "push")?;
    if count == 0 {
        return Err(HaError::Protocol(
            "push message must have at least one element (kind)".into(),
        ));
    }

    let (mut elements, next) = parse_elements(buf, next, count)?;
    let kind = match elements.remove(0) {
        RespValue::SimpleString(s) => s,
        RespValue::BulkString(b) => utf8_line(&b, "push kind")?,
        other => {
            return Err(HaError::Protocol(format!(
                "push kind must be a string, got {}",
                other.type_name()
            )));
        }
    };

    Ok((RespValue::Push { kind, data: elements }, next))
}

// ── Tests ──────────────────────────────────────────────────────────
