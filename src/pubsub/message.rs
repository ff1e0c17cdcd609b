//! Push notification frames and how they are told apart from command replies.

use crate::error::{HaError, Result};
use crate::resp::types::RespValue;

use bytes::Bytes;

/// A message published to a channel this connection is subscribed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Set only when the subscription was made with PSUBSCRIBE.
    pub pattern: Option<String>,
    pub channel: String,
    pub payload: Bytes,
}

/// One decoded frame off a subscription connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    /// A `message` / `pmessage` push.
    Push(Message),
    /// Anything else: the reply to a command we issued.
    Ack(RespValue),
}

impl Message {
    /// Build a message from the frame elements that follow the
    /// `message`/`pmessage` tag: `[pattern,] channel, payload`.
    ///
    /// Elements past the payload are ignored.
    pub fn from_elements(elements: &[RespValue], is_pattern: bool) -> Result<Self> {
        let mut it = elements.iter();
        let mut pop = || {
            it.next()
                .ok_or_else(|| HaError::Protocol("message has too few elements".into()))
        };

        let pattern = if is_pattern {
            Some(string_field(pop()?, "pattern")?)
        } else {
            None
        };
        let channel = string_field(pop()?, "channel")?;
        let payload = match pop()? {
            RespValue::BulkString(b) => b.clone(),
            RespValue::SimpleString(s) => Bytes::copy_from_slice(s.as_bytes()),
            other => {
                return Err(HaError::Protocol(format!(
                    "message payload must be a string, got {}",
                    other.type_name()
                )))
            }
        };

        Ok(Self {
            pattern,
            channel,
            payload,
        })
    }
}

fn string_field(value: &RespValue, what: &str) -> Result<String> {
    value.as_str().map(str::to_string).ok_or_else(|| {
        HaError::Protocol(format!(
            "message {what} must be a UTF-8 string, got {}",
            value.type_name()
        ))
    })
}

/// Tag and body of a frame shaped like a push (`[tag, elements…]`).
fn tagged(frame: &RespValue) -> Option<(&[u8], &[RespValue])> {
    match frame {
        RespValue::Array(elements) => {
            let (tag, rest) = elements.split_first()?;
            Some((tag.as_bytes()?, rest))
        }
        RespValue::Push { kind, data } => Some((kind.as_bytes(), data)),
        _ => None,
    }
}

/// Split a frame into pushes and acknowledgments.
///
/// `message` frames need at least 3 elements and `pmessage` frames at
/// least 4 (tag included); shorter ones are a protocol error rather than
/// an acknowledgment.
pub fn classify(frame: RespValue) -> Result<Classified> {
    let push = tagged(&frame).and_then(|(tag, rest)| {
        if tag.eq_ignore_ascii_case(b"pmessage") {
            Some((true, rest))
        } else if tag.eq_ignore_ascii_case(b"message") {
            Some((false, rest))
        } else {
            None
        }
    });

    match push {
        Some((is_pattern, rest)) => {
            let min = if is_pattern { 3 } else { 2 };
            if rest.len() < min {
                return Err(HaError::Protocol("message has too few elements".into()));
            }
            Message::from_elements(rest, is_pattern).map(Classified::Push)
        }
        None => Ok(Classified::Ack(frame)),
    }
}

/// Which subscription set an acknowledgment changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubscriptionChange {
    Subscribe,
    Unsubscribe,
    PSubscribe,
    PUnsubscribe,
}

/// Recognise a subscribe-family acknowledgment and the name it is about.
/// The name is `None` for an unsubscribe issued with nothing subscribed.
pub(crate) fn subscription_change(frame: &RespValue) -> Option<(SubscriptionChange, Option<&str>)> {
    let (tag, rest) = tagged(frame)?;
    let change = if tag.eq_ignore_ascii_case(b"subscribe") {
        SubscriptionChange::Subscribe
    } else if tag.eq_ignore_ascii_case(b"unsubscribe") {
        SubscriptionChange::Unsubscribe
    } else if tag.eq_ignore_ascii_case(b"psubscribe") {
        SubscriptionChange::PSubscribe
    } else if tag.eq_ignore_ascii_case(b"punsubscribe") {
        SubscriptionChange::PUnsubscribe
    } else {
        return None;
    };
    Some((change, rest.first().and_then(RespValue::as_str)))
}

// ── Tests ──────────────────────────────────────────────────────────
