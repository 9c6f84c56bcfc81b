//! Two-pass frame normalization.
//!
//! Peers disagree about field naming: older encoders send full names
//! (`senderId`), newer ones send aliases (`s`), and some mix the two. All of
//! that is resolved here, once, into canonical domain values; handlers never
//! see raw payloads. Precedence per field is full name, then alias, then the
//! documented default.

use super::{CodecError, FrameType, RawFrame, Result};
use crate::types::contact::{Contact, ContactRequest};
use crate::types::message::Message;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

/// A frame reduced to its domain meaning, ready for dispatch.
#[derive(Debug, Clone)]
pub enum NormalizedFrame {
    Message(Message),
    MessagesRead {
        read_by: Option<String>,
        message_ids: Vec<String>,
    },
    ContactRequest(ContactRequest),
    ContactRequestAccepted {
        contact: Contact,
        request_id: Option<String>,
    },
    Typing {
        sender_id: Option<String>,
        receiver_id: Option<String>,
        is_typing: bool,
    },
    Connection {
        user_id: Option<String>,
    },
    Ping,
    Pong,
    /// Recognized envelope, unrecognized type. Log and drop.
    Unknown(String),
}

impl NormalizedFrame {
    pub fn frame_type(&self) -> Option<FrameType> {
        match self {
            NormalizedFrame::Message(_) => Some(FrameType::NewMessage),
            NormalizedFrame::MessagesRead { .. } => Some(FrameType::MessagesRead),
            NormalizedFrame::ContactRequest(_) => Some(FrameType::ContactRequest),
            NormalizedFrame::ContactRequestAccepted { .. } => {
                Some(FrameType::ContactRequestAccepted)
            }
            NormalizedFrame::Typing { .. } => Some(FrameType::Typing),
            NormalizedFrame::Connection { .. } => Some(FrameType::Connection),
            NormalizedFrame::Ping => Some(FrameType::Ping),
            NormalizedFrame::Pong => Some(FrameType::Pong),
            NormalizedFrame::Unknown(_) => None,
        }
    }
}

fn get<'a>(data: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| data.get(*key))
}

fn get_str(data: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    get(data, keys).and_then(Value::as_str).map(str::to_string)
}

fn require_str(data: &Map<String, Value>, keys: &[&str], name: &'static str) -> Result<String> {
    get_str(data, keys).ok_or(CodecError::MissingField(name))
}

fn get_bool(data: &Map<String, Value>, keys: &[&str]) -> Option<bool> {
    get(data, keys).and_then(Value::as_bool)
}

/// Timestamps arrive as epoch milliseconds from JS-style peers or RFC 3339
/// strings from ours; accept both.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

fn get_timestamp(data: &Map<String, Value>, keys: &[&str]) -> Option<DateTime<Utc>> {
    get(data, keys).and_then(parse_timestamp)
}

fn get_string_array(data: &Map<String, Value>, keys: &[&str]) -> Vec<String> {
    get(data, keys)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn normalize_message(data: &Map<String, Value>) -> Result<Message> {
    let created_at = get_timestamp(data, &["createdAt", "timestamp", "ts"]).unwrap_or_else(Utc::now);
    let updated_at = get_timestamp(data, &["updatedAt"]).unwrap_or(created_at);
    Ok(Message {
        id: require_str(data, &["id"], "id")?,
        sender_id: require_str(data, &["senderId", "s"], "senderId")?,
        receiver_id: require_str(data, &["receiverId", "r"], "receiverId")?,
        content: get_str(data, &["content", "c"]).unwrap_or_default(),
        message_type: get_str(data, &["type", "t"])
            .as_deref()
            .map(Into::into)
            .unwrap_or_default(),
        status: get_str(data, &["status", "st"])
            .as_deref()
            .map(Into::into)
            .unwrap_or_default(),
        created_at,
        updated_at,
    })
}

fn normalize_contact(data: &Map<String, Value>) -> Result<Contact> {
    Ok(Contact {
        id: require_str(data, &["id"], "id")?,
        name: get_str(data, &["name"]).unwrap_or_default(),
        phone_number: get_str(data, &["phoneNumber"]).unwrap_or_default(),
        avatar_url: get_str(data, &["avatarUrl"]),
    })
}

fn normalize_contact_request(data: &Map<String, Value>) -> Result<ContactRequest> {
    let sender = match data.get("sender") {
        Some(Value::Object(card)) => normalize_contact(card).ok(),
        _ => None,
    };
    Ok(ContactRequest {
        id: require_str(data, &["id"], "id")?,
        sender_id: require_str(data, &["senderId", "s"], "senderId")?,
        receiver_id: require_str(data, &["receiverId", "r"], "receiverId")?,
        sender,
        created_at: get_timestamp(data, &["createdAt", "timestamp", "ts"]).unwrap_or_else(Utc::now),
    })
}

/// Resolves a decoded frame into its canonical domain form.
///
/// Unknown frame types come back as [`NormalizedFrame::Unknown`] — the
/// caller logs and drops them. Missing required fields are the only hard
/// errors, and they too must never take the socket down.
pub fn normalize(raw: &RawFrame) -> Result<NormalizedFrame> {
    let Some(frame_type) = FrameType::parse(&raw.type_name) else {
        return Ok(NormalizedFrame::Unknown(raw.type_name.clone()));
    };
    let data = &raw.data;
    match frame_type {
        FrameType::NewMessage => Ok(NormalizedFrame::Message(normalize_message(data)?)),
        FrameType::MessagesRead => Ok(NormalizedFrame::MessagesRead {
            read_by: get_str(data, &["readBy", "rb"]),
            message_ids: get_string_array(data, &["messageIds", "mids"]),
        }),
        FrameType::ContactRequest => Ok(NormalizedFrame::ContactRequest(normalize_contact_request(
            data,
        )?)),
        FrameType::ContactRequestAccepted => Ok(NormalizedFrame::ContactRequestAccepted {
            contact: normalize_contact(data)?,
            request_id: get_str(data, &["requestId"]),
        }),
        // An absent isTyping is a falsy "not typing", not an error: at least
        // one legacy encoder omits the field entirely.
        FrameType::Typing => Ok(NormalizedFrame::Typing {
            sender_id: get_str(data, &["senderId", "s"]),
            receiver_id: get_str(data, &["receiverId", "r"]),
            is_typing: get_bool(data, &["isTyping", "it"]).unwrap_or(false),
        }),
        FrameType::Connection => Ok(NormalizedFrame::Connection {
            user_id: get_str(data, &["userId"]),
        }),
        FrameType::Ping => Ok(NormalizedFrame::Ping),
        FrameType::Pong => Ok(NormalizedFrame::Pong),
    }
}
