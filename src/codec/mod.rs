pub mod normalize;

pub use normalize::{NormalizedFrame, normalize};

use crate::types::contact::{Contact, ContactRequest};
use crate::types::message::Message;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde_json::{Map, Value, json};
use std::io::{Read, Write};
use thiserror::Error;

/// Payloads above this size are gzip'd when compression is enabled.
pub const COMPRESSION_THRESHOLD: usize = 1024;

/// Leading bytes of a gzip stream, used to sniff compressed frames.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("gzip inflate failed: {0}")]
    Gzip(#[from] std::io::Error),
    #[error("frame has no type field")]
    MissingType,
    #[error("frame payload is missing required field `{0}`")]
    MissingField(&'static str),
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// The set of frame types this protocol speaks. Each has a canonical wire
/// name and a short alias; both decode to the same variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    NewMessage,
    MessagesRead,
    ContactRequest,
    ContactRequestAccepted,
    Typing,
    Connection,
    Ping,
    Pong,
}

impl FrameType {
    pub fn canonical(&self) -> &'static str {
        match self {
            FrameType::NewMessage => "NEW_MESSAGE",
            FrameType::MessagesRead => "MESSAGES_READ",
            FrameType::ContactRequest => "CONTACT_REQUEST",
            FrameType::ContactRequestAccepted => "CONTACT_REQUEST_ACCEPTED",
            FrameType::Typing => "TYPING",
            FrameType::Connection => "CONNECTION",
            FrameType::Ping => "PING",
            FrameType::Pong => "PONG",
        }
    }

    pub fn alias(&self) -> &'static str {
        match self {
            FrameType::NewMessage => "MSG",
            FrameType::MessagesRead => "READ",
            FrameType::ContactRequest => "REQ",
            FrameType::ContactRequestAccepted => "REQ_ACC",
            FrameType::Typing => "TYPING",
            FrameType::Connection => "CONN",
            FrameType::Ping => "PING",
            FrameType::Pong => "PONG",
        }
    }

    /// Accepts either the canonical or the alias form.
    pub fn parse(s: &str) -> Option<FrameType> {
        match s {
            "NEW_MESSAGE" | "MSG" => Some(FrameType::NewMessage),
            "MESSAGES_READ" | "READ" => Some(FrameType::MessagesRead),
            "CONTACT_REQUEST" | "REQ" => Some(FrameType::ContactRequest),
            "CONTACT_REQUEST_ACCEPTED" | "REQ_ACC" => Some(FrameType::ContactRequestAccepted),
            "TYPING" => Some(FrameType::Typing),
            "CONNECTION" | "CONN" => Some(FrameType::Connection),
            "PING" => Some(FrameType::Ping),
            "PONG" => Some(FrameType::Pong),
            _ => None,
        }
    }
}

/// Short alias for a payload key, where one exists. Applied on encode;
/// decode accepts both forms (see [`normalize`]).
fn field_alias(long: &str) -> Option<&'static str> {
    match long {
        "senderId" => Some("s"),
        "receiverId" => Some("r"),
        "content" => Some("c"),
        "type" => Some("t"),
        "status" => Some("st"),
        "createdAt" | "timestamp" => Some("ts"),
        "isTyping" => Some("it"),
        "readBy" => Some("rb"),
        "messageIds" => Some("mids"),
        _ => None,
    }
}

/// An outbound frame, typed. Payload keys are long-form; [`encode_frame`]
/// shortens them on the way out.
#[derive(Debug, Clone)]
pub struct Frame {
    pub frame_type: FrameType,
    pub data: Map<String, Value>,
}

/// A decoded inbound frame. The type is kept as the raw string so unknown
/// types can be logged and dropped instead of failing the decode.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub type_name: String,
    pub data: Map<String, Value>,
}

fn object_of<T: serde::Serialize>(value: &T) -> Map<String, Value> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

impl Frame {
    pub fn new(frame_type: FrameType, data: Map<String, Value>) -> Self {
        Self { frame_type, data }
    }

    pub fn new_message(message: &Message) -> Self {
        Self::new(FrameType::NewMessage, object_of(message))
    }

    pub fn messages_read(read_by: &str, message_ids: &[String]) -> Self {
        let mut data = Map::new();
        data.insert("readBy".to_string(), json!(read_by));
        data.insert("messageIds".to_string(), json!(message_ids));
        Self::new(FrameType::MessagesRead, data)
    }

    pub fn contact_request(request: &ContactRequest) -> Self {
        Self::new(FrameType::ContactRequest, object_of(request))
    }

    pub fn contact_request_accepted(contact: &Contact, request_id: Option<&str>) -> Self {
        let mut data = object_of(contact);
        if let Some(id) = request_id {
            data.insert("requestId".to_string(), json!(id));
        }
        Self::new(FrameType::ContactRequestAccepted, data)
    }

    pub fn typing(sender_id: &str, receiver_id: &str, is_typing: bool) -> Self {
        let mut data = Map::new();
        data.insert("senderId".to_string(), json!(sender_id));
        data.insert("receiverId".to_string(), json!(receiver_id));
        data.insert("isTyping".to_string(), json!(is_typing));
        Self::new(FrameType::Typing, data)
    }

    pub fn connection(user_id: &str) -> Self {
        let mut data = Map::new();
        data.insert("userId".to_string(), json!(user_id));
        Self::new(FrameType::Connection, data)
    }

    pub fn ping() -> Self {
        Self::new(FrameType::Ping, Map::new())
    }

    pub fn pong() -> Self {
        Self::new(FrameType::Pong, Map::new())
    }
}

/// A frame ready for the socket: plain JSON text, or gzip'd bytes when the
/// payload crossed the compression threshold.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodedFrame {
    Text(String),
    Binary(Vec<u8>),
}

impl EncodedFrame {
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            EncodedFrame::Text(text) => text.into_bytes(),
            EncodedFrame::Binary(bytes) => bytes,
        }
    }
}

/// Serializes a frame to the compact `{"t": ..., "d": ...}` wire form with
/// short type and field names.
pub fn encode_frame(frame: &Frame) -> String {
    let mut short = Map::with_capacity(frame.data.len());
    for (key, value) in &frame.data {
        let wire_key = field_alias(key).unwrap_or(key.as_str());
        short.insert(wire_key.to_string(), value.clone());
    }
    json!({ "t": frame.frame_type.alias(), "d": short }).to_string()
}

/// Like [`encode_frame`], but gzips the serialized frame when it exceeds
/// [`COMPRESSION_THRESHOLD`]. Small frames stay as plain text; compressing
/// them would cost more than it saves.
pub fn encode_frame_compressed(frame: &Frame) -> EncodedFrame {
    let text = encode_frame(frame);
    if text.len() <= COMPRESSION_THRESHOLD {
        return EncodedFrame::Text(text);
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    if encoder.write_all(text.as_bytes()).is_err() {
        return EncodedFrame::Text(text);
    }
    match encoder.finish() {
        Ok(bytes) => EncodedFrame::Binary(bytes),
        Err(_) => EncodedFrame::Text(text),
    }
}

/// Parses a raw socket payload into a frame, transparently inflating gzip'd
/// input (sniffed via the gzip magic bytes). Accepts both canonical and
/// alias type names; the type is surfaced as a string so callers can drop
/// unknown types without treating them as errors.
pub fn decode_frame(bytes: &[u8]) -> Result<RawFrame> {
    let text = if bytes.starts_with(&GZIP_MAGIC) {
        let mut decoder = GzDecoder::new(bytes);
        let mut inflated = String::new();
        decoder.read_to_string(&mut inflated)?;
        inflated
    } else {
        String::from_utf8(bytes.to_vec())?
    };

    let value: Value = serde_json::from_str(&text)?;
    let Value::Object(mut envelope) = value else {
        return Err(CodecError::MissingType);
    };
    let type_name = match envelope.get("t").and_then(Value::as_str) {
        Some(t) => t.to_string(),
        None => return Err(CodecError::MissingType),
    };
    let data = match envelope.remove("d") {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    Ok(RawFrame { type_name, data })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::message::{MessageStatus, MessageType};
    use chrono::{TimeZone, Utc};

    fn sample_message() -> Message {
        let at = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        Message {
            id: "msg-1".to_string(),
            sender_id: "alice".to_string(),
            receiver_id: "bob".to_string(),
            content: "hello there".to_string(),
            message_type: MessageType::Text,
            status: MessageStatus::Sent,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn encode_uses_short_type_and_field_names() {
        let text = encode_frame(&Frame::new_message(&sample_message()));
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["t"], "MSG");
        assert_eq!(value["d"]["s"], "alice");
        assert_eq!(value["d"]["r"], "bob");
        assert_eq!(value["d"]["c"], "hello there");
        assert_eq!(value["d"]["st"], "sent");
        assert!(value["d"].get("senderId").is_none());
    }

    #[test]
    fn decode_accepts_canonical_and_alias_types() {
        for t in ["NEW_MESSAGE", "MSG"] {
            let raw = decode_frame(format!(r#"{{"t":"{t}","d":{{}}}}"#).as_bytes()).unwrap();
            assert_eq!(FrameType::parse(&raw.type_name), Some(FrameType::NewMessage));
        }
    }

    #[test]
    fn unknown_type_decodes_without_error() {
        let raw = decode_frame(br#"{"t":"WHATEVER","d":{"x":1}}"#).unwrap();
        assert_eq!(raw.type_name, "WHATEVER");
        assert!(FrameType::parse(&raw.type_name).is_none());
    }

    #[test]
    fn missing_type_is_an_error() {
        assert!(matches!(
            decode_frame(br#"{"d":{}}"#),
            Err(CodecError::MissingType)
        ));
        assert!(matches!(decode_frame(b"[1,2,3]"), Err(CodecError::MissingType)));
    }

    #[test]
    fn garbage_is_a_json_error() {
        assert!(matches!(decode_frame(b"not json"), Err(CodecError::Json(_))));
    }

    #[test]
    fn small_frames_stay_uncompressed() {
        let encoded = encode_frame_compressed(&Frame::ping());
        assert!(matches!(encoded, EncodedFrame::Text(_)));
    }

    #[test]
    fn large_frames_round_trip_through_gzip() {
        let mut message = sample_message();
        message.content = "x".repeat(4 * 1024);
        let frame = Frame::new_message(&message);

        let encoded = encode_frame_compressed(&frame);
        let EncodedFrame::Binary(bytes) = encoded else {
            panic!("expected compressed frame");
        };
        assert_eq!(&bytes[..2], &GZIP_MAGIC);

        let raw = decode_frame(&bytes).unwrap();
        assert_eq!(FrameType::parse(&raw.type_name), Some(FrameType::NewMessage));
        assert_eq!(
            raw.data.get("c").and_then(Value::as_str).unwrap().len(),
            4 * 1024
        );
    }
}
