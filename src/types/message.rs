use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Media kind of a chat message. The wire value is the lowercase name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    Video,
    Audio,
    Document,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::Video => "video",
            MessageType::Audio => "audio",
            MessageType::Document => "document",
        }
    }
}

impl From<&str> for MessageType {
    fn from(s: &str) -> Self {
        match s {
            "image" => MessageType::Image,
            "video" => MessageType::Video,
            "audio" => MessageType::Audio,
            "document" => MessageType::Document,
            _ => MessageType::Text,
        }
    }
}

/// Delivery state of a message. Transitions are strictly forward:
/// sent -> delivered -> read. See [`MessageStatus::rank`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    #[default]
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
        }
    }

    /// Position in the forward-only lifecycle.
    pub fn rank(&self) -> u8 {
        match self {
            MessageStatus::Sent => 0,
            MessageStatus::Delivered => 1,
            MessageStatus::Read => 2,
        }
    }
}

impl From<&str> for MessageStatus {
    fn from(s: &str) -> Self {
        match s {
            "delivered" => MessageStatus::Delivered,
            "read" => MessageStatus::Read,
            _ => MessageStatus::Sent,
        }
    }
}

/// A chat message as persisted by the store and cached on the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub status: MessageStatus,
    // Epoch milliseconds on the wire, what a JS peer produces.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// The conversation partner from `user_id`'s point of view.
    pub fn partner_of(&self, user_id: &str) -> &str {
        if self.sender_id == user_id {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }

    /// Applies `status` only if it advances the lifecycle. Returns whether
    /// the message changed.
    pub fn promote_status(&mut self, status: MessageStatus) -> bool {
        if status.rank() > self.status.rank() {
            self.status = status;
            self.updated_at = Utc::now();
            true
        } else {
            false
        }
    }
}

/// Payload for creating a message through the store.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub message_type: MessageType,
}

/// A message in the local cache, keyed for conversation lookup.
///
/// `contact_id` is always the *other* party of the conversation: the cache
/// never stores a message under the owning user's own id as the partner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedMessage {
    #[serde(flatten)]
    pub message: Message,
    pub user_id: String,
    pub contact_id: String,
}

impl CachedMessage {
    pub fn derive(user_id: &str, message: Message) -> Self {
        let contact_id = message.partner_of(user_id).to_string();
        Self {
            message,
            user_id: user_id.to_string(),
            contact_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(sender: &str, receiver: &str) -> Message {
        let now = Utc::now();
        Message {
            id: "m1".to_string(),
            sender_id: sender.to_string(),
            receiver_id: receiver.to_string(),
            content: "hi".to_string(),
            message_type: MessageType::Text,
            status: MessageStatus::Sent,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn status_never_regresses() {
        let mut msg = message("alice", "bob");
        assert!(msg.promote_status(MessageStatus::Read));
        assert!(!msg.promote_status(MessageStatus::Delivered));
        assert!(!msg.promote_status(MessageStatus::Sent));
        assert_eq!(msg.status, MessageStatus::Read);
    }

    #[test]
    fn cached_message_derives_partner() {
        let sent = CachedMessage::derive("alice", message("alice", "bob"));
        assert_eq!(sent.contact_id, "bob");
        let received = CachedMessage::derive("bob", message("alice", "bob"));
        assert_eq!(received.contact_id, "alice");
    }
}
