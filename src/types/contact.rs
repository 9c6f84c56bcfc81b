use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user's contact card as exposed to counterparts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub phone_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// A pending contact request awaiting accept/reject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRequest {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    /// Sender's card, when the store resolved it, so the UI can render the
    /// request without a second lookup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Contact>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}
