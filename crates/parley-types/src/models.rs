use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Public view of a registered identity. Never carries password material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub created: DateTime<Utc>,
}

/// A stored message. Exactly one of `to` / `channel_id` is set.
///
/// When `encrypted` is true, `content` is a base64 hybrid envelope that only
/// the recipient's private key can open. The server treats it as opaque text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "from")]
    pub sender_id: String,
    #[serde(rename = "to", default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    pub content: String,
    pub encrypted: bool,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn is_direct(&self) -> bool {
        self.recipient_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub members: Vec<String>,
    pub created: DateTime<Utc>,
    pub created_by: String,
}

impl Channel {
    pub fn has_member(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m == user_id)
    }
}
