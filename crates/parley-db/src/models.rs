// Database row types. These map directly to SQLite rows; conversions into
// the wire models live here so handlers never see raw timestamp text.

use parley_types::models::{Channel, Message, User};

use crate::parse_timestamp;

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub password_salt: String,
    pub password_iterations: u32,
    pub public_key: Option<String>,
    pub created_at: String,
}

pub struct SessionRow {
    pub token: String,
    pub user_id: String,
    pub created_at: String,
    pub last_seen: String,
}

pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: Option<String>,
    pub channel_id: Option<String>,
    pub content: String,
    pub encrypted: bool,
    pub created_at: String,
}

pub struct ChannelRow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_by: String,
    pub created_at: String,
    pub members: Vec<String>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            created: parse_timestamp(&row.created_at),
            id: row.id,
            username: row.username,
            email: row.email,
        }
    }
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Message {
            timestamp: parse_timestamp(&row.created_at),
            id: row.id,
            sender_id: row.sender_id,
            recipient_id: row.recipient_id,
            channel_id: row.channel_id,
            content: row.content,
            encrypted: row.encrypted,
        }
    }
}

impl From<ChannelRow> for Channel {
    fn from(row: ChannelRow) -> Self {
        Channel {
            created: parse_timestamp(&row.created_at),
            id: row.id,
            name: row.name,
            description: row.description,
            members: row.members,
            created_by: row.created_by,
        }
    }
}
