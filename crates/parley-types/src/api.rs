use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ActionError;
use crate::models::{Channel, Message, User};

pub const DEFAULT_LIMIT: u32 = 50;
pub const MAX_LIMIT: u32 = 200;

fn default_limit() -> u32 {
    DEFAULT_LIMIT
}

/// Clamp a caller-supplied page size into `1..=MAX_LIMIT`.
pub fn clamp_limit(limit: u32) -> u32 {
    limit.clamp(1, MAX_LIMIT)
}

// -- Actions --

/// Every action name the server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Register,
    Login,
    Logout,
    SendMessage,
    SendChannelMessage,
    GetMessages,
    GetChannelMessages,
    CreateChannel,
    GetUserChannels,
    AddUserToChannel,
    RemoveUserFromChannel,
    GetRecentMessages,
    SetPublicKey,
    GetPublicKey,
    FindUser,
}

impl ActionKind {
    pub const ALL: [ActionKind; 15] = [
        Self::Register,
        Self::Login,
        Self::Logout,
        Self::SendMessage,
        Self::SendChannelMessage,
        Self::GetMessages,
        Self::GetChannelMessages,
        Self::CreateChannel,
        Self::GetUserChannels,
        Self::AddUserToChannel,
        Self::RemoveUserFromChannel,
        Self::GetRecentMessages,
        Self::SetPublicKey,
        Self::GetPublicKey,
        Self::FindUser,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Register => "register",
            Self::Login => "login",
            Self::Logout => "logout",
            Self::SendMessage => "send_message",
            Self::SendChannelMessage => "send_channel_message",
            Self::GetMessages => "get_messages",
            Self::GetChannelMessages => "get_channel_messages",
            Self::CreateChannel => "create_channel",
            Self::GetUserChannels => "get_user_channels",
            Self::AddUserToChannel => "add_user_to_channel",
            Self::RemoveUserFromChannel => "remove_user_from_channel",
            Self::GetRecentMessages => "get_recent_messages",
            Self::SetPublicKey => "set_public_key",
            Self::GetPublicKey => "get_public_key",
            Self::FindUser => "find_user",
        }
    }

    /// Only account creation and login may run without a session.
    pub fn requires_auth(self) -> bool {
        !matches!(self, Self::Register | Self::Login)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or(ActionError::UnknownAction)
    }
}

/// A fully decoded request: the action plus its typed payload.
#[derive(Debug)]
pub enum Action {
    Register(RegisterRequest),
    Login(LoginRequest),
    Logout,
    SendMessage(SendMessageRequest),
    SendChannelMessage(ChannelMessageRequest),
    GetMessages(GetMessagesRequest),
    GetChannelMessages(GetChannelMessagesRequest),
    CreateChannel(CreateChannelRequest),
    GetUserChannels,
    AddUserToChannel(ChannelMemberRequest),
    RemoveUserFromChannel(ChannelMemberRequest),
    GetRecentMessages(RecentMessagesRequest),
    SetPublicKey(SetPublicKeyRequest),
    GetPublicKey(GetPublicKeyRequest),
    FindUser(FindUserRequest),
}

impl Action {
    /// Decode the payload for an already-resolved action kind.
    pub fn decode(kind: ActionKind, payload: Value) -> Result<Self, ActionError> {
        Ok(match kind {
            ActionKind::Register => Self::Register(parse(payload)?),
            ActionKind::Login => Self::Login(parse(payload)?),
            ActionKind::Logout => Self::Logout,
            ActionKind::SendMessage => Self::SendMessage(parse(payload)?),
            ActionKind::SendChannelMessage => Self::SendChannelMessage(parse(payload)?),
            ActionKind::GetMessages => Self::GetMessages(parse(payload)?),
            ActionKind::GetChannelMessages => Self::GetChannelMessages(parse(payload)?),
            ActionKind::CreateChannel => Self::CreateChannel(parse(payload)?),
            ActionKind::GetUserChannels => Self::GetUserChannels,
            ActionKind::AddUserToChannel => Self::AddUserToChannel(parse(payload)?),
            ActionKind::RemoveUserFromChannel => Self::RemoveUserFromChannel(parse(payload)?),
            ActionKind::GetRecentMessages => Self::GetRecentMessages(parse(payload)?),
            ActionKind::SetPublicKey => Self::SetPublicKey(parse(payload)?),
            ActionKind::GetPublicKey => Self::GetPublicKey(parse(payload)?),
            ActionKind::FindUser => Self::FindUser(parse(payload)?),
        })
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Register(_) => ActionKind::Register,
            Self::Login(_) => ActionKind::Login,
            Self::Logout => ActionKind::Logout,
            Self::SendMessage(_) => ActionKind::SendMessage,
            Self::SendChannelMessage(_) => ActionKind::SendChannelMessage,
            Self::GetMessages(_) => ActionKind::GetMessages,
            Self::GetChannelMessages(_) => ActionKind::GetChannelMessages,
            Self::CreateChannel(_) => ActionKind::CreateChannel,
            Self::GetUserChannels => ActionKind::GetUserChannels,
            Self::AddUserToChannel(_) => ActionKind::AddUserToChannel,
            Self::RemoveUserFromChannel(_) => ActionKind::RemoveUserFromChannel,
            Self::GetRecentMessages(_) => ActionKind::GetRecentMessages,
            Self::SetPublicKey(_) => ActionKind::SetPublicKey,
            Self::GetPublicKey(_) => ActionKind::GetPublicKey,
            Self::FindUser(_) => ActionKind::FindUser,
        }
    }
}

fn parse<T: DeserializeOwned>(payload: Value) -> Result<T, ActionError> {
    serde_json::from_value(payload).map_err(ActionError::invalid_request)
}

// -- Auth --

#[derive(Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// -- Messages --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub to: String,
    pub content: String,
    /// Set by clients that sealed `content` into a hybrid envelope.
    #[serde(default)]
    pub encrypted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessageRequest {
    pub channel_id: String,
    pub content: String,
    #[serde(default)]
    pub encrypted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetMessagesRequest {
    pub other_user_id: String,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetChannelMessagesRequest {
    pub channel_id: String,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentMessagesRequest {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

// -- Channels --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChannelRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMemberRequest {
    pub channel_id: String,
    pub user_id: String,
}

// -- Keys & directory --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetPublicKeyRequest {
    /// SPKI PEM of an RSA public key.
    pub public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPublicKeyRequest {
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindUserRequest {
    pub username: String,
}

// -- Replies --

/// Action-specific success fields, merged into the response object.
#[derive(Debug)]
pub enum Reply {
    Auth { token: String, user: User },
    Message(Message),
    Messages(Vec<Message>),
    Channel(Channel),
    Channels(Vec<Channel>),
    User(User),
    PublicKey { user_id: String, public_key: String },
    Empty,
}

impl Reply {
    pub fn into_fields(self) -> serde_json::Result<Map<String, Value>> {
        let mut fields = Map::new();
        match self {
            Self::Auth { token, user } => {
                fields.insert("token".into(), Value::String(token));
                fields.insert("user".into(), serde_json::to_value(user)?);
            }
            Self::Message(message) => {
                fields.insert("message".into(), serde_json::to_value(message)?);
            }
            Self::Messages(messages) => {
                fields.insert("messages".into(), serde_json::to_value(messages)?);
            }
            Self::Channel(channel) => {
                fields.insert("channel".into(), serde_json::to_value(channel)?);
            }
            Self::Channels(channels) => {
                fields.insert("channels".into(), serde_json::to_value(channels)?);
            }
            Self::User(user) => {
                fields.insert("user".into(), serde_json::to_value(user)?);
            }
            Self::PublicKey { user_id, public_key } => {
                fields.insert("user_id".into(), Value::String(user_id));
                fields.insert("public_key".into(), Value::String(public_key));
            }
            Self::Empty => {}
        }
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_names_round_trip() {
        for kind in ActionKind::ALL {
            assert_eq!(kind.as_str().parse::<ActionKind>().unwrap(), kind);
        }
        assert!(matches!(
            "drop_tables".parse::<ActionKind>(),
            Err(ActionError::UnknownAction)
        ));
    }

    #[test]
    fn only_register_and_login_are_public() {
        let public: Vec<_> = ActionKind::ALL
            .into_iter()
            .filter(|k| !k.requires_auth())
            .collect();
        assert_eq!(public, vec![ActionKind::Register, ActionKind::Login]);
    }

    #[test]
    fn limit_defaults_and_clamps() {
        let Action::GetMessages(req) =
            Action::decode(ActionKind::GetMessages, json!({"other_user_id": "u1"})).unwrap()
        else {
            panic!("wrong variant");
        };
        assert_eq!(req.limit, DEFAULT_LIMIT);
        assert_eq!(clamp_limit(0), 1);
        assert_eq!(clamp_limit(10_000), MAX_LIMIT);
    }

    #[test]
    fn missing_field_is_invalid_request() {
        let err = Action::decode(ActionKind::SendMessage, json!({"to": "bob"})).unwrap_err();
        assert!(matches!(err, ActionError::InvalidRequest(_)));
    }

    #[test]
    fn payloadless_actions_ignore_payload() {
        let action = Action::decode(ActionKind::GetUserChannels, Value::Null).unwrap();
        assert_eq!(action.kind(), ActionKind::GetUserChannels);
    }

    #[test]
    fn credentials_are_redacted_in_debug() {
        let req = LoginRequest {
            username: "alice".into(),
            password: "hunter2".into(),
        };
        let rendered = format!("{:?}", req);
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn empty_reply_has_no_fields() {
        assert!(Reply::Empty.into_fields().unwrap().is_empty());
    }
}
