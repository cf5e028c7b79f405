use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::api::{ActionKind, Reply};
use crate::error::ActionError;

/// One request frame: `{action, token?, data?, ...scalar fields}`.
///
/// `data`, when present, is a JSON-encoded payload object. Older clients put
/// scalar arguments (`channel_id`, `limit`, ...) at the top level instead, so
/// those are kept in `fields`.
#[derive(Clone, Serialize, Deserialize)]
pub struct WireRequest {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl WireRequest {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            action: kind.as_str().to_string(),
            token: None,
            data: None,
            fields: Map::new(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_data<T: Serialize>(mut self, payload: &T) -> serde_json::Result<Self> {
        self.data = Some(serde_json::to_string(payload)?);
        Ok(self)
    }

    /// The action payload as a JSON object.
    pub fn payload(&self) -> Result<Value, ActionError> {
        match &self.data {
            Some(data) => {
                let value: Value =
                    serde_json::from_str(data).map_err(ActionError::invalid_request)?;
                if !value.is_object() {
                    return Err(ActionError::invalid_request("data is not a JSON object"));
                }
                Ok(value)
            }
            None => Ok(Value::Object(self.fields.clone())),
        }
    }
}

impl fmt::Debug for WireRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WireRequest")
            .field("action", &self.action)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("data_len", &self.data.as_ref().map(String::len))
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// One response frame: `{success, error?, ...action-specific fields}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl WireResponse {
    pub fn ok(reply: Reply) -> serde_json::Result<Self> {
        Ok(Self {
            success: true,
            error: None,
            fields: reply.into_fields()?,
        })
    }

    pub fn failure(err: &ActionError) -> Self {
        Self {
            success: false,
            error: Some(err.to_string()),
            fields: Map::new(),
        }
    }

    /// Remove and decode one action-specific field.
    pub fn take<T: DeserializeOwned>(&mut self, key: &str) -> serde_json::Result<T> {
        let value = self.fields.remove(key).unwrap_or(Value::Null);
        serde_json::from_value(value)
    }
}
