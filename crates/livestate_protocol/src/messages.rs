//! Protocol messages for shared state.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A state change delivered over the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEvent {
    /// Key that changed.
    pub key: String,
    /// New value.
    pub value: Value,
}

impl StateEvent {
    /// Creates a new state event.
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    /// Encodes to a JSON string.
    pub fn encode(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Response to a keyed read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadResponse {
    /// Requested key.
    pub key: String,
    /// Stored value, `null` when the key was never written.
    #[serde(default)]
    pub value: Value,
}

impl ReadResponse {
    /// Creates a read response, mapping an absent value to `null`.
    pub fn new(key: impl Into<String>, value: Option<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.unwrap_or(Value::Null),
        }
    }

    /// Encodes to JSON bytes.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON bytes.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Body of a keyed write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    /// Key to write.
    pub key: String,
    /// Value to store.
    pub value: Value,
}

impl WriteRequest {
    /// Creates a new write request.
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    /// Encodes to JSON bytes.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON bytes.
    ///
    /// The body must be valid JSON whose `key` field is a string. A missing
    /// `value` field is stored as `null`.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let body: Value = serde_json::from_slice(bytes)?;
        let key = body
            .get("key")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::InvalidKey)?
            .to_string();
        let value = body.get("value").cloned().unwrap_or(Value::Null);

        Ok(Self { key, value })
    }
}

/// Response to a successful keyed write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteResponse {
    /// Always true for a stored write.
    pub success: bool,
    /// Key that was written.
    pub key: String,
    /// Value that was stored.
    pub value: Value,
}

impl WriteResponse {
    /// Creates a response confirming a stored write.
    pub fn confirmed(key: impl Into<String>, value: Value) -> Self {
        Self {
            success: true,
            key: key.into(),
            value,
        }
    }

    /// Encodes to JSON bytes.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON bytes.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Body of every client-error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error.
    pub error: String,
}

impl ErrorResponse {
    /// Creates an error response.
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }

    /// Encodes to JSON bytes.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// The legacy boolean-only event and read body, `{"isToggled": bool}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleEvent {
    /// Current toggle state.
    pub is_toggled: bool,
}

/// Response to a successful legacy toggle write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleResponse {
    /// Always true for a stored write.
    pub success: bool,
    /// Stored toggle state.
    pub is_toggled: bool,
}

/// A decoded push-channel payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    /// The `{"connected": true}` greeting sent when a stream opens.
    Connected,
    /// A keyed state change.
    State(StateEvent),
    /// A legacy boolean toggle change.
    Toggle(ToggleEvent),
    /// Well-formed JSON of no known shape.
    Unknown(Value),
}

impl ChannelMessage {
    /// Parses the data of one push-channel event.
    ///
    /// Invalid JSON is an error. An object with a non-empty string `key` and
    /// a `value` field is a state change, even when `value` is `null`.
    pub fn parse(data: &str) -> ProtocolResult<Self> {
        let payload: Value = serde_json::from_str(data)?;

        let Value::Object(fields) = &payload else {
            return Ok(ChannelMessage::Unknown(payload));
        };

        if let (Some(Value::String(key)), Some(value)) = (fields.get("key"), fields.get("value")) {
            if !key.is_empty() {
                return Ok(ChannelMessage::State(StateEvent::new(key.clone(), value.clone())));
            }
        }

        if let Some(Value::Bool(is_toggled)) = fields.get("isToggled") {
            return Ok(ChannelMessage::Toggle(ToggleEvent {
                is_toggled: *is_toggled,
            }));
        }

        if fields.get("connected") == Some(&Value::Bool(true)) {
            return Ok(ChannelMessage::Connected);
        }

        Ok(ChannelMessage::Unknown(payload))
    }
}
