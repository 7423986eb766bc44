//! Message envelope exchanged between services.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

use crate::message_type::{ERROR, REPLY_TO};

/// Unique identifier for a message, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub Ulid);

impl MessageId {
    /// Create a new unique message ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a message ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error raised when a payload does not have the shape a handler expects.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("invalid {message_type} payload: {source}")]
    Shape {
        message_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// An immutable envelope routed by the bus.
///
/// Every field is fixed once [`MessageBuilder::build`] returns. Replies are
/// new messages built with [`Message::reply`] or [`Message::error_reply`],
/// which copy this message's id into the `replyTo` header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    from: String,
    to: String,
    #[serde(rename = "type")]
    message_type: String,
    payload: Value,
    timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<String, Value>,
}

impl Message {
    /// Start building a new message.
    pub fn builder() -> MessageBuilder {
        MessageBuilder::default()
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn headers(&self) -> &BTreeMap<String, Value> {
        &self.headers
    }

    pub fn header(&self, key: &str) -> Option<&Value> {
        self.headers.get(key)
    }

    /// The correlation id this message answers, if any.
    ///
    /// A `replyTo` header that is not a valid message id is treated as absent.
    pub fn reply_to(&self) -> Option<MessageId> {
        self.header(REPLY_TO)
            .and_then(Value::as_str)
            .and_then(|s| MessageId::parse(s).ok())
    }

    /// Check whether this is an `ERROR` message.
    pub fn is_error(&self) -> bool {
        self.message_type == ERROR
    }

    /// The payload as a string slice, if it is a JSON string.
    pub fn payload_str(&self) -> Option<&str> {
        self.payload.as_str()
    }

    /// Decode the payload into a typed value.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, PayloadError> {
        T::deserialize(&self.payload).map_err(|source| PayloadError::Shape {
            message_type: self.message_type.clone(),
            source,
        })
    }

    /// Build a reply to this message from `from`, correlated through `replyTo`.
    pub fn reply(
        &self,
        from: impl Into<String>,
        message_type: impl Into<String>,
        payload: impl Into<Value>,
    ) -> Message {
        Message::builder()
            .from(from)
            .to(self.from.clone())
            .message_type(message_type)
            .payload(payload)
            .header(REPLY_TO, self.id.to_string())
            .build()
    }

    /// Build an `ERROR` reply carrying a human-readable description.
    pub fn error_reply(&self, from: impl Into<String>, error: impl Into<String>) -> Message {
        self.reply(from, ERROR, Value::String(error.into()))
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Message[id={}, from={}, to={}, type={}]",
            self.id, self.from, self.to, self.message_type
        )
    }
}

/// Builder for [`Message`].
///
/// The id and timestamp are assigned when the builder is created.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    id: MessageId,
    from: String,
    to: String,
    message_type: String,
    payload: Value,
    timestamp: DateTime<Utc>,
    headers: BTreeMap<String, Value>,
}

impl Default for MessageBuilder {
    fn default() -> Self {
        Self {
            id: MessageId::new(),
            from: String::new(),
            to: String::new(),
            message_type: String::new(),
            payload: Value::Null,
            timestamp: Utc::now(),
            headers: BTreeMap::new(),
        }
    }
}

impl MessageBuilder {
    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }

    pub fn to(mut self, to: impl Into<String>) -> Self {
        self.to = to.into();
        self
    }

    pub fn message_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = message_type.into();
        self
    }

    pub fn payload(mut self, payload: impl Into<Value>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Serialize a typed value as the payload.
    pub fn json_payload<T: Serialize>(mut self, payload: &T) -> Result<Self, PayloadError> {
        self.payload = serde_json::to_value(payload)?;
        Ok(self)
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Message {
        Message {
            id: self.id,
            from: self.from,
            to: self.to,
            message_type: self.message_type,
            payload: self.payload,
            timestamp: self.timestamp,
            headers: self.headers,
        }
    }
}
