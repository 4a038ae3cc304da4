//! Message envelope and its identifiers.
//!
//! [`MessageEnvelope`] is the unit of transport: identity, type, trace id,
//! raw payload bytes, send timestamp, and the delivery reference a queue
//! attaches while the message is in flight.

use crate::error::SerializationError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;

/// Longest payload preview rendered by `Display`
const PREVIEW_LENGTH: usize = 50;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for messages within the queue system
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Timestamp offset into the future by a std duration
    pub fn after(&self, duration: std::time::Duration) -> Self {
        let delta = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
        Self(self.0.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

/// Process-local lock token issued by the memory queue on receive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockToken(u64);

impl LockToken {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery reference attached to an in-flight message.
///
/// Set by the queue when the message is handed to a consumer and cleared
/// when the consumer finalizes it. Applications never set it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageReference {
    /// Lock token from the memory queue's lock table
    Lock(LockToken),
    /// Transport-specific cursor (delivery tag, receipt handle, offset)
    Transport(String),
}

impl MessageReference {
    /// Get the lock token if this reference is one
    pub fn lock_token(&self) -> Option<LockToken> {
        match self {
            Self::Lock(token) => Some(*token),
            Self::Transport(_) => None,
        }
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// A message travelling through a queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    #[serde(default)]
    message_id: MessageId,
    #[serde(alias = "correlation_id", default)]
    trace_id: Option<String>,
    #[serde(default)]
    message_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sent_time: Option<Timestamp>,
    #[serde(with = "bytes_serde", default)]
    message: Bytes,
    #[serde(skip)]
    reference: Option<MessageReference>,
}

/// Custom serialization for Bytes
mod bytes_serde {
    use base64::{engine::general_purpose, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = general_purpose::STANDARD.encode(bytes);
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)?;
        Ok(Bytes::from(decoded))
    }
}

impl MessageEnvelope {
    /// Create a new envelope with a generated message id.
    ///
    /// Byte payloads are stored verbatim and strings as UTF-8. Use
    /// [`MessageEnvelope::from_object`] for structured values.
    pub fn new(trace_id: Option<&str>, message_type: &str, payload: impl Into<Bytes>) -> Self {
        Self {
            message_id: MessageId::new(),
            trace_id: trace_id.map(str::to_string),
            message_type: message_type.to_string(),
            sent_time: None,
            message: payload.into(),
            reference: None,
        }
    }

    /// Create a new envelope whose payload is the JSON form of `value`
    pub fn from_object<T: Serialize + ?Sized>(
        trace_id: Option<&str>,
        message_type: &str,
        value: &T,
    ) -> Result<Self, SerializationError> {
        let payload = serde_json::to_vec(value)?;
        Ok(Self::new(trace_id, message_type, payload))
    }

    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    /// Replace the message id, e.g. with a broker-assigned one
    pub fn set_message_id(&mut self, message_id: MessageId) {
        self.message_id = message_id;
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    /// Raw payload bytes
    pub fn message(&self) -> &Bytes {
        &self.message
    }

    /// Replace the raw payload bytes
    pub fn set_message(&mut self, payload: impl Into<Bytes>) {
        self.message = payload.into();
    }

    pub fn sent_time(&self) -> Option<Timestamp> {
        self.sent_time
    }

    /// Stamp the send time. Queues call this; applications should not.
    pub fn set_sent_time(&mut self, sent_time: Timestamp) {
        self.sent_time = Some(sent_time);
    }

    pub fn reference(&self) -> Option<&MessageReference> {
        self.reference.as_ref()
    }

    pub fn set_reference(&mut self, reference: Option<MessageReference>) {
        self.reference = reference;
    }

    /// True while a queue holds a delivery reference for this message
    pub fn is_in_flight(&self) -> bool {
        self.reference.is_some()
    }

    /// Decode the payload as UTF-8 text
    pub fn as_string(&self) -> Result<String, SerializationError> {
        String::from_utf8(self.message.to_vec()).map_err(|_| SerializationError::InvalidUtf8)
    }

    /// Replace the payload with UTF-8 text
    pub fn set_as_string(&mut self, value: &str) {
        self.message = Bytes::copy_from_slice(value.as_bytes());
    }

    /// Decode the payload as JSON into `T`
    pub fn as_object<T: DeserializeOwned>(&self) -> Result<T, SerializationError> {
        Ok(serde_json::from_slice(&self.message)?)
    }

    /// Replace the payload with the JSON form of `value`
    pub fn set_as_object<T: Serialize + ?Sized>(
        &mut self,
        value: &T,
    ) -> Result<(), SerializationError> {
        self.message = Bytes::from(serde_json::to_vec(value)?);
        Ok(())
    }

    /// Serialize into the canonical JSON wire form (payload as base64)
    pub fn to_wire(&self) -> Result<Vec<u8>, SerializationError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse the canonical JSON wire form
    pub fn from_wire(bytes: &[u8]) -> Result<Self, SerializationError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl fmt::Display for MessageEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = String::from_utf8_lossy(&self.message);
        let preview: String = text.chars().take(PREVIEW_LENGTH).collect();
        let ellipsis = if text.chars().count() > PREVIEW_LENGTH {
            "..."
        } else {
            ""
        };

        write!(
            f,
            "[{},{},{}{}]",
            self.message_id,
            if self.message_type.is_empty() {
                "---"
            } else {
                &self.message_type
            },
            preview,
            ellipsis
        )
    }
}
