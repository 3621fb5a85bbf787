//! Message types for queue store operations including core domain identifiers.

use crate::error::ValidationError;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Opaque message body. The serialized form is the store's concern.
pub type Payload = serde_json::Value;

/// Suffix appended to a queue name to form its dead letter queue
pub const DEAD_LETTER_SUFFIX: &str = "_dlq";

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated queue name with length and character restrictions
///
/// PGMQ stores every queue in a table named after the queue, so names are
/// limited to ASCII alphanumerics and underscores. The length limit leaves room
/// for the dead letter suffix inside PostgreSQL's identifier limit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueueName(String);

impl QueueName {
    /// Maximum length of a queue name
    pub const MAX_LEN: usize = 43;

    /// Create new queue name with validation
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        Self::validate(&name, Self::MAX_LEN)?;
        Ok(Self(name))
    }

    fn validate(name: &str, max_len: usize) -> Result<(), ValidationError> {
        if name.is_empty() || name.len() > max_len {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: format!("must be 1-{} characters", max_len),
            });
        }

        if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only ASCII alphanumeric characters and underscores allowed".to_string(),
            });
        }

        Ok(())
    }

    /// Name of the companion dead letter queue (`<name>_dlq`)
    pub fn dead_letter_queue(&self) -> QueueName {
        Self(format!("{}{}", self.0, DEAD_LETTER_SUFFIX))
    }

    /// Check whether this name refers to a dead letter queue
    pub fn is_dead_letter_queue(&self) -> bool {
        self.0.ends_with(DEAD_LETTER_SUFFIX)
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for QueueName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        // Dead letter queue names arrive through the same path, so the
        // suffix gets its own allowance.
        Self::validate(&value, Self::MAX_LEN + DEAD_LETTER_SUFFIX.len())?;
        Ok(Self(value))
    }
}

impl From<QueueName> for String {
    fn from(value: QueueName) -> Self {
        value.0
    }
}

/// Store-assigned message identifier, monotonic within a queue
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MessageId(i64);

impl MessageId {
    /// Wrap a raw store identifier
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw identifier
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        s.parse::<i64>()
            .map(Self)
            .map_err(|e| ValidationError::InvalidFormat {
                field: "message_id".to_string(),
                message: e.to_string(),
            })
    }
}

impl From<i64> for MessageId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
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

    /// Timestamp shifted forward by the given duration
    pub fn plus(&self, duration: Duration) -> Self {
        Self(self.0 + duration)
    }

    /// Time elapsed since this timestamp (zero if it lies in the future)
    pub fn elapsed(&self) -> Duration {
        let elapsed = Utc::now() - self.0;
        if elapsed < Duration::zero() {
            Duration::zero()
        } else {
            elapsed
        }
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

impl FromStr for Timestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dt = s.parse::<DateTime<Utc>>()?;
        Ok(Self::from_datetime(dt))
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// A message held by the store, as returned from a lease or lookup
///
/// The core only ever holds transient copies; the store owns the
/// authoritative state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Store-assigned identifier
    pub id: MessageId,
    /// Number of times the message has been leased (0 before the first lease)
    pub delivery_count: u32,
    /// When the message was enqueued
    pub enqueued_at: Timestamp,
    /// When the message becomes visible to other consumers again
    pub visible_at: Timestamp,
    /// Message body
    pub payload: Payload,
}

impl Message {
    /// Deserialize the payload into a concrete type
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// Check whether the current lease (if any) has expired
    pub fn is_visible(&self) -> bool {
        Timestamp::now() >= self.visible_at
    }
}

/// Best-effort snapshot of a queue's state
///
/// Not transactionally consistent with concurrent send/read calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub queue_name: QueueName,
    /// Messages in the queue, leased or not
    pub queue_length: u64,
    /// Messages currently available for leasing
    pub visible_length: u64,
    /// Messages ever sent to the queue
    pub total_messages: u64,
    /// Messages archived after successful processing
    pub archived_messages: u64,
    pub oldest_message_age_seconds: Option<u64>,
    pub newest_message_age_seconds: Option<u64>,
    pub scrape_time: Timestamp,
}

impl QueueMetrics {
    /// Metrics for a queue with no history
    pub fn empty(queue_name: QueueName) -> Self {
        Self {
            queue_name,
            queue_length: 0,
            visible_length: 0,
            total_messages: 0,
            archived_messages: 0,
            oldest_message_age_seconds: None,
            newest_message_age_seconds: None,
            scrape_time: Timestamp::now(),
        }
    }

    /// Messages currently leased by some consumer
    pub fn leased_length(&self) -> u64 {
        self.queue_length.saturating_sub(self.visible_length)
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
