//! Job view handed to handlers.

use queue_store::{Message, MessageId, Payload, QueueName, Timestamp};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A leased message as seen by a handler
///
/// Built once per lease and never persisted. `attempts_made` is the store's
/// delivery count, so it already includes the current attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: MessageId,
    pub data: Payload,
    pub attempts_made: u32,
    pub queue: QueueName,
    pub enqueued_at: Timestamp,
}

impl Job {
    /// Build the job for a message leased from `queue`
    pub fn from_message(queue: &QueueName, message: &Message) -> Self {
        Self {
            id: message.id,
            data: message.payload.clone(),
            attempts_made: message.delivery_count,
            queue: queue.clone(),
            enqueued_at: message.enqueued_at,
        }
    }

    /// Deserialize the job data into a concrete type
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.clone())
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
