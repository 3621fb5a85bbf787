//! # Dead-Letter Router
//!
//! Moves permanently failed messages into `<queue>_dlq` and back.
//!
//! A dead-lettered message is wrapped in a [`DeadLetterEnvelope`] carrying the
//! original payload, the origin queue, the last error and the attempt count.
//! The envelope is serialized in camelCase so that envelopes written by other
//! PGMQ consumers can be inspected and requeued.
//!
//! Moving a message is a two-step operation: the envelope is sent to the dead
//! letter queue first, then the original is deleted. If the send fails nothing
//! is deleted, and the message stays leased until its lease expires.

use crate::error::{ConsumerError, HandlerError};
use queue_store::{
    Message, MessageId, Payload, QueueName, SharedQueueStore, StoreError, Timestamp,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

#[cfg(test)]
#[path = "dead_letter_tests.rs"]
mod tests;

// ============================================================================
// Envelope Types
// ============================================================================

/// Message stored in a dead letter queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEnvelope {
    /// Payload of the failed message, unchanged
    pub original_message: Payload,
    pub original_queue: QueueName,
    pub error: FailureDetails,
    /// Delivery count when the message was dead-lettered
    pub attempts_made: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_message_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<Timestamp>,
}

/// Last error recorded for a dead-lettered message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetails {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl From<&HandlerError> for FailureDetails {
    fn from(error: &HandlerError) -> Self {
        Self {
            message: error.message.clone(),
            stack: error.details.clone(),
        }
    }
}

impl DeadLetterEnvelope {
    /// Envelope for `message` failing on `queue` with `error`
    pub fn new(
        queue: &QueueName,
        message: &Message,
        error: &HandlerError,
        attempts_made: u32,
    ) -> Self {
        Self {
            original_message: message.payload.clone(),
            original_queue: queue.clone(),
            error: error.into(),
            attempts_made,
            original_message_id: Some(message.id),
            failed_at: Some(Timestamp::now()),
        }
    }
}

/// An entry of a dead letter queue
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    /// Id of the entry in the dead letter queue
    pub id: MessageId,
    pub envelope: DeadLetterEnvelope,
    /// When the entry was written to the dead letter queue
    pub enqueued_at: Timestamp,
}

impl DeadLetter {
    fn from_message(dlq: &QueueName, message: &Message) -> Result<Self, ConsumerError> {
        let envelope = message
            .payload_as::<DeadLetterEnvelope>()
            .map_err(|e| ConsumerError::InvalidEnvelope {
                queue: dlq.clone(),
                message_id: message.id,
                message: e.to_string(),
            })?;

        Ok(Self {
            id: message.id,
            envelope,
            enqueued_at: message.enqueued_at,
        })
    }
}

/// Dead letter moved back onto its origin queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequeuedDeadLetter {
    pub dead_letter_id: MessageId,
    pub message_id: MessageId,
}

/// Dead letter that could not be requeued
#[derive(Debug)]
pub struct FailedRequeue {
    pub dead_letter_id: MessageId,
    pub error: ConsumerError,
}

/// Outcome of a batch requeue; every id lands in exactly one list
#[derive(Debug, Default)]
pub struct RequeueBatchResult {
    pub requeued: Vec<RequeuedDeadLetter>,
    pub failed: Vec<FailedRequeue>,
}

impl RequeueBatchResult {
    /// Check if every id was requeued
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn has_any_success(&self) -> bool {
        !self.requeued.is_empty()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Moves messages between queues and their dead letter queues
#[derive(Clone)]
pub struct DeadLetterRouter {
    store: SharedQueueStore,
}

impl DeadLetterRouter {
    pub fn new(store: SharedQueueStore) -> Self {
        Self { store }
    }

    /// Dead-letter a message by id
    ///
    /// Returns `None` if the message is no longer in `queue`.
    pub async fn move_to_dead_letter(
        &self,
        queue: &QueueName,
        message_id: MessageId,
        error: &HandlerError,
        attempts_made: u32,
    ) -> Result<Option<MessageId>, ConsumerError> {
        let Some(message) = self.store.get(queue, message_id).await? else {
            warn!(
                queue = %queue,
                message_id = %message_id,
                "Message to dead-letter no longer exists"
            );
            return Ok(None);
        };

        let envelope = DeadLetterEnvelope::new(queue, &message, error, attempts_made);
        self.route(queue, message_id, envelope).await.map(Some)
    }

    /// Dead-letter a message the caller currently holds a lease on
    pub async fn dead_letter_message(
        &self,
        queue: &QueueName,
        message: &Message,
        error: &HandlerError,
    ) -> Result<MessageId, ConsumerError> {
        let envelope = DeadLetterEnvelope::new(queue, message, error, message.delivery_count);
        self.route(queue, message.id, envelope).await
    }

    async fn route(
        &self,
        queue: &QueueName,
        message_id: MessageId,
        envelope: DeadLetterEnvelope,
    ) -> Result<MessageId, ConsumerError> {
        let dlq = queue.dead_letter_queue();
        let attempts = envelope.attempts_made;
        let payload = serde_json::to_value(&envelope).map_err(StoreError::from)?;

        let dead_letter_id = match self.store.send(&dlq, &payload).await {
            Ok(id) => id,
            Err(e) => {
                error!(
                    queue = %queue,
                    message_id = %message_id,
                    error = %e,
                    "Failed to write dead letter; message left for redelivery"
                );
                return Err(e.into());
            }
        };

        if !self.store.delete(queue, message_id).await? {
            warn!(
                queue = %queue,
                message_id = %message_id,
                "Dead-lettered message was already gone from its queue"
            );
        }

        info!(
            queue = %queue,
            message_id = %message_id,
            dead_letter_id = %dead_letter_id,
            attempts = attempts,
            "Moved message to dead letter queue"
        );
        Ok(dead_letter_id)
    }

    /// List up to `limit` dead letters for `queue`, oldest first
    ///
    /// Entries that are not valid envelopes are skipped.
    pub async fn get_dead_letters(
        &self,
        queue: &QueueName,
        limit: u32,
    ) -> Result<Vec<DeadLetter>, ConsumerError> {
        let dlq = queue.dead_letter_queue();
        let messages = self.store.list(&dlq, limit).await?;

        Ok(messages
            .iter()
            .filter_map(|message| match DeadLetter::from_message(&dlq, message) {
                Ok(dead_letter) => Some(dead_letter),
                Err(e) => {
                    warn!(queue = %dlq, message_id = %message.id, error = %e, "Skipping malformed dead letter");
                    None
                }
            })
            .collect())
    }

    /// Send a dead letter's original payload back to `queue` as a new message
    pub async fn requeue_dead_letter(
        &self,
        queue: &QueueName,
        dead_letter_id: MessageId,
    ) -> Result<MessageId, ConsumerError> {
        let dlq = queue.dead_letter_queue();
        let message = self
            .store
            .get(&dlq, dead_letter_id)
            .await?
            .ok_or_else(|| ConsumerError::DeadLetterNotFound {
                queue: dlq.clone(),
                message_id: dead_letter_id,
            })?;

        let dead_letter = DeadLetter::from_message(&dlq, &message)?;
        let message_id = self
            .store
            .send(queue, &dead_letter.envelope.original_message)
            .await?;

        if !self.store.delete(&dlq, dead_letter_id).await? {
            warn!(
                queue = %dlq,
                dead_letter_id = %dead_letter_id,
                "Requeued dead letter was already removed"
            );
        }

        info!(
            queue = %queue,
            dead_letter_id = %dead_letter_id,
            message_id = %message_id,
            "Requeued dead letter"
        );
        Ok(message_id)
    }

    /// Requeue several dead letters, each independently of the others
    pub async fn requeue_dead_letter_batch(
        &self,
        queue: &QueueName,
        dead_letter_ids: &[MessageId],
    ) -> RequeueBatchResult {
        let mut result = RequeueBatchResult::default();

        for &dead_letter_id in dead_letter_ids {
            match self.requeue_dead_letter(queue, dead_letter_id).await {
                Ok(message_id) => result.requeued.push(RequeuedDeadLetter {
                    dead_letter_id,
                    message_id,
                }),
                Err(error) => {
                    warn!(
                        queue = %queue,
                        dead_letter_id = %dead_letter_id,
                        error = %error,
                        "Failed to requeue dead letter"
                    );
                    result.failed.push(FailedRequeue {
                        dead_letter_id,
                        error,
                    });
                }
            }
        }

        result
    }

    /// Delete every dead letter for `queue`, returning how many were removed
    pub async fn purge_dead_letters(&self, queue: &QueueName) -> Result<u64, ConsumerError> {
        let dlq = queue.dead_letter_queue();
        let purged = self.store.purge_queue(&dlq).await?;
        warn!(queue = %dlq, purged = purged, "Purged dead letter queue");
        Ok(purged)
    }
}
