//! In-memory queue store implementation for testing and development.
//!
//! This module provides a fully functional in-memory store that:
//! - Implements leases with visibility timeouts against the wall clock
//! - Maintains per-queue delivery counts the way PGMQ does
//! - Keeps an archive history for successfully processed messages
//! - Provides thread-safe concurrent access
//!
//! This provider is intended for:
//! - Unit and integration testing of queue consumers
//! - Development and prototyping
//! - Reference behaviour for database-backed stores

use crate::client::QueueStore;
use crate::error::StoreError;
use crate::message::{Message, MessageId, Payload, QueueMetrics, QueueName, Timestamp};
use crate::provider::ProviderType;
use async_trait::async_trait;
use chrono::Duration;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Thread-safe storage for all queues
#[derive(Default)]
struct StoreState {
    queues: HashMap<QueueName, InMemoryQueue>,
}

impl StoreState {
    fn queue(&self, name: &QueueName) -> Result<&InMemoryQueue, StoreError> {
        self.queues
            .get(name)
            .ok_or_else(|| StoreError::QueueNotFound {
                queue_name: name.to_string(),
            })
    }

    fn queue_mut(&mut self, name: &QueueName) -> Result<&mut InMemoryQueue, StoreError> {
        self.queues
            .get_mut(name)
            .ok_or_else(|| StoreError::QueueNotFound {
                queue_name: name.to_string(),
            })
    }
}

/// Internal state for a single queue
#[derive(Default)]
struct InMemoryQueue {
    /// Last assigned message id
    last_id: i64,
    /// Live messages, ordered by id
    messages: BTreeMap<MessageId, StoredMessage>,
    /// Messages archived after processing
    archive: Vec<StoredMessage>,
    /// Messages ever sent
    total_messages: u64,
}

impl InMemoryQueue {
    fn enqueue(&mut self, payload: Payload) -> MessageId {
        self.last_id += 1;
        self.total_messages += 1;

        let id = MessageId::new(self.last_id);
        let now = Timestamp::now();
        self.messages.insert(
            id,
            StoredMessage {
                id,
                payload,
                delivery_count: 0,
                enqueued_at: now,
                visible_at: now,
            },
        );
        id
    }

    fn archive(&mut self, id: MessageId) -> bool {
        match self.messages.remove(&id) {
            Some(message) => {
                self.archive.push(message);
                true
            }
            None => false,
        }
    }
}

/// A message stored in the queue with lease metadata
#[derive(Clone)]
struct StoredMessage {
    id: MessageId,
    payload: Payload,
    delivery_count: u32,
    enqueued_at: Timestamp,
    visible_at: Timestamp,
}

impl StoredMessage {
    fn is_visible_at(&self, now: &Timestamp) -> bool {
        *now >= self.visible_at
    }

    fn to_message(&self) -> Message {
        Message {
            id: self.id,
            delivery_count: self.delivery_count,
            enqueued_at: self.enqueued_at,
            visible_at: self.visible_at,
            payload: self.payload.clone(),
        }
    }
}

// ============================================================================
// InMemoryQueueStore
// ============================================================================

/// In-memory queue store implementation
///
/// Cloning yields another handle to the same storage.
#[derive(Clone, Default)]
pub struct InMemoryQueueStore {
    storage: Arc<RwLock<StoreState>>,
}

impl InMemoryQueueStore {
    /// Create new, empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    fn read_state(&self) -> RwLockReadGuard<'_, StoreState> {
        self.storage.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.storage.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ids of archived messages in archive order
    pub fn archived_ids(&self, queue: &QueueName) -> Result<Vec<MessageId>, StoreError> {
        let state = self.read_state();
        Ok(state
            .queue(queue)?
            .archive
            .iter()
            .map(|archived| archived.id)
            .collect())
    }

    /// Names of all existing queues, dead letter queues included
    pub fn queue_names(&self) -> Vec<QueueName> {
        let state = self.read_state();
        let mut names: Vec<QueueName> = state.queues.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn create_queue(&self, queue: &QueueName) -> Result<(), StoreError> {
        let mut state = self.write_state();
        state.queues.entry(queue.clone()).or_default();
        state.queues.entry(queue.dead_letter_queue()).or_default();
        Ok(())
    }

    async fn drop_queue(&self, queue: &QueueName) -> Result<(), StoreError> {
        let mut state = self.write_state();
        state.queue(queue)?;
        state.queues.remove(&queue.dead_letter_queue());
        state.queues.remove(queue);
        Ok(())
    }

    async fn send(&self, queue: &QueueName, payload: &Payload) -> Result<MessageId, StoreError> {
        let mut state = self.write_state();
        Ok(state.queue_mut(queue)?.enqueue(payload.clone()))
    }

    async fn send_batch(
        &self,
        queue: &QueueName,
        payloads: &[Payload],
    ) -> Result<Vec<MessageId>, StoreError> {
        let mut state = self.write_state();
        let queue = state.queue_mut(queue)?;
        Ok(payloads
            .iter()
            .map(|payload| queue.enqueue(payload.clone()))
            .collect())
    }

    async fn read(
        &self,
        queue: &QueueName,
        visibility_timeout: Duration,
        quantity: u32,
    ) -> Result<Vec<Message>, StoreError> {
        let mut state = self.write_state();
        let queue = state.queue_mut(queue)?;

        let now = Timestamp::now();
        let lease_until = now.plus(visibility_timeout);

        Ok(queue
            .messages
            .values_mut()
            .filter(|message| message.is_visible_at(&now))
            .take(quantity as usize)
            .map(|message| {
                message.delivery_count += 1;
                message.visible_at = lease_until;
                message.to_message()
            })
            .collect())
    }

    async fn pop(&self, queue: &QueueName) -> Result<Option<Message>, StoreError> {
        let mut state = self.write_state();
        let queue = state.queue_mut(queue)?;

        let now = Timestamp::now();
        let next = queue
            .messages
            .values()
            .find(|message| message.is_visible_at(&now))
            .map(|message| message.id);

        Ok(next
            .and_then(|id| queue.messages.remove(&id))
            .map(|message| message.to_message()))
    }

    async fn archive(&self, queue: &QueueName, id: MessageId) -> Result<bool, StoreError> {
        let mut state = self.write_state();
        Ok(state.queue_mut(queue)?.archive(id))
    }

    async fn archive_batch(
        &self,
        queue: &QueueName,
        ids: &[MessageId],
    ) -> Result<Vec<MessageId>, StoreError> {
        let mut state = self.write_state();
        let queue = state.queue_mut(queue)?;
        Ok(ids.iter().copied().filter(|id| queue.archive(*id)).collect())
    }

    async fn delete(&self, queue: &QueueName, id: MessageId) -> Result<bool, StoreError> {
        let mut state = self.write_state();
        Ok(state.queue_mut(queue)?.messages.remove(&id).is_some())
    }

    async fn delete_batch(
        &self,
        queue: &QueueName,
        ids: &[MessageId],
    ) -> Result<Vec<MessageId>, StoreError> {
        let mut state = self.write_state();
        let queue = state.queue_mut(queue)?;
        Ok(ids
            .iter()
            .copied()
            .filter(|id| queue.messages.remove(id).is_some())
            .collect())
    }

    async fn get(&self, queue: &QueueName, id: MessageId) -> Result<Option<Message>, StoreError> {
        let state = self.read_state();
        Ok(state
            .queue(queue)?
            .messages
            .get(&id)
            .map(StoredMessage::to_message))
    }

    async fn list(&self, queue: &QueueName, limit: u32) -> Result<Vec<Message>, StoreError> {
        let state = self.read_state();
        Ok(state
            .queue(queue)?
            .messages
            .values()
            .take(limit as usize)
            .map(StoredMessage::to_message)
            .collect())
    }

    async fn purge_queue(&self, queue: &QueueName) -> Result<u64, StoreError> {
        let mut state = self.write_state();
        let queue = state.queue_mut(queue)?;
        let purged = queue.messages.len() as u64;
        queue.messages.clear();
        Ok(purged)
    }

    async fn metrics(&self, queue_name: &QueueName) -> Result<QueueMetrics, StoreError> {
        let state = self.read_state();
        let queue = state.queue(queue_name)?;

        let now = Timestamp::now();
        let visible_length = queue
            .messages
            .values()
            .filter(|message| message.is_visible_at(&now))
            .count() as u64;

        let age_seconds = |message: &StoredMessage| message.enqueued_at.elapsed().num_seconds() as u64;

        Ok(QueueMetrics {
            queue_name: queue_name.clone(),
            queue_length: queue.messages.len() as u64,
            visible_length,
            total_messages: queue.total_messages,
            archived_messages: queue.archive.len() as u64,
            // Ids are assigned in enqueue order, so the first entry is the oldest
            oldest_message_age_seconds: queue.messages.values().next().map(age_seconds),
            newest_message_age_seconds: queue.messages.values().next_back().map(age_seconds),
            scrape_time: now,
        })
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}
