//! Store client trait for lease-based queue operations.
//!
//! A [`QueueStore`] is a thin operation set over a durable queue. It holds no
//! retry logic: every failure is reported upward as a [`StoreError`].

use crate::error::StoreError;
use crate::message::{Message, MessageId, Payload, QueueMetrics, QueueName};
use crate::provider::{ProviderType, StoreConfig};
use crate::providers::InMemoryQueueStore;
use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Operations offered by a lease-based queue store
///
/// The only concurrency guarantee assumed of implementations is that a leased
/// message stays invisible to other `read` calls until its lease expires or it
/// is archived or deleted.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Create a queue and its dead letter queue
    ///
    /// Succeeds if either already exists.
    async fn create_queue(&self, queue: &QueueName) -> Result<(), StoreError>;

    /// Drop the dead letter queue, then the queue itself
    async fn drop_queue(&self, queue: &QueueName) -> Result<(), StoreError>;

    /// Send single message to queue
    async fn send(&self, queue: &QueueName, payload: &Payload) -> Result<MessageId, StoreError>;

    /// Send multiple messages, returning ids in input order
    async fn send_batch(
        &self,
        queue: &QueueName,
        payloads: &[Payload],
    ) -> Result<Vec<MessageId>, StoreError>;

    /// Lease up to `quantity` visible messages for `visibility_timeout`
    ///
    /// Returns an empty list when nothing is available; never waits for
    /// messages to arrive.
    async fn read(
        &self,
        queue: &QueueName,
        visibility_timeout: Duration,
        quantity: u32,
    ) -> Result<Vec<Message>, StoreError>;

    /// Lease and delete a single message in one step
    async fn pop(&self, queue: &QueueName) -> Result<Option<Message>, StoreError>;

    /// Move a message to the archive; `false` if no such message exists
    async fn archive(&self, queue: &QueueName, id: MessageId) -> Result<bool, StoreError>;

    /// Archive several messages, returning the ids that were archived
    async fn archive_batch(
        &self,
        queue: &QueueName,
        ids: &[MessageId],
    ) -> Result<Vec<MessageId>, StoreError>;

    /// Permanently remove a message; `false` if no such message exists
    async fn delete(&self, queue: &QueueName, id: MessageId) -> Result<bool, StoreError>;

    /// Permanently remove several messages, returning the ids that were removed
    async fn delete_batch(
        &self,
        queue: &QueueName,
        ids: &[MessageId],
    ) -> Result<Vec<MessageId>, StoreError>;

    /// Look up a message without leasing it
    async fn get(&self, queue: &QueueName, id: MessageId) -> Result<Option<Message>, StoreError>;

    /// List up to `limit` messages in id order without leasing them
    async fn list(&self, queue: &QueueName, limit: u32) -> Result<Vec<Message>, StoreError>;

    /// Delete every message in the queue, returning how many were removed
    async fn purge_queue(&self, queue: &QueueName) -> Result<u64, StoreError>;

    /// Snapshot of queue counters
    async fn metrics(&self, queue: &QueueName) -> Result<QueueMetrics, StoreError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;
}

/// Shared handle to a store, as used by the consumer runtime
pub type SharedQueueStore = Arc<dyn QueueStore>;

/// Factory for creating queue stores from configuration
pub struct QueueStoreFactory;

impl QueueStoreFactory {
    /// Create a store from configuration
    pub async fn connect(config: &StoreConfig) -> Result<SharedQueueStore, StoreError> {
        match config {
            StoreConfig::InMemory => Ok(Arc::new(InMemoryQueueStore::new())),
            #[cfg(feature = "postgres")]
            StoreConfig::Postgres(pg_config) => {
                let store = crate::providers::PgmqStore::connect(pg_config).await?;
                Ok(Arc::new(store))
            }
            #[cfg(not(feature = "postgres"))]
            StoreConfig::Postgres(_) => Err(StoreError::ConfigurationError(
                crate::error::ConfigurationError::UnsupportedProvider {
                    provider: "Postgres".to_string(),
                    message: "queue-store was built without the `postgres` feature".to_string(),
                },
            )),
        }
    }

    /// Create an in-memory store for tests and development
    pub fn create_test_store() -> SharedQueueStore {
        Arc::new(InMemoryQueueStore::new())
    }
}
