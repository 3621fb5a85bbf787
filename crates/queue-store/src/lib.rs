//! # Queue Store
//!
//! Client for lease-based, at-least-once message queues in the style of PGMQ.
//!
//! This library provides:
//! - A provider-agnostic [`QueueStore`] trait covering send, lease, archive,
//!   delete and inspection operations
//! - A PGMQ implementation on PostgreSQL (feature `postgres`)
//! - An in-memory implementation with the same lease semantics for tests
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all store operations
//! - [`message`] - Queue names, message ids and leased messages
//! - [`provider`] - Provider types and configuration
//! - [`client`] - The store trait and factory
//! - [`providers`] - Store implementations

pub mod client;
pub mod error;
pub mod message;
pub mod provider;
pub mod providers;

pub use client::{QueueStore, QueueStoreFactory, SharedQueueStore};
pub use error::{ConfigurationError, StoreError, ValidationError};
pub use message::{
    Message, MessageId, Payload, QueueMetrics, QueueName, Timestamp, DEAD_LETTER_SUFFIX,
};
pub use provider::{PostgresConfig, ProviderType, StoreConfig};
pub use providers::InMemoryQueueStore;

#[cfg(feature = "postgres")]
pub use providers::PgmqStore;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
