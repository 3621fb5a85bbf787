//! # Queue-Worker Core
//!
//! Consumer worker runtime for lease-based, at-least-once message queues.
//!
//! Registered handlers are driven by a polling worker pool with bounded
//! per-queue concurrency. Retries happen through lease expiry: a failed
//! message is left leased and becomes visible again once its visibility
//! timeout passes. When the store's delivery count reaches `max_retries` the
//! message is moved to the queue's dead letter queue.
//!
//! ## Architecture
//!
//! - [`registry`] - Handler traits, consumer options and the handler registry
//! - [`worker`] - The per-queue poll loop and success/failure state machine
//! - [`dead_letter`] - Dead-letter envelopes, routing and requeue
//! - [`shutdown`] - Shutdown signalling and drain tracking
//! - [`runtime`] - Worker pool lifecycle and the operator surface
//! - [`config`] - Runtime configuration loading
//!
//! The store itself is abstracted behind [`queue_store::QueueStore`].

pub mod config;
pub mod dead_letter;
pub mod error;
pub mod job;
pub mod registry;
pub mod runtime;
pub mod shutdown;
pub mod worker;

pub use config::{ConsumerOptionsOverride, RuntimeConfig};
pub use dead_letter::{
    DeadLetter, DeadLetterEnvelope, DeadLetterRouter, FailedRequeue, FailureDetails,
    RequeueBatchResult, RequeuedDeadLetter,
};
pub use error::{ConfigurationError, ConsumerError, HandlerError};
pub use job::Job;
pub use registry::{
    completion_fn, failure_fn, handler_fn, CompletionListener, ConsumerOptions,
    ConsumerRegistration, FailureListener, HandlerRegistry, JobHandler,
    MAX_VISIBILITY_TIMEOUT_SECONDS,
};
pub use runtime::{ConsumerRuntime, JobCounts, DEFAULT_DEAD_LETTER_LIMIT};
pub use shutdown::{ActivityGuard, QueueActivity, ShutdownCoordinator, ShutdownSignal};
pub use worker::JobOutcome;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
