//! # Handler Registry
//!
//! Explicit, statically-built mapping from queue names to job handlers and
//! their consumer options.
//!
//! Handlers implement [`JobHandler`]; async closures can be adapted with
//! [`handler_fn`]. Optional [`FailureListener`] and [`CompletionListener`]
//! callbacks observe the outcome of every attempt.
//!
//! ## Usage
//!
//! ```rust
//! use queue_store::QueueName;
//! use queue_worker_core::{handler_fn, HandlerRegistry};
//! use serde_json::json;
//!
//! let mut registry = HandlerRegistry::new();
//! let queue = QueueName::new("emails").unwrap();
//!
//! let registration = registry
//!     .registration(&queue, handler_fn(|job| async move { Ok(json!({ "sent": job.id.as_i64() })) }))
//!     .with_concurrency(4);
//!
//! registry.register(registration).unwrap();
//! assert_eq!(registry.len(), 1);
//! ```

use crate::config::RuntimeConfig;
use crate::error::{ConfigurationError, HandlerError};
use crate::job::Job;
use async_trait::async_trait;
use queue_store::{Payload, QueueName};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;

// ============================================================================
// Handler Traits
// ============================================================================

/// Processes jobs leased from a queue
///
/// Returning `Ok` archives the message. Returning `Err` (or panicking) leaves
/// it for redelivery, or dead-letters it once the retry budget is spent.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn process(&self, job: &Job) -> Result<Payload, HandlerError>;
}

/// Observes failed attempts, before the retry or dead-letter decision
#[async_trait]
pub trait FailureListener: Send + Sync {
    async fn on_failed(&self, job: &Job, error: &HandlerError);
}

/// Observes successful attempts, after the message has been archived
#[async_trait]
pub trait CompletionListener: Send + Sync {
    async fn on_completed(&self, job: &Job, result: &Payload);
}

/// [`JobHandler`] backed by an async closure
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Payload, HandlerError>> + Send,
{
    async fn process(&self, job: &Job) -> Result<Payload, HandlerError> {
        (self.0)(job.clone()).await
    }
}

/// Adapt an async closure into a [`JobHandler`]
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Payload, HandlerError>> + Send,
{
    FnHandler(f)
}

/// [`FailureListener`] backed by an async closure
pub struct FnFailureListener<F>(F);

#[async_trait]
impl<F, Fut> FailureListener for FnFailureListener<F>
where
    F: Fn(Job, HandlerError) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn on_failed(&self, job: &Job, error: &HandlerError) {
        (self.0)(job.clone(), error.clone()).await
    }
}

/// Adapt an async closure into a [`FailureListener`]
pub fn failure_fn<F, Fut>(f: F) -> FnFailureListener<F>
where
    F: Fn(Job, HandlerError) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    FnFailureListener(f)
}

/// [`CompletionListener`] backed by an async closure
pub struct FnCompletionListener<F>(F);

#[async_trait]
impl<F, Fut> CompletionListener for FnCompletionListener<F>
where
    F: Fn(Job, Payload) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn on_completed(&self, job: &Job, result: &Payload) {
        (self.0)(job.clone(), result.clone()).await
    }
}

/// Adapt an async closure into a [`CompletionListener`]
pub fn completion_fn<F, Fut>(f: F) -> FnCompletionListener<F>
where
    F: Fn(Job, Payload) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    FnCompletionListener(f)
}

// ============================================================================
// Consumer Options
// ============================================================================

/// Largest accepted lease duration; the store takes visibility timeouts as 32-bit seconds
pub const MAX_VISIBILITY_TIMEOUT_SECONDS: u64 = i32::MAX as u64;

/// Per-queue consumer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerOptions {
    /// Number of concurrent workers polling the queue
    pub concurrency: usize,
    /// Delivery count at which a failing message is dead-lettered
    pub max_retries: u32,
    /// Lease duration; also the delay before a failed message is retried
    pub visibility_timeout_seconds: u64,
    /// Delay between polls of an idle queue
    pub poll_interval_ms: u64,
    /// Messages leased per poll
    pub batch_size: u32,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            max_retries: 3,
            visibility_timeout_seconds: 30,
            poll_interval_ms: 100,
            batch_size: 1,
        }
    }
}

impl ConsumerOptions {
    /// Lease duration as passed to the store
    pub fn visibility_timeout(&self) -> chrono::Duration {
        let seconds = self
            .visibility_timeout_seconds
            .min(MAX_VISIBILITY_TIMEOUT_SECONDS);
        i64::try_from(seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// Idle poll delay
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }

    /// Check the options, naming `queue` in the error
    pub fn validate(&self, queue: &str) -> Result<(), ConfigurationError> {
        let checks = [
            (self.concurrency == 0, "concurrency must be at least 1"),
            (self.max_retries == 0, "max_retries must be at least 1"),
            (
                self.visibility_timeout_seconds == 0,
                "visibility_timeout_seconds must be at least 1",
            ),
            (
                self.visibility_timeout_seconds > MAX_VISIBILITY_TIMEOUT_SECONDS,
                "visibility_timeout_seconds must be at most 2147483647",
            ),
            (self.poll_interval_ms == 0, "poll_interval_ms must be at least 1"),
            (self.batch_size == 0, "batch_size must be at least 1"),
        ];

        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(ConfigurationError::InvalidOptions {
                queue: queue.to_string(),
                message: message.to_string(),
            }),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Registrations
// ============================================================================

/// A handler bound to a queue, with its options and optional listeners
#[derive(Clone)]
pub struct ConsumerRegistration {
    pub queue: QueueName,
    pub handler: Arc<dyn JobHandler>,
    pub options: ConsumerOptions,
    pub on_failure: Option<Arc<dyn FailureListener>>,
    pub on_complete: Option<Arc<dyn CompletionListener>>,
}

impl ConsumerRegistration {
    /// Register `handler` for `queue` with default options
    pub fn new(queue: QueueName, handler: impl JobHandler + 'static) -> Self {
        Self {
            queue,
            handler: Arc::new(handler),
            options: ConsumerOptions::default(),
            on_failure: None,
            on_complete: None,
        }
    }

    pub fn with_options(mut self, options: ConsumerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.options.concurrency = concurrency;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.options.max_retries = max_retries;
        self
    }

    pub fn with_visibility_timeout_seconds(mut self, seconds: u64) -> Self {
        self.options.visibility_timeout_seconds = seconds;
        self
    }

    pub fn with_poll_interval_ms(mut self, millis: u64) -> Self {
        self.options.poll_interval_ms = millis;
        self
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.options.batch_size = batch_size;
        self
    }

    /// Invoke `listener` after every failed attempt
    pub fn on_failure(mut self, listener: impl FailureListener + 'static) -> Self {
        self.on_failure = Some(Arc::new(listener));
        self
    }

    /// Invoke `listener` after every archived success
    pub fn on_complete(mut self, listener: impl CompletionListener + 'static) -> Self {
        self.on_complete = Some(Arc::new(listener));
        self
    }
}

impl std::fmt::Debug for ConsumerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerRegistration")
            .field("queue", &self.queue)
            .field("options", &self.options)
            .field("on_failure", &self.on_failure.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

/// Collection of consumer registrations, handed to the runtime at start
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    config: RuntimeConfig,
    registrations: Vec<ConsumerRegistration>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose registrations take their options from `config`
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            config,
            registrations: Vec::new(),
        }
    }

    /// Start a registration with options taken from configuration
    pub fn registration(
        &self,
        queue: &QueueName,
        handler: impl JobHandler + 'static,
    ) -> ConsumerRegistration {
        ConsumerRegistration::new(queue.clone(), handler)
            .with_options(self.config.options_for(queue))
    }

    /// Add a registration
    ///
    /// Fails if the options are invalid or the queue already has a consumer.
    pub fn register(
        &mut self,
        registration: ConsumerRegistration,
    ) -> Result<(), ConfigurationError> {
        registration
            .options
            .validate(registration.queue.as_str())?;

        if self.get(&registration.queue).is_some() {
            return Err(ConfigurationError::DuplicateQueue {
                queue: registration.queue,
            });
        }

        tracing::debug!(
            queue = %registration.queue,
            concurrency = registration.options.concurrency,
            max_retries = registration.options.max_retries,
            "Registered consumer"
        );
        self.registrations.push(registration);
        Ok(())
    }

    pub fn get(&self, queue: &QueueName) -> Option<&ConsumerRegistration> {
        self.registrations.iter().find(|r| &r.queue == queue)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConsumerRegistration> {
        self.registrations.iter()
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Configuration the registry was built with
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub(crate) fn into_parts(self) -> (RuntimeConfig, Vec<ConsumerRegistration>) {
        (self.config, self.registrations)
    }
}
