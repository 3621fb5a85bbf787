//! Error types for the consumer runtime.

use queue_store::{MessageId, QueueName, StoreError};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the consumer runtime and dead-letter router
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Store operation failed: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Dead letter {message_id} not found in {queue}")]
    DeadLetterNotFound { queue: QueueName, message_id: MessageId },

    #[error("Dead letter {message_id} in {queue} is not a valid envelope: {message}")]
    InvalidEnvelope {
        queue: QueueName,
        message_id: MessageId,
        message: String,
    },

    #[error("Consumer runtime has already been started")]
    AlreadyStarted,

    #[error("Consumer runtime has not been started")]
    NotStarted,

    #[error("Shutdown timed out after {timeout:?} with {active} job(s) still running")]
    ShutdownTimeout { active: usize, timeout: Duration },
}

impl ConsumerError {
    /// Check if the error reports a missing message or queue
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::DeadLetterNotFound { .. } => true,
            Self::Store(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// Check if retrying the operation may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::ShutdownTimeout { .. } => true,
            _ => false,
        }
    }
}

/// Invalid registrations or runtime configuration; fatal at startup
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid consumer options for {queue}: {message}")]
    InvalidOptions { queue: String, message: String },

    #[error("A consumer is already registered for queue {queue}")]
    DuplicateQueue { queue: QueueName },

    #[error("Invalid queue name '{name}': {message}")]
    InvalidQueueName { name: String, message: String },

    #[error("Failed to load configuration: {message}")]
    Load { message: String },
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(err: config::ConfigError) -> Self {
        Self::Load {
            message: err.to_string(),
        }
    }
}

/// Failure reported by a job handler
///
/// Any `std::error::Error` converts into a `HandlerError`, so handlers can use
/// `?` on their own error types.
///
/// `HandlerError` does not implement `std::error::Error` itself: it would then
/// match the blanket `From<E: Error>` impl and overlap with `From<T> for T`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    /// Human-readable description
    pub message: String,
    /// Cause chain or stack text, recorded in dead-letter envelopes
    pub details: Option<String>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Error produced when a handler panics
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let reason = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };

        Self::new(format!("handler panicked: {}", reason))
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl<E: std::error::Error> From<E> for HandlerError {
    fn from(err: E) -> Self {
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }

        Self {
            message: err.to_string(),
            details: if chain.is_empty() {
                None
            } else {
                Some(format!("Caused by: {}", chain.join(": ")))
            },
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
