//! Error types for queue store operations.

use chrono::Duration;
use thiserror::Error;

/// Comprehensive error type for all queue store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Database error ({code}): {message}")]
    Database { code: String, message: String },

    #[error("Serialization failed: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigurationError(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationError),
}

impl StoreError {
    /// Check if error is transient and the operation may succeed on a later attempt
    pub fn is_transient(&self) -> bool {
        match self {
            Self::QueueNotFound { .. } => false,
            Self::ConnectionFailed { .. } => true,
            Self::Timeout { .. } => true,
            Self::Database { .. } => true,
            Self::SerializationError(_) => false,
            Self::ConfigurationError(_) => false,
            Self::ValidationError(_) => false,
        }
    }

    /// Check if the error reports a missing queue
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::QueueNotFound { .. })
    }
}

/// Store configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Provider {provider} is not available: {message}")]
    UnsupportedProvider { provider: String, message: String },
}

/// Validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
