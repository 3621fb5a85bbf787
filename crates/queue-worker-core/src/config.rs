//! Runtime configuration.
//!
//! Sources, applied in order (later sources override earlier ones):
//!  1. Built-in defaults
//!  2. An optional configuration file (YAML, TOML or JSON, chosen by extension)
//!  3. Environment variables prefixed `QW__` with `__` separators,
//!     e.g. `QW__CONSUMER_DEFAULTS__MAX_RETRIES=5`
//!
//! Every field carries a serde default, so an absent file produces a valid
//! configuration.

use crate::error::ConfigurationError;
use crate::registry::ConsumerOptions;
use queue_store::{QueueName, StoreConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Prefix for environment variable overrides
pub const ENV_PREFIX: &str = "QW";

/// Consumer runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Options applied to every queue unless overridden
    pub consumer_defaults: ConsumerOptions,
    /// Per-queue overrides keyed by queue name
    pub queues: HashMap<String, ConsumerOptionsOverride>,
    /// Maximum time to wait for running handlers during shutdown
    pub shutdown_timeout_seconds: u64,
    pub store: StoreConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            consumer_defaults: ConsumerOptions::default(),
            queues: HashMap::new(),
            shutdown_timeout_seconds: 30,
            store: StoreConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from an optional file and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        Self::load_from(
            path,
            config::Environment::with_prefix(ENV_PREFIX).separator("__"),
        )
    }

    pub(crate) fn load_from(
        path: Option<&Path>,
        environment: config::Environment,
    ) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigurationError::Load {
                    message: format!("configuration file {} does not exist", path.display()),
                });
            }
            tracing::info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let runtime_config: RuntimeConfig = builder
            .add_source(environment.try_parsing(true))
            .build()?
            .try_deserialize()?;

        runtime_config.validate()?;
        Ok(runtime_config)
    }

    /// Check every value the runtime relies on
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.consumer_defaults.validate("consumer_defaults")?;

        if self.shutdown_timeout_seconds == 0 {
            return Err(ConfigurationError::InvalidOptions {
                queue: "runtime".to_string(),
                message: "shutdown_timeout_seconds must be at least 1".to_string(),
            });
        }

        for (name, overrides) in &self.queues {
            QueueName::new(name.as_str()).map_err(|e| ConfigurationError::InvalidQueueName {
                name: name.clone(),
                message: e.to_string(),
            })?;
            overrides.apply(&self.consumer_defaults).validate(name)?;
        }

        Ok(())
    }

    /// Effective options for a queue
    pub fn options_for(&self, queue: &QueueName) -> ConsumerOptions {
        match self.queues.get(queue.as_str()) {
            Some(overrides) => overrides.apply(&self.consumer_defaults),
            None => self.consumer_defaults.clone(),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

/// Per-queue overrides; unset fields fall back to the defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerOptionsOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility_timeout_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,
}

impl ConsumerOptionsOverride {
    pub fn apply(&self, base: &ConsumerOptions) -> ConsumerOptions {
        ConsumerOptions {
            concurrency: self.concurrency.unwrap_or(base.concurrency),
            max_retries: self.max_retries.unwrap_or(base.max_retries),
            visibility_timeout_seconds: self
                .visibility_timeout_seconds
                .unwrap_or(base.visibility_timeout_seconds),
            poll_interval_ms: self.poll_interval_ms.unwrap_or(base.poll_interval_ms),
            batch_size: self.batch_size.unwrap_or(base.batch_size),
        }
    }
}
