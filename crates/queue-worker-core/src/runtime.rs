//! # Consumer Runtime
//!
//! Owns the worker pool for every registered queue and exposes the operator
//! surface: job counts, dead-letter inspection and requeue, and graceful
//! shutdown.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use queue_store::{QueueName, QueueStoreFactory};
//! use queue_worker_core::{handler_fn, ConsumerRuntime, HandlerRegistry};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = QueueStoreFactory::create_test_store();
//! let mut registry = HandlerRegistry::new();
//! let queue = QueueName::new("emails")?;
//! registry.register(registry.registration(&queue, handler_fn(|_job| async { Ok(json!(null)) })))?;
//!
//! let runtime = ConsumerRuntime::new(store, registry);
//! runtime.run_until(async { tokio::signal::ctrl_c().await.ok(); }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RuntimeConfig;
use crate::dead_letter::{DeadLetter, DeadLetterRouter, RequeueBatchResult};
use crate::error::ConsumerError;
use crate::registry::{ConsumerRegistration, HandlerRegistry};
use crate::shutdown::ShutdownCoordinator;
use crate::worker::QueueWorker;
use queue_store::{MessageId, QueueName, SharedQueueStore};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;

/// Dead letters returned by [`ConsumerRuntime::get_dead_letters`]
pub const DEFAULT_DEAD_LETTER_LIMIT: u32 = 100;

/// Job counters for a queue
///
/// `active` comes from the local activity counters; everything else is a
/// best-effort store snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    /// Messages in the queue, leased or not
    pub waiting: u64,
    /// Handlers currently running in this process
    pub active: u64,
    /// Messages archived after success
    pub completed: u64,
    /// Entries in the dead letter queue
    pub failed: u64,
}

impl JobCounts {
    /// Read the store counters for `queue` and its dead letter queue
    pub async fn collect(
        store: &SharedQueueStore,
        queue: &QueueName,
        active: usize,
    ) -> Result<Self, ConsumerError> {
        let metrics = store.metrics(queue).await?;
        let dead_letters = store.metrics(&queue.dead_letter_queue()).await?;

        Ok(Self {
            waiting: metrics.queue_length,
            active: active as u64,
            completed: metrics.archived_messages,
            failed: dead_letters.queue_length,
        })
    }
}

enum RuntimeState {
    Created,
    Running(JoinSet<()>),
    Stopped,
}

/// Worker pool and operator surface for a set of registered queues
pub struct ConsumerRuntime {
    store: SharedQueueStore,
    router: DeadLetterRouter,
    config: RuntimeConfig,
    registrations: Vec<ConsumerRegistration>,
    coordinator: ShutdownCoordinator,
    state: Mutex<RuntimeState>,
}

impl ConsumerRuntime {
    /// Create a runtime for the registrations in `registry`
    ///
    /// The registry is consumed, so no registrations can be added later.
    pub fn new(store: SharedQueueStore, registry: HandlerRegistry) -> Self {
        let (config, registrations) = registry.into_parts();
        let coordinator = ShutdownCoordinator::new(registrations.iter().map(|r| r.queue.clone()));

        Self {
            router: DeadLetterRouter::new(store.clone()),
            store,
            config,
            registrations,
            coordinator,
            state: Mutex::new(RuntimeState::Created),
        }
    }

    /// Create queues and spawn the workers
    ///
    /// Queue creation failures are logged and do not prevent startup.
    pub async fn start(&self) -> Result<(), ConsumerError> {
        let mut state = self.state.lock().await;
        if !matches!(*state, RuntimeState::Created) {
            return Err(ConsumerError::AlreadyStarted);
        }

        let mut tasks = JoinSet::new();
        for registration in &self.registrations {
            let queue = &registration.queue;

            if let Err(e) = self.store.create_queue(queue).await {
                warn!(queue = %queue, error = %e, "Failed to create queue; continuing");
            }

            let Some(activity) = self.coordinator.activity(queue) else {
                continue;
            };

            for worker_id in 0..registration.options.concurrency {
                let worker = QueueWorker::new(
                    worker_id,
                    registration.clone(),
                    self.store.clone(),
                    activity.clone(),
                    self.coordinator.signal(),
                );
                tasks.spawn(worker.run());
            }

            info!(
                queue = %queue,
                concurrency = registration.options.concurrency,
                max_retries = registration.options.max_retries,
                visibility_timeout_seconds = registration.options.visibility_timeout_seconds,
                "Started consumer"
            );
        }

        info!(
            queues = self.registrations.len(),
            workers = tasks.len(),
            "Consumer runtime started"
        );
        *state = RuntimeState::Running(tasks);
        Ok(())
    }

    /// Stop leasing, then wait for running handlers up to `timeout`
    ///
    /// Handlers are never interrupted. If the timeout elapses the workers are
    /// detached and finish in the background.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), ConsumerError> {
        let mut state = self.state.lock().await;
        let mut tasks = match std::mem::replace(&mut *state, RuntimeState::Stopped) {
            RuntimeState::Running(tasks) => tasks,
            RuntimeState::Stopped => return Ok(()),
            RuntimeState::Created => {
                *state = RuntimeState::Created;
                return Err(ConsumerError::NotStarted);
            }
        };

        info!(timeout = ?timeout, "Shutdown requested, draining");
        let deadline = tokio::time::Instant::now() + timeout;
        self.coordinator.trigger();

        let drained = async {
            self.coordinator.wait_for_drain(timeout).await?;
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    error!(error = %e, "Worker task failed");
                }
            }
            Ok::<(), ConsumerError>(())
        };

        let result = match tokio::time::timeout_at(deadline, drained).await {
            Ok(result) => result,
            Err(_) => Err(ConsumerError::ShutdownTimeout {
                active: self.coordinator.total_active(),
                timeout,
            }),
        };

        match &result {
            Ok(()) => info!("Consumer runtime stopped"),
            Err(e) => {
                warn!(error = %e, "Shutdown did not drain; detaching workers");
                tasks.detach_all();
            }
        }
        result
    }

    /// Start, run until `signal` resolves, then shut down with the configured timeout
    pub async fn run_until<S>(&self, signal: S) -> Result<(), ConsumerError>
    where
        S: Future<Output = ()> + Send,
    {
        self.start().await?;
        signal.await;
        self.shutdown(self.config.shutdown_timeout()).await
    }

    /// Job counters for `queue`
    pub async fn get_job_counts(&self, queue: &QueueName) -> Result<JobCounts, ConsumerError> {
        JobCounts::collect(&self.store, queue, self.active_jobs(queue)).await
    }

    /// Up to [`DEFAULT_DEAD_LETTER_LIMIT`] dead letters for `queue`, oldest first
    pub async fn get_dead_letters(&self, queue: &QueueName) -> Result<Vec<DeadLetter>, ConsumerError> {
        self.router
            .get_dead_letters(queue, DEFAULT_DEAD_LETTER_LIMIT)
            .await
    }

    pub async fn requeue_dead_letter(
        &self,
        queue: &QueueName,
        dead_letter_id: MessageId,
    ) -> Result<MessageId, ConsumerError> {
        self.router.requeue_dead_letter(queue, dead_letter_id).await
    }

    pub async fn requeue_dead_letter_batch(
        &self,
        queue: &QueueName,
        dead_letter_ids: &[MessageId],
    ) -> RequeueBatchResult {
        self.router
            .requeue_dead_letter_batch(queue, dead_letter_ids)
            .await
    }

    pub async fn purge_dead_letters(&self, queue: &QueueName) -> Result<u64, ConsumerError> {
        self.router.purge_dead_letters(queue).await
    }

    /// Handlers currently running for `queue` in this process
    pub fn active_jobs(&self, queue: &QueueName) -> usize {
        self.coordinator.active(queue)
    }

    pub fn dead_letter_router(&self) -> &DeadLetterRouter {
        &self.router
    }

    pub fn registrations(&self) -> &[ConsumerRegistration] {
        &self.registrations
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}
