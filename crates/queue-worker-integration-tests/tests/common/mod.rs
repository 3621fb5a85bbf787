//! Common test utilities for queue-worker integration tests
//!
//! This module provides:
//! - A recording handler that tracks every delivery and overlapping leases
//! - Helpers for building runtimes on a shared in-memory store
//! - Polling helpers for assertions on background workers

#![allow(dead_code)]

use async_trait::async_trait;
use queue_store::{InMemoryQueueStore, MessageId, Payload, QueueName, QueueStore};
use queue_worker_core::{
    ConsumerRegistration, ConsumerRuntime, HandlerError, HandlerRegistry, Job, JobHandler,
};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Recording Handler
// ============================================================================

/// One handler invocation
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub id: MessageId,
    pub attempts_made: u32,
    pub data: Payload,
}

#[derive(Default)]
struct HandlerState {
    deliveries: Mutex<Vec<Delivery>>,
    in_flight: Mutex<HashSet<MessageId>>,
    completions: Mutex<HashMap<MessageId, usize>>,
    overlaps: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
    fail_through_attempt: AtomicU32,
}

/// Handler that records deliveries and fails on request
///
/// Clones share state, so one handler can be registered with several
/// runtimes.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    state: Arc<HandlerState>,
    delay: Duration,
}

impl RecordingHandler {
    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self::failing_first(u32::MAX)
    }

    /// Fail every attempt up to and including `attempts`
    pub fn failing_first(attempts: u32) -> Self {
        let handler = Self::default();
        handler
            .state
            .fail_through_attempt
            .store(attempts, Ordering::SeqCst);
        handler
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn stop_failing(&self) {
        self.state.fail_through_attempt.store(0, Ordering::SeqCst);
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.state.deliveries.lock().unwrap().clone()
    }

    pub fn delivery_count(&self) -> usize {
        self.state.deliveries.lock().unwrap().len()
    }

    /// Successful handler runs per message
    pub fn completions(&self) -> HashMap<MessageId, usize> {
        self.state.completions.lock().unwrap().clone()
    }

    /// Times a message was handed out while another worker still held it
    pub fn overlaps(&self) -> usize {
        self.state.overlaps.load(Ordering::SeqCst)
    }

    pub fn max_running(&self) -> usize {
        self.state.max_running.load(Ordering::SeqCst)
    }

    fn begin(&self, job: &Job) {
        if !self.state.in_flight.lock().unwrap().insert(job.id) {
            self.state.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        let running = self.state.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_running.fetch_max(running, Ordering::SeqCst);

        self.state.deliveries.lock().unwrap().push(Delivery {
            id: job.id,
            attempts_made: job.attempts_made,
            data: job.data.clone(),
        });
    }

    fn end(&self, job: &Job) {
        self.state.in_flight.lock().unwrap().remove(&job.id);
        self.state.running.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobHandler for RecordingHandler {
    async fn process(&self, job: &Job) -> Result<Payload, HandlerError> {
        self.begin(job);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.end(job);

        if job.attempts_made <= self.state.fail_through_attempt.load(Ordering::SeqCst) {
            return Err(HandlerError::new(format!(
                "job {} failed on attempt {}",
                job.id, job.attempts_made
            )));
        }

        *self
            .state
            .completions
            .lock()
            .unwrap()
            .entry(job.id)
            .or_insert(0) += 1;
        Ok(json!({ "handled": job.id.as_i64() }))
    }
}

// ============================================================================
// Runtime Helpers
// ============================================================================

/// A queue on a fresh in-memory store
pub struct TestQueue {
    pub store: Arc<InMemoryQueueStore>,
    pub queue: QueueName,
}

impl TestQueue {
    pub async fn new(name: &str) -> Self {
        let store = Arc::new(InMemoryQueueStore::new());
        let queue = QueueName::new(name).unwrap();
        store.create_queue(&queue).await.unwrap();
        Self { store, queue }
    }

    /// Build a runtime with a single registration for this queue
    ///
    /// The poll interval defaults to 10ms; `configure` may override it.
    pub fn runtime(
        &self,
        handler: RecordingHandler,
        configure: impl FnOnce(ConsumerRegistration) -> ConsumerRegistration,
    ) -> ConsumerRuntime {
        let mut registry = HandlerRegistry::new();
        let registration =
            configure(registry.registration(&self.queue, handler).with_poll_interval_ms(10));
        registry.register(registration).unwrap();
        ConsumerRuntime::new(self.store.clone(), registry)
    }

    pub async fn send(&self, payload: Payload) -> MessageId {
        self.store.send(&self.queue, &payload).await.unwrap()
    }

    pub async fn queue_length(&self) -> u64 {
        self.store.metrics(&self.queue).await.unwrap().queue_length
    }
}

/// Poll `condition` every 10ms until it holds, panicking after `timeout`
pub async fn eventually<F, Fut>(what: &str, timeout: Duration, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out after {:?} waiting for {}",
            timeout,
            what
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
