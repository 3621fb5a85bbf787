//! Shutdown signalling and drain tracking.
//!
//! Workers observe a shared shutdown flag before every lease and count the
//! handlers they are running in a per-queue [`QueueActivity`]. Shutdown flips
//! the flag, then waits until every counter is back at zero.

use crate::error::ConsumerError;
use queue_store::QueueName;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};

#[cfg(test)]
#[path = "shutdown_tests.rs"]
mod tests;

/// Poll interval while draining, in case a notification is missed
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Count of handlers currently running for one queue
#[derive(Debug, Default)]
pub struct QueueActivity {
    active: AtomicUsize,
    idle: Notify,
}

impl QueueActivity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a handler as running until the returned guard is dropped
    pub fn begin(self: &Arc<Self>) -> ActivityGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        ActivityGuard {
            activity: Arc::clone(self),
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// Keeps a [`QueueActivity`] incremented while alive
///
/// Dropping the guard decrements the counter, including when the handler
/// future panics or the worker task is cancelled.
#[derive(Debug)]
pub struct ActivityGuard {
    activity: Arc<QueueActivity>,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        if self.activity.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.activity.idle.notify_waiters();
        }
    }
}

/// Receiving side of the shutdown flag, held by each worker
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Check the flag; a dropped coordinator counts as triggered
    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow() || self.receiver.has_changed().is_err()
    }

    /// Resolve once shutdown has been triggered
    pub async fn triggered(&mut self) {
        // An error means the coordinator is gone, which also ends the runtime.
        let _ = self.receiver.wait_for(|triggered| *triggered).await;
    }
}

/// Owns the shutdown flag and the per-queue activity counters
#[derive(Debug)]
pub struct ShutdownCoordinator {
    sender: watch::Sender<bool>,
    activity: HashMap<QueueName, Arc<QueueActivity>>,
}

impl ShutdownCoordinator {
    /// Create a coordinator tracking the given queues
    pub fn new(queues: impl IntoIterator<Item = QueueName>) -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender,
            activity: queues
                .into_iter()
                .map(|queue| (queue, Arc::new(QueueActivity::new())))
                .collect(),
        }
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn activity(&self, queue: &QueueName) -> Option<Arc<QueueActivity>> {
        self.activity.get(queue).cloned()
    }

    /// Handlers currently running for `queue` (0 for unknown queues)
    pub fn active(&self, queue: &QueueName) -> usize {
        self.activity.get(queue).map_or(0, |a| a.active())
    }

    /// Handlers currently running across all queues
    pub fn total_active(&self) -> usize {
        self.activity.values().map(|a| a.active()).sum()
    }

    /// Stop workers from taking new leases
    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }

    /// Wait until no handler is running, or until `timeout` elapses
    ///
    /// Running handlers are never interrupted.
    pub async fn wait_for_drain(&self, timeout: Duration) -> Result<(), ConsumerError> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let active = self.total_active();
            if active == 0 {
                return Ok(());
            }

            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(active = active, "Shutdown timeout reached with jobs still running");
                return Err(ConsumerError::ShutdownTimeout { active, timeout });
            }

            let mut notified: futures::stream::FuturesUnordered<_> = self
                .activity
                .values()
                .map(|a| a.idle.notified())
                .collect();

            tokio::select! {
                _ = futures::StreamExt::next(&mut notified) => {}
                _ = tokio::time::sleep(DRAIN_POLL_INTERVAL) => {}
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
    }
}
