//! Polling worker for a single queue.
//!
//! Each worker leases a batch, runs the handler for every message, then
//! archives, leaves for retry, or dead-letters each one. Retries are implicit:
//! a failed message stays leased and becomes visible again when its lease
//! expires. The store's delivery count is the only attempt counter.

use crate::dead_letter::DeadLetterRouter;
use crate::error::HandlerError;
use crate::job::Job;
use crate::registry::ConsumerRegistration;
use crate::shutdown::{QueueActivity, ShutdownSignal};
use futures::FutureExt;
use queue_store::{Message, MessageId, SharedQueueStore};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;

/// What happened to a leased message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Handler succeeded and the message was archived
    Completed,
    /// Handler failed below the retry limit; the lease will expire
    RetryPending { attempts_made: u32 },
    /// Handler failed at the retry limit and the message was dead-lettered
    DeadLettered { dead_letter_id: MessageId },
    /// A store call failed after the handler ran; the lease will expire
    StoreFailure,
}

/// Await user code, turning a panic into a [`HandlerError`]
async fn run_guarded<F: Future>(future: F) -> Result<F::Output, HandlerError> {
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(HandlerError::from_panic)
}

pub(crate) struct QueueWorker {
    worker_id: usize,
    registration: ConsumerRegistration,
    store: SharedQueueStore,
    router: DeadLetterRouter,
    activity: Arc<QueueActivity>,
    shutdown: ShutdownSignal,
}

impl QueueWorker {
    pub(crate) fn new(
        worker_id: usize,
        registration: ConsumerRegistration,
        store: SharedQueueStore,
        activity: Arc<QueueActivity>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            worker_id,
            registration,
            router: DeadLetterRouter::new(store.clone()),
            store,
            activity,
            shutdown,
        }
    }

    /// Poll until shutdown is triggered
    pub(crate) async fn run(mut self) {
        let queue = self.registration.queue.clone();
        let options = self.registration.options.clone();
        debug!(queue = %queue, worker_id = self.worker_id, "Worker started");

        while !self.shutdown.is_triggered() {
            let idle = match self
                .store
                .read(&queue, options.visibility_timeout(), options.batch_size)
                .await
            {
                Ok(messages) if messages.is_empty() => true,
                Ok(messages) => {
                    for message in messages {
                        if self.shutdown.is_triggered() {
                            debug!(
                                queue = %queue,
                                message_id = %message.id,
                                "Shutdown requested; leaving leased message for redelivery"
                            );
                            break;
                        }
                        self.process_message(message).await;
                    }
                    false
                }
                Err(e) => {
                    warn!(
                        queue = %queue,
                        worker_id = self.worker_id,
                        error = %e,
                        "Failed to lease messages"
                    );
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(options.poll_interval()) => {}
                    _ = self.shutdown.triggered() => {}
                }
            }
        }

        debug!(queue = %queue, worker_id = self.worker_id, "Worker stopped");
    }

    /// Run the handler for one leased message and settle it
    pub(crate) async fn process_message(&self, message: Message) -> JobOutcome {
        let _active = self.activity.begin();
        let job = Job::from_message(&self.registration.queue, &message);

        debug!(
            queue = %job.queue,
            message_id = %job.id,
            delivery_count = job.attempts_made,
            worker_id = self.worker_id,
            "Processing job"
        );

        let result = run_guarded(self.registration.handler.process(&job))
            .await
            .and_then(|outcome| outcome);

        match result {
            Ok(value) => self.complete(&job, value).await,
            Err(err) => self.fail(&job, &message, err).await,
        }
    }

    async fn complete(&self, job: &Job, value: queue_store::Payload) -> JobOutcome {
        match self.store.archive(&job.queue, job.id).await {
            Ok(true) => {}
            Ok(false) => warn!(
                queue = %job.queue,
                message_id = %job.id,
                "Completed message was no longer in the queue; its lease may have expired"
            ),
            Err(e) => {
                error!(
                    queue = %job.queue,
                    message_id = %job.id,
                    error = %e,
                    "Failed to archive completed message; it will be redelivered"
                );
                return JobOutcome::StoreFailure;
            }
        }

        if let Some(listener) = &self.registration.on_complete {
            if let Err(e) = run_guarded(listener.on_completed(job, &value)).await {
                warn!(queue = %job.queue, message_id = %job.id, error = %e, "Completion listener panicked");
            }
        }

        debug!(queue = %job.queue, message_id = %job.id, "Job completed");
        JobOutcome::Completed
    }

    async fn fail(&self, job: &Job, message: &Message, err: HandlerError) -> JobOutcome {
        let max_retries = self.registration.options.max_retries;

        warn!(
            queue = %job.queue,
            message_id = %job.id,
            delivery_count = job.attempts_made,
            max_retries = max_retries,
            error = %err,
            "Job failed"
        );

        if let Some(listener) = &self.registration.on_failure {
            if let Err(e) = run_guarded(listener.on_failed(job, &err)).await {
                warn!(queue = %job.queue, message_id = %job.id, error = %e, "Failure listener panicked");
            }
        }

        if job.attempts_made < max_retries {
            return JobOutcome::RetryPending {
                attempts_made: job.attempts_made,
            };
        }

        match self
            .router
            .dead_letter_message(&job.queue, message, &err)
            .await
        {
            Ok(dead_letter_id) => {
                info!(
                    queue = %job.queue,
                    message_id = %job.id,
                    attempts = job.attempts_made,
                    "Job exhausted its retries"
                );
                JobOutcome::DeadLettered { dead_letter_id }
            }
            Err(e) => {
                error!(
                    queue = %job.queue,
                    message_id = %job.id,
                    error = %e,
                    "Failed to dead-letter job; it will be redelivered"
                );
                JobOutcome::StoreFailure
            }
        }
    }
}
