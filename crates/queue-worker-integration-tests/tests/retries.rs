//! Integration tests for lease-expiry retries and the retry bound
//!
//! These tests verify:
//! - A message failing on every attempt is dead-lettered on its last lease
//! - No lease happens after the retry budget is spent
//! - A transient failure is retried once the lease expires
//! - A lease that expires without reaching a handler still uses up an attempt

mod common;

use common::{eventually, RecordingHandler, TestQueue};
use queue_store::QueueStore;
use queue_worker_core::{completion_fn, failure_fn};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Verify that an always-failing message is dead-lettered after three leases
#[tokio::test]
async fn test_failing_message_is_dead_lettered_after_max_retries() {
    // Arrange
    let q = TestQueue::new("retry_bound").await;
    let handler = RecordingHandler::failing();
    let runtime = q.runtime(handler.clone(), |r| {
        r.with_max_retries(3).with_visibility_timeout_seconds(1)
    });

    // Act
    runtime.start().await.unwrap();
    q.send(json!({ "id": 1 })).await;

    let runtime_ref = &runtime;
    let queue = &q.queue;
    eventually("message dead-lettered", Duration::from_secs(10), move || async move {
        runtime_ref.get_dead_letters(queue).await.unwrap().len() == 1
    })
    .await;

    // Assert: exactly three leases, the last one produced the envelope
    let attempts: Vec<u32> = handler.deliveries().iter().map(|d| d.attempts_made).collect();
    assert_eq!(attempts, vec![1, 2, 3]);

    let dead_letters = runtime.get_dead_letters(&q.queue).await.unwrap();
    let envelope = &dead_letters[0].envelope;
    assert_eq!(envelope.attempts_made, 3);
    assert_eq!(envelope.original_queue, q.queue);
    assert_eq!(envelope.original_message, json!({ "id": 1 }));
    assert!(envelope.error.message.contains("attempt 3"));
    assert_eq!(q.queue_length().await, 0);

    // Assert: nothing is leased again after the budget is spent
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(handler.delivery_count(), 3);

    runtime.shutdown(Duration::from_secs(5)).await.unwrap();
}

/// Verify that a message failing once is retried after its lease expires
#[tokio::test]
async fn test_transient_failure_is_retried_after_lease_expiry() {
    // Arrange
    let q = TestQueue::new("transient").await;
    let handler = RecordingHandler::failing_first(1);
    let failures = Arc::new(AtomicUsize::new(0));
    let completions = Arc::new(AtomicUsize::new(0));

    let runtime = {
        let failures = failures.clone();
        let completions = completions.clone();
        q.runtime(handler.clone(), move |r| {
            r.with_max_retries(3)
                .with_visibility_timeout_seconds(1)
                .on_failure(failure_fn(move |_job, _error| {
                    let failures = failures.clone();
                    async move {
                        failures.fetch_add(1, Ordering::SeqCst);
                    }
                }))
                .on_complete(completion_fn(move |_job, _result| {
                    let completions = completions.clone();
                    async move {
                        completions.fetch_add(1, Ordering::SeqCst);
                    }
                }))
        })
    };

    // Act
    runtime.start().await.unwrap();
    let id = q.send(json!({ "id": 2 })).await;

    let runtime_ref = &runtime;
    let queue = &q.queue;
    eventually("message completed", Duration::from_secs(10), move || async move {
        runtime_ref.get_job_counts(queue).await.unwrap().completed == 1
    })
    .await;
    runtime.shutdown(Duration::from_secs(5)).await.unwrap();

    // Assert
    let attempts: Vec<u32> = handler.deliveries().iter().map(|d| d.attempts_made).collect();
    assert_eq!(attempts, vec![1, 2]);
    assert_eq!(handler.completions().get(&id), Some(&1));
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    assert_eq!(completions.load(Ordering::SeqCst), 1);
    assert!(runtime.get_dead_letters(&q.queue).await.unwrap().is_empty());
}

/// Verify that a failed message stays invisible until its lease expires
#[tokio::test]
async fn test_failed_message_is_not_redelivered_before_lease_expiry() {
    // Arrange
    let q = TestQueue::new("lease_hold").await;
    let handler = RecordingHandler::failing();
    let runtime = q.runtime(handler.clone(), |r| {
        r.with_max_retries(5).with_visibility_timeout_seconds(30)
    });

    // Act
    runtime.start().await.unwrap();
    q.send(json!({ "id": 3 })).await;

    let handler_ref = &handler;
    eventually("first delivery", Duration::from_secs(5), move || async move {
        handler_ref.delivery_count() == 1
    })
    .await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Assert: still leased, still queued, not yet dead-lettered
    assert_eq!(handler.delivery_count(), 1);
    assert_eq!(q.queue_length().await, 1);
    assert!(runtime.get_dead_letters(&q.queue).await.unwrap().is_empty());

    runtime.shutdown(Duration::from_secs(5)).await.unwrap();
}

/// Verify that an abandoned lease counts toward the retry bound
#[tokio::test]
async fn test_abandoned_lease_counts_toward_max_retries() {
    // Arrange: another consumer leases the message and never settles it
    let q = TestQueue::new("abandoned").await;
    let id = q.send(json!({ "id": 9 })).await;
    let leased = q
        .store
        .read(&q.queue, chrono::Duration::seconds(1), 1)
        .await
        .unwrap();
    assert_eq!(leased.len(), 1);
    assert_eq!(leased[0].id, id);
    assert_eq!(leased[0].delivery_count, 1);

    let handler = RecordingHandler::failing();
    let runtime = q.runtime(handler.clone(), |r| {
        r.with_max_retries(2).with_visibility_timeout_seconds(1)
    });

    // Act
    runtime.start().await.unwrap();

    let runtime_ref = &runtime;
    let queue = &q.queue;
    eventually("message dead-lettered", Duration::from_secs(10), move || async move {
        runtime_ref.get_dead_letters(queue).await.unwrap().len() == 1
    })
    .await;

    // Assert: the first handler call already sees the second delivery
    let attempts: Vec<u32> = handler.deliveries().iter().map(|d| d.attempts_made).collect();
    assert_eq!(attempts, vec![2]);

    let dead_letters = runtime.get_dead_letters(&q.queue).await.unwrap();
    assert_eq!(dead_letters[0].envelope.attempts_made, 2);
    assert_eq!(dead_letters[0].envelope.original_message, json!({ "id": 9 }));
    assert_eq!(q.queue_length().await, 0);

    runtime.shutdown(Duration::from_secs(5)).await.unwrap();
    assert_eq!(handler.delivery_count(), 1);
}
