//! Integration tests for graceful shutdown
//!
//! These tests verify:
//! - Shutdown waits for running handlers and leaves every counter at zero
//! - Shutdown gives up after its timeout without interrupting handlers
//! - No message is leased once shutdown has been requested

mod common;

use common::{eventually, RecordingHandler, TestQueue};
use queue_worker_core::ConsumerError;
use serde_json::json;
use std::time::{Duration, Instant};

/// Verify that shutdown returns only after the running handler completes
#[tokio::test]
async fn test_shutdown_waits_for_running_handler() {
    // Arrange
    let q = TestQueue::new("drain").await;
    let handler = RecordingHandler::succeeding().with_delay(Duration::from_millis(400));
    let runtime = q.runtime(handler.clone(), |r| r);

    runtime.start().await.unwrap();
    let id = q.send(json!({ "id": 4 })).await;

    let runtime_ref = &runtime;
    let queue = &q.queue;
    eventually("handler running", Duration::from_secs(5), move || async move {
        runtime_ref.active_jobs(queue) == 1
    })
    .await;

    // Act
    let begun = Instant::now();
    runtime.shutdown(Duration::from_secs(5)).await.unwrap();
    let waited = begun.elapsed();

    // Assert
    assert!(waited < Duration::from_secs(5));
    assert_eq!(handler.completions().get(&id), Some(&1));
    assert_eq!(runtime.active_jobs(&q.queue), 0);
    assert_eq!(q.store.archived_ids(&q.queue).unwrap(), vec![id]);
}

/// Verify that shutdown gives up after its timeout when a handler is stuck
#[tokio::test]
async fn test_shutdown_times_out_with_stuck_handler() {
    // Arrange
    let q = TestQueue::new("stuck").await;
    let handler = RecordingHandler::succeeding().with_delay(Duration::from_secs(3));
    let runtime = q.runtime(handler.clone(), |r| r);

    runtime.start().await.unwrap();
    q.send(json!({ "id": 5 })).await;

    let handler_ref = &handler;
    eventually("handler running", Duration::from_secs(5), move || async move {
        handler_ref.delivery_count() == 1
    })
    .await;

    // Act
    let begun = Instant::now();
    let result = runtime.shutdown(Duration::from_millis(300)).await;
    let waited = begun.elapsed();

    // Assert: the handler was not interrupted and is still counted as active
    assert!(matches!(
        result,
        Err(ConsumerError::ShutdownTimeout { active: 1, .. })
    ));
    assert!(waited >= Duration::from_millis(300));
    assert!(waited < Duration::from_secs(2));
    assert_eq!(runtime.active_jobs(&q.queue), 1);
    assert!(handler.completions().is_empty());
}

/// Verify that no new message is leased after shutdown
#[tokio::test]
async fn test_no_leases_after_shutdown() {
    // Arrange
    let q = TestQueue::new("stopped").await;
    let handler = RecordingHandler::succeeding();
    let runtime = q.runtime(handler.clone(), |r| r.with_concurrency(2));

    runtime.start().await.unwrap();
    runtime.shutdown(Duration::from_secs(5)).await.unwrap();

    // Act
    q.send(json!({ "id": 6 })).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Assert
    assert_eq!(handler.delivery_count(), 0);
    assert_eq!(q.queue_length().await, 1);
    assert_eq!(runtime.active_jobs(&q.queue), 0);

    // A second shutdown is a no-op
    runtime.shutdown(Duration::from_secs(1)).await.unwrap();
}

/// Verify the drain property with several workers busy
#[tokio::test]
async fn test_all_counters_are_zero_after_successful_shutdown() {
    // Arrange
    let q = TestQueue::new("busy").await;
    let handler = RecordingHandler::succeeding().with_delay(Duration::from_millis(50));
    let runtime = q.runtime(handler.clone(), |r| r.with_concurrency(4));

    for n in 0..8 {
        q.send(json!({ "n": n })).await;
    }
    runtime.start().await.unwrap();

    let handler_ref = &handler;
    eventually("some handlers running", Duration::from_secs(5), move || async move {
        handler_ref.delivery_count() >= 2
    })
    .await;

    // Act
    runtime.shutdown(Duration::from_secs(5)).await.unwrap();

    // Assert: every started handler finished, nothing is left running
    assert_eq!(runtime.active_jobs(&q.queue), 0);
    let completed: usize = handler.completions().values().sum();
    assert_eq!(completed, handler.delivery_count());
    assert_eq!(
        q.store.archived_ids(&q.queue).unwrap().len(),
        handler.delivery_count()
    );
}
