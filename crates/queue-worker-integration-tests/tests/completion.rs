//! Integration tests for successful processing and concurrency
//!
//! These tests verify:
//! - Successful messages are archived and counted as completed
//! - Every sent message is delivered (at-least-once)
//! - Concurrent workers never hold the same message at the same time

mod common;

use common::{eventually, RecordingHandler, TestQueue};
use queue_store::QueueStore;
use queue_worker_core::{ConsumerRuntime, HandlerRegistry};
use serde_json::json;
use std::time::Duration;

/// Verify that a succeeding message increments the completed count only
#[tokio::test]
async fn test_successful_message_is_completed() {
    // Arrange
    let q = TestQueue::new("success").await;
    let handler = RecordingHandler::succeeding();
    let runtime = q.runtime(handler.clone(), |r| r);
    let before = runtime.get_job_counts(&q.queue).await.unwrap();

    // Act
    runtime.start().await.unwrap();
    let id = q.send(json!({ "id": 2 })).await;

    let runtime_ref = &runtime;
    let queue = &q.queue;
    eventually("message completed", Duration::from_secs(5), move || async move {
        runtime_ref.get_job_counts(queue).await.unwrap().completed == before.completed + 1
    })
    .await;
    runtime.shutdown(Duration::from_secs(5)).await.unwrap();

    // Assert
    let after = runtime.get_job_counts(&q.queue).await.unwrap();
    assert_eq!(after.waiting, 0);
    assert_eq!(after.failed, before.failed);
    assert_eq!(handler.deliveries().len(), 1);
    assert_eq!(handler.deliveries()[0].attempts_made, 1);
    assert_eq!(handler.deliveries()[0].data, json!({ "id": 2 }));
    assert_eq!(q.store.archived_ids(&q.queue).unwrap(), vec![id]);
    assert!(runtime.get_dead_letters(&q.queue).await.unwrap().is_empty());
}

/// Verify that three workers process ten messages exactly once each
#[tokio::test]
async fn test_concurrent_workers_complete_every_message_once() {
    // Arrange
    let q = TestQueue::new("concurrent").await;
    let handler = RecordingHandler::succeeding().with_delay(Duration::from_millis(10));
    let runtime = q.runtime(handler.clone(), |r| r.with_concurrency(3));

    let mut ids = Vec::new();
    for n in 0..10 {
        ids.push(q.send(json!({ "n": n })).await);
    }

    // Act
    runtime.start().await.unwrap();
    let runtime_ref = &runtime;
    let queue = &q.queue;
    eventually("all messages completed", Duration::from_secs(10), move || async move {
        runtime_ref.get_job_counts(queue).await.unwrap().completed == 10
    })
    .await;
    runtime.shutdown(Duration::from_secs(5)).await.unwrap();

    // Assert
    let completions = handler.completions();
    assert_eq!(completions.len(), 10);
    for id in &ids {
        assert_eq!(completions.get(id), Some(&1), "message {} completed once", id);
    }
    assert_eq!(handler.overlaps(), 0);
    assert!(handler.max_running() <= 3);

    let mut archived = q.store.archived_ids(&q.queue).unwrap();
    archived.sort();
    assert_eq!(archived, ids);
    assert_eq!(q.queue_length().await, 0);
}

/// Verify mutual exclusion across two runtimes sharing one store
#[tokio::test]
async fn test_competing_runtimes_never_share_a_lease() {
    // Arrange: two independent consumers on the same queue
    let q = TestQueue::new("competing").await;
    let handler = RecordingHandler::succeeding().with_delay(Duration::from_millis(20));
    let first = q.runtime(handler.clone(), |r| r.with_concurrency(2).with_batch_size(2));
    let second = q.runtime(handler.clone(), |r| r.with_concurrency(2));

    for n in 0..20 {
        q.send(json!({ "n": n })).await;
    }

    // Act
    first.start().await.unwrap();
    second.start().await.unwrap();

    let store = &q.store;
    let queue = &q.queue;
    eventually("all messages archived", Duration::from_secs(10), move || async move {
        store.archived_ids(queue).unwrap().len() == 20
    })
    .await;

    first.shutdown(Duration::from_secs(5)).await.unwrap();
    second.shutdown(Duration::from_secs(5)).await.unwrap();

    // Assert
    assert_eq!(handler.overlaps(), 0);
    assert_eq!(handler.delivery_count(), 20);
    assert!(handler.completions().values().all(|count| *count == 1));
}

/// Verify that the runtime creates its queue and delivers messages sent afterwards
#[tokio::test]
async fn test_runtime_creates_queue_and_delivers() {
    // Arrange: the runtime creates the queue itself
    let store = std::sync::Arc::new(queue_store::InMemoryQueueStore::new());
    let queue = queue_store::QueueName::new("late_start").unwrap();
    let handler = RecordingHandler::succeeding();

    let mut registry = HandlerRegistry::new();
    registry
        .register(
            registry
                .registration(&queue, handler.clone())
                .with_poll_interval_ms(10),
        )
        .unwrap();
    let runtime = ConsumerRuntime::new(store.clone(), registry);

    // Act
    runtime.start().await.unwrap();
    let sent = store
        .send_batch(&queue, &[json!({ "n": 1 }), json!({ "n": 2 })])
        .await
        .unwrap();

    let handler_ref = &handler;
    eventually("both messages handled", Duration::from_secs(5), move || async move {
        handler_ref.completions().len() == 2
    })
    .await;
    runtime.shutdown(Duration::from_secs(5)).await.unwrap();

    // Assert
    let completions = handler.completions();
    assert!(sent.iter().all(|id| completions.contains_key(id)));
}
