//! Common test utilities for queue-engine integration tests
//!
//! This module provides:
//! - Queue fixtures for every engine
//! - Contract checks that any `MessageQueue` implementation must pass

use queue_engine::{
    CachedMessageQueue, Context, LoopbackTransport, MemoryMessageQueue, MessageEnvelope,
    MessageQueue, MessageQueueExt, MessagingCapabilities, QueueConfig, RecordingReceiver,
    begin_listen,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

pub const SHORT_WAIT: Duration = Duration::from_millis(100);
pub const LONG_WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Fixtures
// ============================================================================

fn test_config(name: &str) -> QueueConfig {
    let mut config = QueueConfig::named(name);
    config.options.listen_interval_ms = 20;
    config
}

/// Open memory queue with a short listen interval
#[allow(dead_code)]
pub async fn open_memory_queue(name: &str) -> Arc<MemoryMessageQueue> {
    let queue = Arc::new(MemoryMessageQueue::from_config(&test_config(name)));
    queue
        .open(&Context::new())
        .await
        .expect("Setup: open should succeed");
    queue
}

/// Open cached queue backed by the loopback transport
#[allow(dead_code)]
pub async fn open_cached_queue(name: &str) -> Arc<CachedMessageQueue<LoopbackTransport>> {
    let mut config = test_config(name);
    config.options.autosubscribe = true;
    let queue = CachedMessageQueue::from_config(
        &config,
        MessagingCapabilities::all(),
        LoopbackTransport::new(),
    );
    queue
        .open(&Context::new())
        .await
        .expect("Setup: open should succeed");
    queue
}

#[allow(dead_code)]
pub fn text_envelope(body: &str) -> MessageEnvelope {
    MessageEnvelope::new(None, "Test", body.to_string())
}

// ============================================================================
// Contract Checks
// ============================================================================

/// Send, receive, and complete a message
#[allow(dead_code)]
pub async fn check_send_receive_complete<Q: MessageQueue + ?Sized>(queue: &Q) {
    let ctx = Context::with_trace_id("123");

    // Arrange
    queue
        .send(&ctx, MessageEnvelope::new(Some("123"), "Test", "Test message"))
        .await
        .expect("Setup: send should succeed");

    // Act
    let mut received = queue
        .receive(&ctx, Duration::from_secs(10))
        .await
        .expect("Receive should not error")
        .expect("Should have message");

    // Assert
    assert_eq!(received.message_type(), "Test");
    assert_eq!(received.as_string().unwrap(), "Test message");
    assert_eq!(received.trace_id(), Some("123"));
    assert!(received.is_in_flight(), "Received message should carry a reference");

    queue
        .complete(&mut received)
        .await
        .expect("Complete should succeed");
    assert!(!received.is_in_flight());
    assert_eq!(queue.read_message_count().await.unwrap(), 0);

    let recheck = queue
        .receive(&ctx, SHORT_WAIT)
        .await
        .expect("Recheck should not error");
    assert!(recheck.is_none(), "Completed message should not be re-received");
}

/// Messages are received in send order
#[allow(dead_code)]
pub async fn check_fifo_order<Q: MessageQueue + ?Sized>(queue: &Q) {
    let ctx = Context::new();

    for body in ["m1", "m2", "m3"] {
        queue
            .send(&ctx, text_envelope(body))
            .await
            .expect("Setup: send should succeed");
    }

    let mut bodies = Vec::new();
    while let Some(mut message) = queue.receive(&ctx, SHORT_WAIT).await.unwrap() {
        bodies.push(message.as_string().unwrap());
        queue.complete(&mut message).await.unwrap();
    }

    assert_eq!(bodies, vec!["m1", "m2", "m3"]);
}

/// Abandoned messages are delivered again with the same identity
#[allow(dead_code)]
pub async fn check_abandon_redelivers<Q: MessageQueue + ?Sized>(queue: &Q) {
    let ctx = Context::new();
    queue
        .send(&ctx, text_envelope("retry me"))
        .await
        .expect("Setup: send should succeed");

    let mut first = queue
        .receive(&ctx, LONG_WAIT)
        .await
        .unwrap()
        .expect("Setup: should have message");

    // Act
    queue.abandon(&mut first).await.expect("Abandon should succeed");

    // Assert
    let mut second = queue
        .receive(&ctx, LONG_WAIT)
        .await
        .unwrap()
        .expect("Abandoned message should be redelivered");
    assert_eq!(second.message_id(), first.message_id());
    assert_eq!(second.message_type(), first.message_type());
    assert_eq!(second.message(), first.message());

    queue.complete(&mut second).await.unwrap();
}

/// Dead-lettered messages are not delivered again
#[allow(dead_code)]
pub async fn check_dead_letter_removes<Q: MessageQueue + ?Sized>(queue: &Q) {
    let ctx = Context::new();
    queue.send(&ctx, text_envelope("poison")).await.unwrap();

    let mut received = queue.receive(&ctx, LONG_WAIT).await.unwrap().unwrap();
    queue
        .move_to_dead_letter(&mut received)
        .await
        .expect("Dead letter should succeed");

    assert!(!received.is_in_flight());
    assert!(queue.receive(&ctx, SHORT_WAIT).await.unwrap().is_none());
}

/// Peek neither removes nor locks, and an empty queue peeks as `None`
#[allow(dead_code)]
pub async fn check_peek_is_non_destructive<Q: MessageQueue + ?Sized>(queue: &Q) {
    let ctx = Context::new();
    assert!(queue.peek(&ctx).await.unwrap().is_none());

    let sent = text_envelope("look but don't touch");
    let sent_id = sent.message_id().clone();
    queue.send(&ctx, sent).await.unwrap();

    let peeked = queue.peek(&ctx).await.unwrap().expect("Should peek message");
    assert_eq!(peeked.message_id(), &sent_id);
    assert!(!peeked.is_in_flight());

    let mut received = queue.receive(&ctx, LONG_WAIT).await.unwrap().unwrap();
    assert_eq!(received.message_id(), &sent_id);
    queue.complete(&mut received).await.unwrap();
}

/// Listening delivers each sent message exactly once
#[allow(dead_code)]
pub async fn check_listen_delivers_once<Q: MessageQueue + ?Sized + 'static>(queue: Arc<Q>) {
    let ctx = Context::new();
    let receiver = Arc::new(RecordingReceiver::new());

    let handle = begin_listen(queue.clone(), ctx.clone(), receiver.clone());

    queue.send_as_object(&ctx, "Test", "m1").await.unwrap();
    queue.send_as_object(&ctx, "Test", "m2").await.unwrap();

    assert!(
        receiver.wait_for(2, LONG_WAIT).await,
        "Receiver should observe both messages"
    );

    queue.end_listen(&ctx).await.unwrap();
    tokio::time::timeout(LONG_WAIT, handle)
        .await
        .expect("Listen should stop after end_listen")
        .unwrap();

    let messages = receiver.messages();
    let bodies: Vec<String> = messages
        .iter()
        .map(|m| m.as_object::<String>().unwrap())
        .collect();
    assert_eq!(bodies, vec!["m1", "m2"]);

    let unique: HashSet<_> = messages.iter().map(|m| m.message_id().clone()).collect();
    assert_eq!(unique.len(), messages.len(), "No duplicates expected");
}

/// Data-plane operations fail once the queue is closed
#[allow(dead_code)]
pub async fn check_closed_queue_rejects_operations<Q: MessageQueue + ?Sized>(queue: &Q) {
    let ctx = Context::new();
    queue.close(&ctx).await.expect("Close should succeed");
    queue.close(&ctx).await.expect("Close should be idempotent");

    assert!(!queue.is_open());
    assert!(queue.send(&ctx, text_envelope("late")).await.is_err());
    assert!(queue.receive(&ctx, SHORT_WAIT).await.is_err());
    assert!(queue.peek(&ctx).await.is_err());
}
