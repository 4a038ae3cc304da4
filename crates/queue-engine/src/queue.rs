//! The queue contract shared by every engine and transport adapter.

use crate::capabilities::MessagingCapabilities;
use crate::context::Context;
use crate::envelope::MessageEnvelope;
use crate::error::QueueError;
use crate::receiver::MessageReceiver;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;

/// Main interface for queue operations across all engines
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Get queue name
    fn name(&self) -> &str;

    /// Get the operations this queue supports
    fn capabilities(&self) -> &MessagingCapabilities;

    /// Check whether the queue is open
    fn is_open(&self) -> bool;

    /// Resolve parameters and open the queue
    async fn open(&self, context: &Context) -> Result<(), QueueError>;

    /// Close the queue and stop any listen loop
    async fn close(&self, context: &Context) -> Result<(), QueueError>;

    /// Remove all pending messages
    async fn clear(&self, context: &Context) -> Result<(), QueueError>;

    /// Number of messages waiting to be received
    async fn read_message_count(&self) -> Result<usize, QueueError>;

    /// Send a message
    async fn send(&self, context: &Context, envelope: MessageEnvelope) -> Result<(), QueueError>;

    /// Get the next message without removing or locking it
    async fn peek(&self, context: &Context) -> Result<Option<MessageEnvelope>, QueueError>;

    /// Get up to `count` messages without removing or locking them
    async fn peek_batch(
        &self,
        context: &Context,
        count: usize,
    ) -> Result<Vec<MessageEnvelope>, QueueError>;

    /// Receive the next message, waiting up to `wait_timeout` for one to arrive
    async fn receive(
        &self,
        context: &Context,
        wait_timeout: Duration,
    ) -> Result<Option<MessageEnvelope>, QueueError>;

    /// Extend the lock on a received message
    async fn renew_lock(
        &self,
        message: &MessageEnvelope,
        lock_timeout: Duration,
    ) -> Result<(), QueueError>;

    /// Mark a received message as processed and remove it permanently
    async fn complete(&self, message: &mut MessageEnvelope) -> Result<(), QueueError>;

    /// Release a received message so it can be delivered again
    async fn abandon(&self, message: &mut MessageEnvelope) -> Result<(), QueueError>;

    /// Remove a received message as unprocessable
    async fn move_to_dead_letter(&self, message: &mut MessageEnvelope) -> Result<(), QueueError>;

    /// Push messages to `receiver` until [`MessageQueue::end_listen`] is called
    async fn listen(
        &self,
        context: &Context,
        receiver: Arc<dyn MessageReceiver>,
    ) -> Result<(), QueueError>;

    /// Stop push delivery started by [`MessageQueue::listen`]
    async fn end_listen(&self, context: &Context) -> Result<(), QueueError>;
}

/// Convenience operations available on every queue
#[async_trait]
pub trait MessageQueueExt: MessageQueue {
    /// Serialize `value` as JSON into a new envelope and send it
    async fn send_as_object<T>(
        &self,
        context: &Context,
        message_type: &str,
        value: &T,
    ) -> Result<(), QueueError>
    where
        T: Serialize + Sync + ?Sized,
    {
        let envelope = MessageEnvelope::from_object(context.trace_id(), message_type, value)?;
        self.send(context, envelope).await
    }
}

impl<Q: MessageQueue + ?Sized> MessageQueueExt for Q {}

/// Start [`MessageQueue::listen`] in the background without blocking the caller.
///
/// A listen failure is logged; the returned handle resolves once the loop
/// has ended.
pub fn begin_listen<Q>(
    queue: Arc<Q>,
    context: Context,
    receiver: Arc<dyn MessageReceiver>,
) -> JoinHandle<()>
where
    Q: MessageQueue + ?Sized + 'static,
{
    tokio::spawn(async move {
        info!(
            queue = %queue.name(),
            trace_id = ?context.trace_id(),
            "Starting background listener"
        );

        if let Err(e) = queue.listen(&context, receiver).await {
            error!(
                queue = %queue.name(),
                trace_id = ?context.trace_id(),
                error = %e,
                "Background listener failed"
            );
        }
    })
}
