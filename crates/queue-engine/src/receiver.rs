//! Receiver contract for push-style (listen) delivery.

use crate::envelope::MessageEnvelope;
use crate::queue::MessageQueue;
use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;

#[cfg(test)]
#[path = "receiver_tests.rs"]
mod tests;

/// Callback invoked by a listening queue for every delivered message.
///
/// The receiver owns the outcome of the delivery: it should `complete`,
/// `abandon`, or `move_to_dead_letter` the message through `queue`. A
/// returned error is logged by the queue and never stops delivery.
#[async_trait]
pub trait MessageReceiver: Send + Sync {
    async fn receive_message(
        &self,
        envelope: &mut MessageEnvelope,
        queue: &dyn MessageQueue,
    ) -> anyhow::Result<()>;
}

/// Receiver that records every message it is given and completes it
#[derive(Debug)]
pub struct RecordingReceiver {
    messages: Mutex<Vec<MessageEnvelope>>,
    arrived: Notify,
    auto_complete: bool,
}

impl RecordingReceiver {
    /// Record and complete each message
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            arrived: Notify::new(),
            auto_complete: true,
        }
    }

    /// Record messages and leave their outcome to the caller
    pub fn without_completion() -> Self {
        Self {
            auto_complete: false,
            ..Self::new()
        }
    }

    /// Snapshot of the recorded messages in delivery order
    pub fn messages(&self) -> Vec<MessageEnvelope> {
        self.recorded().clone()
    }

    pub fn count(&self) -> usize {
        self.recorded().len()
    }

    /// Wait until at least `count` messages were recorded or `timeout` elapsed.
    ///
    /// Returns whether the count was reached.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let arrived = self.arrived.notified();
            tokio::pin!(arrived);
            arrived.as_mut().enable();

            if self.count() >= count {
                return true;
            }

            if tokio::time::timeout_at(deadline, arrived).await.is_err() {
                return self.count() >= count;
            }
        }
    }

    pub fn clear(&self) {
        self.recorded().clear();
    }

    fn recorded(&self) -> MutexGuard<'_, Vec<MessageEnvelope>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RecordingReceiver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageReceiver for RecordingReceiver {
    async fn receive_message(
        &self,
        envelope: &mut MessageEnvelope,
        queue: &dyn MessageQueue,
    ) -> anyhow::Result<()> {
        self.recorded().push(envelope.clone());
        self.arrived.notify_waiters();

        if self.auto_complete {
            queue.complete(envelope).await?;
        }

        Ok(())
    }
}
