//! In-memory queue engine with visibility-timeout locking.
//!
//! This module provides a fully self-contained queue that:
//! - Delivers messages in send order from an in-process buffer
//! - Hides received messages behind a lock token until they are completed,
//!   abandoned, or dead-lettered
//! - Returns abandoned messages to the tail of the buffer while their lock
//!   is still valid
//! - Pushes messages to a receiver from a cooperative listen loop
//!
//! All mutable state (buffer, lock table, token counter) lives behind one
//! mutex per queue instance, so a poll-and-pop or an expiry check followed
//! by a mutation is always atomic with respect to other callers.
//!
//! Expired locks are not reclaimed unless `options.reclaim_expired_locks` is
//! set; without it, a consumer that neither completes nor abandons a message
//! leaves it locked for the lifetime of the queue.

use crate::base::QueueBase;
use crate::buffer::MessageBuffer;
use crate::capabilities::{MessagingCapabilities, QueueOperation};
use crate::config::{QueueConfig, QueueOptions};
use crate::context::Context;
use crate::envelope::{LockToken, MessageEnvelope, MessageReference, Timestamp};
use crate::error::QueueError;
use crate::queue::MessageQueue;
use crate::receiver::MessageReceiver;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// Upper bound used when a wait timeout cannot be represented as a deadline
const MAX_WAIT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// A received message hidden from other consumers until its lock is released
#[derive(Debug, Clone)]
pub struct LockedMessage {
    message: MessageEnvelope,
    expiration_time: Timestamp,
    timeout: Duration,
}

impl LockedMessage {
    fn new(message: MessageEnvelope, timeout: Duration) -> Self {
        Self {
            message,
            expiration_time: Timestamp::now().after(timeout),
            timeout,
        }
    }

    pub fn message(&self) -> &MessageEnvelope {
        &self.message
    }

    pub fn expiration_time(&self) -> Timestamp {
        self.expiration_time
    }

    /// Lock duration granted by the last receive or renewal
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_expired(&self) -> bool {
        Timestamp::now() >= self.expiration_time
    }
}

/// Everything guarded by the queue mutex
#[derive(Debug, Default)]
struct MemoryState {
    buffer: MessageBuffer,
    locks: HashMap<LockToken, LockedMessage>,
    next_token: u64,
}

impl MemoryState {
    /// Stamp and append a message at the tail
    fn enqueue(&mut self, mut envelope: MessageEnvelope) {
        envelope.set_reference(None);
        envelope.set_sent_time(Timestamp::now());
        self.buffer.push(envelope);
    }

    /// Pop the head and lock it under a fresh token
    fn lock_next(&mut self, timeout: Duration) -> Option<MessageEnvelope> {
        let mut envelope = self.buffer.pop()?;

        let token = LockToken::new(self.next_token);
        self.next_token += 1;

        envelope.set_reference(Some(MessageReference::Lock(token)));
        self.locks
            .insert(token, LockedMessage::new(envelope.clone(), timeout));

        Some(envelope)
    }

    /// Return messages whose lock expired to the tail, oldest lock first
    fn reclaim_expired(&mut self) -> usize {
        let mut expired: Vec<LockToken> = self
            .locks
            .iter()
            .filter(|(_, locked)| locked.is_expired())
            .map(|(token, _)| *token)
            .collect();
        expired.sort();

        for token in &expired {
            if let Some(mut locked) = self.locks.remove(token) {
                locked.message.set_reference(None);
                self.buffer.push(locked.message);
            }
        }

        expired.len()
    }
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    received: AtomicU64,
    completed: AtomicU64,
    abandoned: AtomicU64,
    dead_lettered: AtomicU64,
}

impl Counters {
    fn increment(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of a memory queue's delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub sent: u64,
    pub received: u64,
    pub completed: u64,
    pub abandoned: u64,
    pub dead_lettered: u64,
}

// ============================================================================
// MemoryMessageQueue
// ============================================================================

/// In-process queue with at-least-once delivery semantics
pub struct MemoryMessageQueue {
    base: QueueBase,
    options: QueueOptions,
    state: Mutex<MemoryState>,
    arrivals: Notify,
    cancel: AtomicBool,
    counters: Counters,
}

impl MemoryMessageQueue {
    /// Create a queue supporting every operation
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_base(
            QueueBase::new(name, MessagingCapabilities::all()),
            QueueOptions::default(),
        )
    }

    /// Create a queue from configuration
    pub fn from_config(config: &QueueConfig) -> Self {
        Self::with_base(
            QueueBase::from_config(config, MessagingCapabilities::all()),
            config.options.clone(),
        )
    }

    /// Create a queue with a restricted capability set
    pub fn with_capabilities(name: impl Into<String>, capabilities: MessagingCapabilities) -> Self {
        Self::with_base(QueueBase::new(name, capabilities), QueueOptions::default())
    }

    fn with_base(base: QueueBase, options: QueueOptions) -> Self {
        Self {
            base,
            options,
            state: Mutex::new(MemoryState::default()),
            arrivals: Notify::new(),
            cancel: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    /// Current delivery counters
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            sent: self.counters.sent.load(Ordering::Relaxed),
            received: self.counters.received.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            abandoned: self.counters.abandoned.load(Ordering::Relaxed),
            dead_lettered: self.counters.dead_lettered.load(Ordering::Relaxed),
        }
    }

    /// Number of received messages still holding a lock
    pub fn locked_message_count(&self) -> usize {
        self.state().locks.len()
    }

    /// Snapshot of the lock record for a token
    pub fn lock_record(&self, token: LockToken) -> Option<LockedMessage> {
        self.state().locks.get(&token).cloned()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the state, reclaiming expired locks first when configured
    fn readable_state(&self) -> MutexGuard<'_, MemoryState> {
        let mut state = self.state();
        if self.options.reclaim_expired_locks {
            let reclaimed = state.reclaim_expired();
            if reclaimed > 0 {
                debug!(
                    queue = %self.base.name(),
                    reclaimed = reclaimed,
                    "Returned messages with expired locks to the queue"
                );
            }
        }
        state
    }

    /// Wait for the next message and lock it.
    ///
    /// Returns `None` once `wait_timeout` elapses, the queue closes, or, when
    /// `stop_on_cancel` is set, the listen loop is cancelled.
    async fn wait_and_lock(
        &self,
        wait_timeout: Duration,
        stop_on_cancel: bool,
    ) -> Option<MessageEnvelope> {
        let now = Instant::now();
        let deadline = now.checked_add(wait_timeout).unwrap_or_else(|| now + MAX_WAIT);

        loop {
            let arrived = self.arrivals.notified();
            tokio::pin!(arrived);
            arrived.as_mut().enable();

            let next = self.readable_state().lock_next(wait_timeout);
            if let Some(envelope) = next {
                Counters::increment(&self.counters.received);
                return Some(envelope);
            }

            if !self.base.is_open() || (stop_on_cancel && self.cancel.load(Ordering::Acquire)) {
                return None;
            }

            if tokio::time::timeout_at(deadline, arrived).await.is_err() {
                return None;
            }
        }
    }

    fn lock_token(message: &MessageEnvelope) -> Option<LockToken> {
        message.reference().and_then(MessageReference::lock_token)
    }
}

#[async_trait]
impl MessageQueue for MemoryMessageQueue {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn capabilities(&self) -> &MessagingCapabilities {
        self.base.capabilities()
    }

    fn is_open(&self) -> bool {
        self.base.is_open()
    }

    async fn open(&self, context: &Context) -> Result<(), QueueError> {
        if self.base.is_open() {
            return Ok(());
        }

        // Connection parameters have no meaning for an in-process queue
        let _params = self.base.resolve_params(context).await?;

        self.cancel.store(false, Ordering::Release);
        self.base.mark_opened();

        info!(
            queue = %self.base.name(),
            trace_id = ?context.trace_id(),
            "Opened memory queue"
        );
        Ok(())
    }

    async fn close(&self, context: &Context) -> Result<(), QueueError> {
        self.cancel.store(true, Ordering::Release);
        self.base.mark_closed();
        self.arrivals.notify_waiters();

        info!(
            queue = %self.base.name(),
            trace_id = ?context.trace_id(),
            "Closed memory queue"
        );
        Ok(())
    }

    async fn clear(&self, context: &Context) -> Result<(), QueueError> {
        self.base.guard(context, QueueOperation::Clear)?;

        let mut state = self.state();
        state.buffer.clear();
        state.locks.clear();
        drop(state);

        debug!(
            queue = %self.base.name(),
            trace_id = ?context.trace_id(),
            "Cleared queue"
        );
        Ok(())
    }

    async fn read_message_count(&self) -> Result<usize, QueueError> {
        self.base.guard(&Context::new(), QueueOperation::MessageCount)?;
        Ok(self.readable_state().buffer.len())
    }

    async fn send(&self, context: &Context, envelope: MessageEnvelope) -> Result<(), QueueError> {
        self.base.guard(context, QueueOperation::Send)?;

        let message_id = envelope.message_id().clone();
        self.state().enqueue(envelope);
        Counters::increment(&self.counters.sent);
        self.arrivals.notify_waiters();

        debug!(
            queue = %self.base.name(),
            trace_id = ?context.trace_id(),
            message_id = %message_id,
            "Sent message"
        );
        Ok(())
    }

    async fn peek(&self, context: &Context) -> Result<Option<MessageEnvelope>, QueueError> {
        self.base.guard(context, QueueOperation::Peek)?;
        Ok(self.readable_state().buffer.peek())
    }

    async fn peek_batch(
        &self,
        context: &Context,
        count: usize,
    ) -> Result<Vec<MessageEnvelope>, QueueError> {
        self.base.guard(context, QueueOperation::PeekBatch)?;
        Ok(self.readable_state().buffer.peek_batch(count))
    }

    async fn receive(
        &self,
        context: &Context,
        wait_timeout: Duration,
    ) -> Result<Option<MessageEnvelope>, QueueError> {
        self.base.guard(context, QueueOperation::Receive)?;

        let received = self.wait_and_lock(wait_timeout, false).await;
        if let Some(envelope) = &received {
            debug!(
                queue = %self.base.name(),
                trace_id = ?context.trace_id(),
                message_id = %envelope.message_id(),
                lock_timeout_ms = wait_timeout.as_millis() as u64,
                "Received message"
            );
        }

        Ok(received)
    }

    async fn renew_lock(
        &self,
        message: &MessageEnvelope,
        lock_timeout: Duration,
    ) -> Result<(), QueueError> {
        self.base.guard(&Context::new(), QueueOperation::RenewLock)?;

        let Some(token) = Self::lock_token(message) else {
            return Ok(());
        };

        let mut state = self.state();
        if let Some(locked) = state.locks.get_mut(&token) {
            // An expired lock is never resurrected
            if !locked.is_expired() {
                locked.expiration_time = Timestamp::now().after(lock_timeout);
                locked.timeout = lock_timeout;

                debug!(
                    queue = %self.base.name(),
                    lock_token = token.value(),
                    expires_at = %locked.expiration_time,
                    "Renewed message lock"
                );
            }
        }

        Ok(())
    }

    async fn complete(&self, message: &mut MessageEnvelope) -> Result<(), QueueError> {
        self.base.check_open(&Context::new())?;

        let Some(token) = Self::lock_token(message) else {
            return Ok(());
        };

        let removed = self.state().locks.remove(&token);
        message.set_reference(None);

        if removed.is_some() {
            Counters::increment(&self.counters.completed);
            debug!(
                queue = %self.base.name(),
                message_id = %message.message_id(),
                lock_token = token.value(),
                "Completed message"
            );
        }

        Ok(())
    }

    async fn abandon(&self, message: &mut MessageEnvelope) -> Result<(), QueueError> {
        self.base.guard(&Context::new(), QueueOperation::Abandon)?;

        let Some(token) = Self::lock_token(message) else {
            return Ok(());
        };

        let mut state = self.state();
        let Some(locked) = state.locks.remove(&token) else {
            return Ok(());
        };

        message.set_reference(None);

        let requeued = !locked.is_expired();
        if requeued {
            state.enqueue(message.clone());
        }
        drop(state);

        Counters::increment(&self.counters.abandoned);
        if requeued {
            Counters::increment(&self.counters.sent);
            self.arrivals.notify_waiters();
        }

        debug!(
            queue = %self.base.name(),
            trace_id = ?message.trace_id(),
            message_id = %message.message_id(),
            lock_token = token.value(),
            requeued = requeued,
            "Abandoned message"
        );
        Ok(())
    }

    async fn move_to_dead_letter(&self, message: &mut MessageEnvelope) -> Result<(), QueueError> {
        self.base.guard(&Context::new(), QueueOperation::DeadLetter)?;

        let Some(token) = Self::lock_token(message) else {
            return Ok(());
        };

        let removed = self.state().locks.remove(&token);
        message.set_reference(None);

        if removed.is_some() {
            Counters::increment(&self.counters.dead_lettered);
            warn!(
                queue = %self.base.name(),
                trace_id = ?message.trace_id(),
                message_id = %message.message_id(),
                lock_token = token.value(),
                "Moved message to dead letter"
            );
        }
        Ok(())
    }

    async fn listen(
        &self,
        context: &Context,
        receiver: Arc<dyn MessageReceiver>,
    ) -> Result<(), QueueError> {
        self.base.guard(context, QueueOperation::Receive)?;

        let interval = self.options.listen_interval();
        info!(
            queue = %self.base.name(),
            trace_id = ?context.trace_id(),
            interval_ms = interval.as_millis() as u64,
            "Started listening"
        );

        // A stop requested before the loop starts still applies
        while !self.cancel.load(Ordering::Acquire) {
            let Some(mut envelope) = self.wait_and_lock(interval, true).await else {
                continue;
            };

            debug!(
                queue = %self.base.name(),
                trace_id = ?context.trace_id(),
                message_id = %envelope.message_id(),
                "Delivering message to receiver"
            );

            if let Err(e) = receiver.receive_message(&mut envelope, self).await {
                warn!(
                    queue = %self.base.name(),
                    trace_id = ?context.trace_id(),
                    message_id = %envelope.message_id(),
                    error = %format!("{e:#}"),
                    "Receiver failed to process message"
                );
            }
        }
        self.cancel.store(false, Ordering::Release);

        info!(
            queue = %self.base.name(),
            trace_id = ?context.trace_id(),
            "Stopped listening"
        );
        Ok(())
    }

    async fn end_listen(&self, context: &Context) -> Result<(), QueueError> {
        self.cancel.store(true, Ordering::Release);
        self.arrivals.notify_waiters();

        debug!(
            queue = %self.base.name(),
            trace_id = ?context.trace_id(),
            "Requested listen loop to stop"
        );
        Ok(())
    }
}
