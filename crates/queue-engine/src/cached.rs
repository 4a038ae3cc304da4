//! Buffer-backed queue engine for transport adapters.
//!
//! A [`CachedMessageQueue`] owns the delivery-side behaviour common to every
//! broker adapter: an ordered buffer of received but undelivered messages,
//! pull-style `peek`/`receive` against that buffer, and push-style delivery
//! to a live receiver. The adapter itself only implements [`CacheTransport`]:
//! it connects, forwards sends and settlements to its broker, and feeds
//! arriving broker messages into the cache through a [`MessageFeed`].

use crate::base::{QueueBase, ResolvedParams};
use crate::buffer::MessageBuffer;
use crate::capabilities::{MessagingCapabilities, QueueOperation};
use crate::config::QueueConfig;
use crate::context::Context;
use crate::envelope::{MessageEnvelope, MessageReference};
use crate::error::QueueError;
use crate::queue::MessageQueue;
use crate::receiver::MessageReceiver;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "cached_tests.rs"]
mod tests;

const MAX_WAIT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

// ============================================================================
// Transport Seam
// ============================================================================

/// Broker-specific half of a cached queue.
///
/// Every method is called only after the owning queue has checked its
/// capabilities and open state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheTransport: Send + Sync + 'static {
    /// Connect using the resolved connection and credential parameters
    async fn open_with_params(
        &self,
        context: &Context,
        params: &ResolvedParams,
    ) -> Result<(), QueueError>;

    /// Release the connection
    async fn close(&self, context: &Context) -> Result<(), QueueError>;

    /// Start feeding broker messages into `feed`
    async fn subscribe(&self, context: &Context, feed: MessageFeed) -> Result<(), QueueError>;

    /// Stop feeding broker messages
    async fn unsubscribe(&self, context: &Context) -> Result<(), QueueError>;

    /// Publish a message to the broker
    async fn send(&self, context: &Context, envelope: MessageEnvelope) -> Result<(), QueueError>;

    async fn renew_lock(
        &self,
        message: &MessageEnvelope,
        lock_timeout: Duration,
    ) -> Result<(), QueueError>;

    async fn complete(&self, message: &mut MessageEnvelope) -> Result<(), QueueError>;

    async fn abandon(&self, message: &mut MessageEnvelope) -> Result<(), QueueError>;

    async fn move_to_dead_letter(&self, message: &mut MessageEnvelope) -> Result<(), QueueError>;
}

#[async_trait]
trait FeedTarget: Send + Sync {
    async fn accept(&self, envelope: MessageEnvelope);
}

/// Handle a transport uses to hand arriving messages to its queue
#[derive(Clone)]
pub struct MessageFeed {
    target: Weak<dyn FeedTarget>,
}

impl MessageFeed {
    /// Deliver a message to the live receiver, or buffer it.
    ///
    /// Returns `false` when the owning queue no longer exists.
    pub async fn push(&self, envelope: MessageEnvelope) -> bool {
        match self.target.upgrade() {
            Some(target) => {
                target.accept(envelope).await;
                true
            }
            None => false,
        }
    }

    /// Check whether the owning queue still exists
    pub fn is_connected(&self) -> bool {
        self.target.strong_count() > 0
    }
}

impl std::fmt::Debug for MessageFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageFeed")
            .field("connected", &self.is_connected())
            .finish()
    }
}

// ============================================================================
// CachedMessageQueue
// ============================================================================

#[derive(Default)]
struct CacheState {
    buffer: MessageBuffer,
    receiver: Option<Arc<dyn MessageReceiver>>,
}

/// Queue engine that buffers messages pushed in by a [`CacheTransport`]
pub struct CachedMessageQueue<T: CacheTransport> {
    base: QueueBase,
    autosubscribe: bool,
    transport: T,
    state: Mutex<CacheState>,
    arrivals: Notify,
    subscribed: AtomicBool,
    this: Weak<Self>,
}

impl<T: CacheTransport> CachedMessageQueue<T> {
    /// Create a queue around `transport`
    pub fn new(
        name: impl Into<String>,
        capabilities: MessagingCapabilities,
        transport: T,
    ) -> Arc<Self> {
        Self::with_base(QueueBase::new(name, capabilities), false, transport)
    }

    /// Create a queue from configuration
    pub fn from_config(
        config: &QueueConfig,
        capabilities: MessagingCapabilities,
        transport: T,
    ) -> Arc<Self> {
        Self::with_base(
            QueueBase::from_config(config, capabilities),
            config.options.autosubscribe,
            transport,
        )
    }

    /// Create a queue around an existing base
    pub fn with_base(base: QueueBase, autosubscribe: bool, transport: T) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            base,
            autosubscribe,
            transport,
            state: Mutex::new(CacheState::default()),
            arrivals: Notify::new(),
            subscribed: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
    }

    /// Check whether a live receiver is registered
    pub fn is_listening(&self) -> bool {
        self.state().receiver.is_some()
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn ensure_subscribed(&self, context: &Context) -> Result<(), QueueError> {
        if self.subscribed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let feed = MessageFeed {
            target: self.this.clone(),
        };

        if let Err(e) = self.transport.subscribe(context, feed).await {
            self.subscribed.store(false, Ordering::Release);
            return Err(e);
        }

        debug!(
            queue = %self.base.name(),
            trace_id = ?context.trace_id(),
            "Subscribed to transport"
        );
        Ok(())
    }

    async fn wait_and_pop(&self, wait_timeout: Duration) -> Option<MessageEnvelope> {
        let now = Instant::now();
        let deadline = now.checked_add(wait_timeout).unwrap_or_else(|| now + MAX_WAIT);

        loop {
            let arrived = self.arrivals.notified();
            tokio::pin!(arrived);
            arrived.as_mut().enable();

            let next = self.state().buffer.pop();
            if next.is_some() {
                return next;
            }

            if !self.base.is_open() {
                return None;
            }

            if tokio::time::timeout_at(deadline, arrived).await.is_err() {
                return None;
            }
        }
    }

    async fn deliver(&self, receiver: &Arc<dyn MessageReceiver>, mut envelope: MessageEnvelope) {
        if let Err(e) = receiver.receive_message(&mut envelope, self).await {
            warn!(
                queue = %self.base.name(),
                message_id = %envelope.message_id(),
                error = %format!("{e:#}"),
                "Receiver failed to process message"
            );
        }
    }
}

#[async_trait]
impl<T: CacheTransport> FeedTarget for CachedMessageQueue<T> {
    async fn accept(&self, envelope: MessageEnvelope) {
        let receiver = {
            let mut state = self.state();
            let current = state.receiver.clone();
            match current {
                Some(receiver) => receiver,
                None => {
                    state.buffer.push(envelope);
                    drop(state);
                    self.arrivals.notify_waiters();
                    return;
                }
            }
        };

        self.deliver(&receiver, envelope).await;
    }
}

#[async_trait]
impl<T: CacheTransport> MessageQueue for CachedMessageQueue<T> {
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

        let params = self.base.resolve_params(context).await?;
        self.transport.open_with_params(context, &params).await?;
        self.base.mark_opened();

        info!(
            queue = %self.base.name(),
            trace_id = ?context.trace_id(),
            autosubscribe = self.autosubscribe,
            "Opened cached queue"
        );

        if self.autosubscribe {
            self.ensure_subscribed(context).await?;
        }
        Ok(())
    }

    async fn close(&self, context: &Context) -> Result<(), QueueError> {
        let unsubscribed = if self.subscribed.swap(false, Ordering::AcqRel) {
            self.transport.unsubscribe(context).await
        } else {
            Ok(())
        };
        let closed = if self.base.is_open() {
            self.transport.close(context).await
        } else {
            Ok(())
        };

        {
            let mut state = self.state();
            state.buffer.clear();
            state.receiver = None;
        }
        self.base.mark_closed();
        self.arrivals.notify_waiters();

        if let Err(e) = &unsubscribed {
            warn!(
                queue = %self.base.name(),
                trace_id = ?context.trace_id(),
                error = %e,
                "Failed to unsubscribe while closing"
            );
        }

        info!(
            queue = %self.base.name(),
            trace_id = ?context.trace_id(),
            "Closed cached queue"
        );
        unsubscribed.and(closed)
    }

    async fn clear(&self, context: &Context) -> Result<(), QueueError> {
        self.base.guard(context, QueueOperation::Clear)?;
        self.state().buffer.clear();
        Ok(())
    }

    async fn read_message_count(&self) -> Result<usize, QueueError> {
        self.base.guard(&Context::new(), QueueOperation::MessageCount)?;
        Ok(self.state().buffer.len())
    }

    async fn send(&self, context: &Context, envelope: MessageEnvelope) -> Result<(), QueueError> {
        self.base.guard(context, QueueOperation::Send)?;

        debug!(
            queue = %self.base.name(),
            trace_id = ?context.trace_id(),
            message_id = %envelope.message_id(),
            "Sending message through transport"
        );
        self.transport.send(context, envelope).await
    }

    async fn peek(&self, context: &Context) -> Result<Option<MessageEnvelope>, QueueError> {
        self.base.guard(context, QueueOperation::Peek)?;
        self.ensure_subscribed(context).await?;
        Ok(self.state().buffer.peek())
    }

    async fn peek_batch(
        &self,
        context: &Context,
        count: usize,
    ) -> Result<Vec<MessageEnvelope>, QueueError> {
        self.base.guard(context, QueueOperation::PeekBatch)?;
        self.ensure_subscribed(context).await?;
        Ok(self.state().buffer.peek_batch(count))
    }

    async fn receive(
        &self,
        context: &Context,
        wait_timeout: Duration,
    ) -> Result<Option<MessageEnvelope>, QueueError> {
        self.base.guard(context, QueueOperation::Receive)?;
        self.ensure_subscribed(context).await?;
        Ok(self.wait_and_pop(wait_timeout).await)
    }

    async fn renew_lock(
        &self,
        message: &MessageEnvelope,
        lock_timeout: Duration,
    ) -> Result<(), QueueError> {
        self.base.guard(&Context::new(), QueueOperation::RenewLock)?;
        self.transport.renew_lock(message, lock_timeout).await
    }

    async fn complete(&self, message: &mut MessageEnvelope) -> Result<(), QueueError> {
        self.base.check_open(&Context::new())?;
        self.transport.complete(message).await
    }

    async fn abandon(&self, message: &mut MessageEnvelope) -> Result<(), QueueError> {
        self.base.guard(&Context::new(), QueueOperation::Abandon)?;
        self.transport.abandon(message).await
    }

    async fn move_to_dead_letter(&self, message: &mut MessageEnvelope) -> Result<(), QueueError> {
        self.base.guard(&Context::new(), QueueOperation::DeadLetter)?;
        self.transport.move_to_dead_letter(message).await
    }

    async fn listen(
        &self,
        context: &Context,
        receiver: Arc<dyn MessageReceiver>,
    ) -> Result<(), QueueError> {
        self.base.guard(context, QueueOperation::Receive)?;
        self.ensure_subscribed(context).await?;

        // Drain until the buffer is empty at the moment the receiver is registered
        loop {
            let pending = {
                let mut state = self.state();
                if state.buffer.is_empty() {
                    if self.base.is_open() {
                        state.receiver = Some(receiver.clone());
                    }
                    break;
                }
                state.buffer.drain()
            };

            debug!(
                queue = %self.base.name(),
                trace_id = ?context.trace_id(),
                count = pending.len(),
                "Delivering buffered messages to receiver"
            );

            for envelope in pending {
                self.deliver(&receiver, envelope).await;
            }
        }

        info!(
            queue = %self.base.name(),
            trace_id = ?context.trace_id(),
            listening = self.is_listening(),
            "Registered live receiver"
        );
        Ok(())
    }

    async fn end_listen(&self, context: &Context) -> Result<(), QueueError> {
        self.state().receiver = None;

        debug!(
            queue = %self.base.name(),
            trace_id = ?context.trace_id(),
            "Unregistered live receiver"
        );
        Ok(())
    }
}

// ============================================================================
// LoopbackTransport
// ============================================================================

#[derive(Debug, Default)]
struct LoopbackState {
    feed: Option<MessageFeed>,
    pending: VecDeque<MessageEnvelope>,
    in_flight: HashMap<String, MessageEnvelope>,
    dead_letters: Vec<MessageEnvelope>,
    next_delivery: u64,
    connected: bool,
}

impl LoopbackState {
    /// Tag a message with a fresh delivery reference and track it
    fn tag(&mut self, mut envelope: MessageEnvelope) -> MessageEnvelope {
        let tag = format!("loopback-{}", self.next_delivery);
        self.next_delivery += 1;
        envelope.set_reference(Some(MessageReference::Transport(tag.clone())));
        self.in_flight.insert(tag, envelope.clone());
        envelope
    }
}

/// In-process transport that delivers every sent message back to its own
/// queue, with a retained dead-letter list.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    state: Mutex<LoopbackState>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages moved to the dead-letter list, oldest first
    pub fn dead_letters(&self) -> Vec<MessageEnvelope> {
        self.state().dead_letters.clone()
    }

    /// Messages delivered but not yet settled
    pub fn in_flight_count(&self) -> usize {
        self.state().in_flight.len()
    }

    /// Messages sent while no subscription was active
    pub fn pending_count(&self) -> usize {
        self.state().pending.len()
    }

    fn state(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle(&self, message: &mut MessageEnvelope) -> Option<MessageEnvelope> {
        let tag = match message.reference() {
            Some(MessageReference::Transport(tag)) => tag.clone(),
            _ => return None,
        };
        message.set_reference(None);
        self.state().in_flight.remove(&tag)
    }

    /// Push through the active feed, or keep the message pending
    async fn deliver(&self, envelope: MessageEnvelope) {
        let feed = self.state().feed.clone();
        let Some(feed) = feed else {
            self.state().pending.push_back(envelope);
            return;
        };

        let tagged = self.state().tag(envelope);
        if !feed.push(tagged.clone()).await {
            let mut state = self.state();
            if let Some(MessageReference::Transport(tag)) = tagged.reference() {
                state.in_flight.remove(tag);
            }
            let mut untagged = tagged;
            untagged.set_reference(None);
            state.pending.push_back(untagged);
        }
    }
}

#[async_trait]
impl CacheTransport for LoopbackTransport {
    async fn open_with_params(
        &self,
        _context: &Context,
        params: &ResolvedParams,
    ) -> Result<(), QueueError> {
        self.state().connected = true;
        debug!(
            has_connection = params.connection.is_some(),
            "Loopback transport connected"
        );
        Ok(())
    }

    async fn close(&self, _context: &Context) -> Result<(), QueueError> {
        let mut state = self.state();
        state.connected = false;
        state.feed = None;
        Ok(())
    }

    async fn subscribe(&self, _context: &Context, feed: MessageFeed) -> Result<(), QueueError> {
        let pending: Vec<MessageEnvelope> = {
            let mut state = self.state();
            if !state.connected {
                return Err(QueueError::ConnectionFailed {
                    message: "loopback transport is not connected".to_string(),
                });
            }
            state.feed = Some(feed);
            state.pending.drain(..).collect()
        };

        for envelope in pending {
            self.deliver(envelope).await;
        }
        Ok(())
    }

    async fn unsubscribe(&self, _context: &Context) -> Result<(), QueueError> {
        self.state().feed = None;
        Ok(())
    }

    async fn send(
        &self,
        _context: &Context,
        mut envelope: MessageEnvelope,
    ) -> Result<(), QueueError> {
        envelope.set_sent_time(crate::envelope::Timestamp::now());
        self.deliver(envelope).await;
        Ok(())
    }

    async fn renew_lock(
        &self,
        _message: &MessageEnvelope,
        _lock_timeout: Duration,
    ) -> Result<(), QueueError> {
        // Loopback deliveries never expire
        Ok(())
    }

    async fn complete(&self, message: &mut MessageEnvelope) -> Result<(), QueueError> {
        self.settle(message);
        Ok(())
    }

    async fn abandon(&self, message: &mut MessageEnvelope) -> Result<(), QueueError> {
        if let Some(original) = self.settle(message) {
            self.deliver(original).await;
        }
        Ok(())
    }

    async fn move_to_dead_letter(&self, message: &mut MessageEnvelope) -> Result<(), QueueError> {
        if let Some(mut original) = self.settle(message) {
            original.set_reference(None);
            self.state().dead_letters.push(original);
        }
        Ok(())
    }
}
