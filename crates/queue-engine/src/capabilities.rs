//! Capability descriptor for queue implementations.
//!
//! Every queue declares, once and at construction, which operations it
//! supports. Callers consult [`MessagingCapabilities`] before invoking an
//! optional operation; queues guard each optional operation with
//! [`MessagingCapabilities::require`] so an unsupported call fails with
//! [`QueueError::NotImplemented`] instead of silently doing nothing.

use crate::error::QueueError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[cfg(test)]
#[path = "capabilities_tests.rs"]
mod tests;

/// Optional queue operations gated by a capability flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueOperation {
    MessageCount,
    Send,
    Receive,
    Peek,
    PeekBatch,
    RenewLock,
    Abandon,
    DeadLetter,
    Clear,
}

impl QueueOperation {
    /// Get the operation name as used in error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessageCount => "read_message_count",
            Self::Send => "send",
            Self::Receive => "receive",
            Self::Peek => "peek",
            Self::PeekBatch => "peek_batch",
            Self::RenewLock => "renew_lock",
            Self::Abandon => "abandon",
            Self::DeadLetter => "move_to_dead_letter",
            Self::Clear => "clear",
        }
    }
}

impl fmt::Display for QueueOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static declaration of which operations a queue supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagingCapabilities {
    can_message_count: bool,
    can_send: bool,
    can_receive: bool,
    can_peek: bool,
    can_peek_batch: bool,
    can_renew_lock: bool,
    can_abandon: bool,
    can_dead_letter: bool,
    can_clear: bool,
}

impl MessagingCapabilities {
    /// Create capabilities from the nine individual flags
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        can_message_count: bool,
        can_send: bool,
        can_receive: bool,
        can_peek: bool,
        can_peek_batch: bool,
        can_renew_lock: bool,
        can_abandon: bool,
        can_dead_letter: bool,
        can_clear: bool,
    ) -> Self {
        Self {
            can_message_count,
            can_send,
            can_receive,
            can_peek,
            can_peek_batch,
            can_renew_lock,
            can_abandon,
            can_dead_letter,
            can_clear,
        }
    }

    /// Capabilities with every operation supported
    pub fn all() -> Self {
        Self::new(true, true, true, true, true, true, true, true, true)
    }

    /// Capabilities with no optional operation supported
    pub fn none() -> Self {
        Self::new(false, false, false, false, false, false, false, false, false)
    }

    pub fn can_message_count(&self) -> bool {
        self.can_message_count
    }

    pub fn can_send(&self) -> bool {
        self.can_send
    }

    pub fn can_receive(&self) -> bool {
        self.can_receive
    }

    pub fn can_peek(&self) -> bool {
        self.can_peek
    }

    pub fn can_peek_batch(&self) -> bool {
        self.can_peek_batch
    }

    pub fn can_renew_lock(&self) -> bool {
        self.can_renew_lock
    }

    pub fn can_abandon(&self) -> bool {
        self.can_abandon
    }

    pub fn can_dead_letter(&self) -> bool {
        self.can_dead_letter
    }

    pub fn can_clear(&self) -> bool {
        self.can_clear
    }

    /// Check whether an operation is supported
    pub fn supports(&self, operation: QueueOperation) -> bool {
        match operation {
            QueueOperation::MessageCount => self.can_message_count,
            QueueOperation::Send => self.can_send,
            QueueOperation::Receive => self.can_receive,
            QueueOperation::Peek => self.can_peek,
            QueueOperation::PeekBatch => self.can_peek_batch,
            QueueOperation::RenewLock => self.can_renew_lock,
            QueueOperation::Abandon => self.can_abandon,
            QueueOperation::DeadLetter => self.can_dead_letter,
            QueueOperation::Clear => self.can_clear,
        }
    }

    /// Fail with `NotImplemented` when the operation is unsupported
    pub fn require(&self, queue: &str, operation: QueueOperation) -> Result<(), QueueError> {
        if self.supports(operation) {
            Ok(())
        } else {
            Err(QueueError::NotImplemented {
                queue: queue.to_string(),
                operation,
            })
        }
    }
}

impl Default for MessagingCapabilities {
    fn default() -> Self {
        Self::all()
    }
}
