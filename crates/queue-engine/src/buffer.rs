//! Insertion-ordered store of messages awaiting delivery.

use crate::envelope::MessageEnvelope;
use std::collections::VecDeque;

#[cfg(test)]
#[path = "buffer_tests.rs"]
mod tests;

/// FIFO buffer of pending envelopes, owned by a single queue instance
#[derive(Debug, Default)]
pub struct MessageBuffer {
    messages: VecDeque<MessageEnvelope>,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail
    pub fn push(&mut self, envelope: MessageEnvelope) {
        self.messages.push_back(envelope);
    }

    /// Remove and return the head
    pub fn pop(&mut self) -> Option<MessageEnvelope> {
        self.messages.pop_front()
    }

    /// Copy of the head without removing it
    pub fn peek(&self) -> Option<MessageEnvelope> {
        self.messages.front().cloned()
    }

    /// Copies of up to `count` messages from the head
    pub fn peek_batch(&self, count: usize) -> Vec<MessageEnvelope> {
        self.messages.iter().take(count).cloned().collect()
    }

    /// Remove and return everything, oldest first
    pub fn drain(&mut self) -> Vec<MessageEnvelope> {
        self.messages.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
