//! # Queue Engine
//!
//! In-process reliable message queue core with at-least-once delivery.
//!
//! This library provides:
//! - A transport-neutral message envelope with a JSON wire format
//! - Capability negotiation for optional queue operations
//! - Visibility-timeout locking with complete, abandon, and dead-letter outcomes
//! - Pull-style (`receive`, `peek`) and push-style (`listen`) consumption
//! - A buffer-backed engine that broker adapters plug into through [`CacheTransport`]
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`envelope`] - Message envelope, identifiers, and delivery references
//! - [`capabilities`] - Capability descriptor and gated operations
//! - [`config`] - Layered queue configuration
//! - [`base`] - Lifecycle and parameter resolution shared by every engine
//! - [`queue`] - The [`MessageQueue`] contract
//! - [`receiver`] - The [`MessageReceiver`] contract for `listen`
//! - [`cached`] - Buffer-backed engine for transport adapters
//! - [`memory`] - Self-contained in-memory engine
//!
//! ## Example
//!
//! ```
//! use queue_engine::{Context, MemoryMessageQueue, MessageEnvelope, MessageQueue};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let queue = MemoryMessageQueue::new("orders");
//! let ctx = Context::with_trace_id("123");
//! queue.open(&ctx).await?;
//!
//! queue
//!     .send(&ctx, MessageEnvelope::new(Some("123"), "Test", "Test message"))
//!     .await?;
//!
//! let mut message = queue
//!     .receive(&ctx, Duration::from_secs(10))
//!     .await?
//!     .expect("message was sent");
//! assert_eq!(message.as_string()?, "Test message");
//!
//! queue.complete(&mut message).await?;
//! assert_eq!(queue.read_message_count().await?, 0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # }).unwrap();
//! ```

// Module declarations
pub mod base;
pub mod buffer;
pub mod cached;
pub mod capabilities;
pub mod config;
pub mod context;
pub mod envelope;
pub mod error;
pub mod memory;
pub mod queue;
pub mod receiver;

// Re-export commonly used types at crate root for convenience
pub use base::{
    ConfigConnectionResolver, ConfigCredentialResolver, ConnectionResolver, CredentialResolver,
    QueueBase, ResolvedParams,
};
pub use buffer::MessageBuffer;
pub use cached::{CacheTransport, CachedMessageQueue, LoopbackTransport, MessageFeed};
pub use capabilities::{MessagingCapabilities, QueueOperation};
pub use config::{
    ConnectionParams, CredentialParams, QueueConfig, QueueOptions, SecretValue,
    DEFAULT_LISTEN_INTERVAL_MS, ENV_PREFIX,
};
pub use context::Context;
pub use envelope::{LockToken, MessageEnvelope, MessageId, MessageReference, Timestamp};
pub use error::{ConfigurationError, ErrorKind, QueueError, SerializationError};
pub use memory::{LockedMessage, MemoryMessageQueue, QueueStats};
pub use queue::{begin_listen, MessageQueue, MessageQueueExt};
pub use receiver::{MessageReceiver, RecordingReceiver};
