//! Shared, transport-independent queue plumbing.
//!
//! [`QueueBase`] holds what every queue implementation has in common: the
//! queue name, its capability descriptor, the open/closed lifecycle flag, and
//! the connection/credential resolvers consulted when the queue opens.
//! Engines embed a `QueueBase` and call [`QueueBase::guard`] at the top of
//! every data-plane operation.

use crate::capabilities::{MessagingCapabilities, QueueOperation};
use crate::config::{ConnectionParams, CredentialParams, QueueConfig};
use crate::context::Context;
use crate::error::QueueError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

#[cfg(test)]
#[path = "base_tests.rs"]
mod tests;

// ============================================================================
// Resolver Collaborators
// ============================================================================

/// Resolves the connection parameters a transport needs to open
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConnectionResolver: Send + Sync {
    async fn resolve(&self, context: &Context) -> Result<Option<ConnectionParams>, QueueError>;
}

/// Resolves the credentials a transport needs to open
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, context: &Context) -> Result<Option<CredentialParams>, QueueError>;
}

/// Connection resolver backed by the `connection` configuration section
#[derive(Debug, Clone, Default)]
pub struct ConfigConnectionResolver {
    connection: Option<ConnectionParams>,
}

impl ConfigConnectionResolver {
    pub fn new(connection: Option<ConnectionParams>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl ConnectionResolver for ConfigConnectionResolver {
    async fn resolve(&self, _context: &Context) -> Result<Option<ConnectionParams>, QueueError> {
        Ok(self.connection.clone())
    }
}

/// Credential resolver backed by the `credential` configuration section
#[derive(Debug, Clone, Default)]
pub struct ConfigCredentialResolver {
    credential: Option<CredentialParams>,
}

impl ConfigCredentialResolver {
    pub fn new(credential: Option<CredentialParams>) -> Self {
        Self { credential }
    }
}

#[async_trait]
impl CredentialResolver for ConfigCredentialResolver {
    async fn resolve(&self, _context: &Context) -> Result<Option<CredentialParams>, QueueError> {
        Ok(self.credential.clone())
    }
}

/// Parameters resolved while opening a queue
#[derive(Debug, Clone, Default)]
pub struct ResolvedParams {
    pub connection: Option<ConnectionParams>,
    pub credential: Option<CredentialParams>,
}

// ============================================================================
// QueueBase
// ============================================================================

/// State and checks shared by all queue engines
pub struct QueueBase {
    name: String,
    capabilities: MessagingCapabilities,
    connection_resolver: Arc<dyn ConnectionResolver>,
    credential_resolver: Arc<dyn CredentialResolver>,
    opened: AtomicBool,
}

impl QueueBase {
    /// Create a base with resolvers that return nothing
    pub fn new(name: impl Into<String>, capabilities: MessagingCapabilities) -> Self {
        Self::with_resolvers(
            name,
            capabilities,
            Arc::new(ConfigConnectionResolver::default()),
            Arc::new(ConfigCredentialResolver::default()),
        )
    }

    /// Create a base whose resolvers read the configuration sections
    pub fn from_config(config: &QueueConfig, capabilities: MessagingCapabilities) -> Self {
        Self::with_resolvers(
            config.name.clone(),
            capabilities,
            Arc::new(ConfigConnectionResolver::new(config.connection.clone())),
            Arc::new(ConfigCredentialResolver::new(config.credential.clone())),
        )
    }

    /// Create a base with explicit resolver collaborators
    pub fn with_resolvers(
        name: impl Into<String>,
        capabilities: MessagingCapabilities,
        connection_resolver: Arc<dyn ConnectionResolver>,
        credential_resolver: Arc<dyn CredentialResolver>,
    ) -> Self {
        Self {
            name: name.into(),
            capabilities,
            connection_resolver,
            credential_resolver,
            opened: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> &MessagingCapabilities {
        &self.capabilities
    }

    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }

    /// Resolve connection and credential parameters for the engine's open step
    pub async fn resolve_params(&self, context: &Context) -> Result<ResolvedParams, QueueError> {
        let connection = self.connection_resolver.resolve(context).await?;
        let credential = self.credential_resolver.resolve(context).await?;

        debug!(
            queue = %self.name,
            trace_id = ?context.trace_id(),
            has_connection = connection.is_some(),
            has_credential = credential.is_some(),
            "Resolved queue parameters"
        );

        Ok(ResolvedParams {
            connection,
            credential,
        })
    }

    pub fn mark_opened(&self) {
        self.opened.store(true, Ordering::Release);
    }

    pub fn mark_closed(&self) {
        self.opened.store(false, Ordering::Release);
    }

    /// Fail with `NotOpened` unless the queue is open
    pub fn check_open(&self, context: &Context) -> Result<(), QueueError> {
        if self.is_open() {
            return Ok(());
        }

        debug!(
            queue = %self.name,
            trace_id = ?context.trace_id(),
            "Operation rejected, queue is not opened"
        );
        Err(QueueError::NotOpened {
            queue: self.name.clone(),
        })
    }

    /// Fail with `NotImplemented` unless the operation is supported
    pub fn check_capability(&self, operation: QueueOperation) -> Result<(), QueueError> {
        self.capabilities.require(&self.name, operation)
    }

    /// Capability check followed by the open check
    pub fn guard(&self, context: &Context, operation: QueueOperation) -> Result<(), QueueError> {
        self.check_capability(operation)?;
        self.check_open(context)
    }
}

impl std::fmt::Debug for QueueBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueBase")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .field("opened", &self.is_open())
            .finish()
    }
}
