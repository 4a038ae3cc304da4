//! Error types for queue operations.

use crate::capabilities::QueueOperation;
use thiserror::Error;

/// Comprehensive error type for all queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue '{queue}' is not opened")]
    NotOpened { queue: String },

    #[error("Operation '{operation}' is not supported by queue '{queue}'")]
    NotImplemented {
        queue: String,
        operation: QueueOperation,
    },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Provider error ({provider}): {code} - {message}")]
    ProviderError {
        provider: String,
        code: String,
        message: String,
    },

    #[error("Serialization failed: {0}")]
    SerializationError(#[from] SerializationError),

    #[error("Configuration error: {0}")]
    ConfigurationError(#[from] ConfigurationError),
}

/// Broad classification of a [`QueueError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Operation attempted in the wrong lifecycle state
    InvalidState,
    /// Operation not supported by the queue's capabilities
    NotImplemented,
    /// Payload or wire codec failure
    ParseError,
    Configuration,
    Connection,
    Provider,
}

impl QueueError {
    /// Get the error classification
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotOpened { .. } => ErrorKind::InvalidState,
            Self::NotImplemented { .. } => ErrorKind::NotImplemented,
            Self::ConnectionFailed { .. } => ErrorKind::Connection,
            Self::ProviderError { .. } => ErrorKind::Provider,
            Self::SerializationError(_) => ErrorKind::ParseError,
            Self::ConfigurationError(_) => ErrorKind::Configuration,
        }
    }

    /// Get the stable error code
    pub fn code(&self) -> &str {
        match self {
            Self::NotOpened { .. } => "NOT_OPENED",
            Self::NotImplemented { .. } => "NOT_IMPLEMENTED",
            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::ProviderError { code, .. } => code,
            Self::SerializationError(_) => "PARSE_ERROR",
            Self::ConfigurationError(_) => "CONFIGURATION_ERROR",
        }
    }

    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NotOpened { .. } => false,
            Self::NotImplemented { .. } => false,
            Self::ConnectionFailed { .. } => true,
            Self::ProviderError { .. } => true, // Provider-specific errors are usually transient
            Self::SerializationError(_) => false,
            Self::ConfigurationError(_) => false,
        }
    }
}

/// Errors during message serialization/deserialization
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("JSON serialization failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Message body is not valid UTF-8")]
    InvalidUtf8,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::NotFound(key) => Self::Missing { key },
            other => Self::Parsing {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
