//! Queue configuration types and layered loading.
//!
//! Sources are applied in order, later sources overriding earlier ones:
//!  1. Built-in defaults (every field carries a serde default)
//!  2. An optional YAML file
//!  3. Environment variables prefixed `QUEUE_ENGINE__` with `__` as the
//!     nesting separator, e.g. `QUEUE_ENGINE__OPTIONS__LISTEN_INTERVAL_MS=250`

use crate::error::ConfigurationError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use zeroize::Zeroizing;

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "QUEUE_ENGINE";

/// Default listen-loop poll interval in milliseconds
pub const DEFAULT_LISTEN_INTERVAL_MS: u64 = 1000;

/// Configuration for a single queue instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Queue name
    #[serde(alias = "queue")]
    pub name: String,

    /// Behavioural options
    pub options: QueueOptions,

    /// Connection section handed to the connection resolver
    pub connection: Option<ConnectionParams>,

    /// Credential section handed to the credential resolver
    pub credential: Option<CredentialParams>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            options: QueueOptions::default(),
            connection: None,
            credential: None,
        }
    }
}

impl QueueConfig {
    /// Create configuration for a named queue with default options
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Load configuration from an optional YAML file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigurationError::Missing {
                    key: path.display().to_string(),
                });
            }

            builder = builder.add_source(
                config::File::from(path)
                    .required(true)
                    .format(config::FileFormat::Yaml),
            );
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: QueueConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.name.trim().is_empty() {
            return Err(ConfigurationError::Invalid {
                message: "queue name must not be empty".to_string(),
            });
        }

        if self.options.listen_interval_ms == 0 {
            return Err(ConfigurationError::Invalid {
                message: "options.listen_interval_ms must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

/// Behavioural options of a queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueOptions {
    /// Subscribe to the transport as soon as the queue opens
    pub autosubscribe: bool,

    /// Poll interval of the listen loop in milliseconds
    pub listen_interval_ms: u64,

    /// Return messages with expired locks to the queue on the next receive
    pub reclaim_expired_locks: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            autosubscribe: false,
            listen_interval_ms: DEFAULT_LISTEN_INTERVAL_MS,
            reclaim_expired_locks: false,
        }
    }
}

impl QueueOptions {
    /// Listen interval as a duration
    pub fn listen_interval(&self) -> Duration {
        Duration::from_millis(self.listen_interval_ms)
    }
}

/// Connection section for transport-backed queues
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionParams {
    pub uri: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Transport-specific settings
    pub properties: HashMap<String, String>,
}

impl ConnectionParams {
    /// Get a transport-specific property
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Credential section for transport-backed queues
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialParams {
    pub username: Option<String>,
    pub password: Option<SecretValue>,
    pub access_key: Option<SecretValue>,
}

/// Secure container for secret values
///
/// The buffer is zeroed on drop. Secret values are never included in Debug
/// output and serialize as a redaction marker.
#[derive(Clone)]
pub struct SecretValue {
    inner: Zeroizing<String>,
}

impl SecretValue {
    pub const REDACTED: &'static str = "[REDACTED]";

    /// Create secret value from string
    pub fn from_string(value: String) -> Self {
        Self {
            inner: Zeroizing::new(value),
        }
    }

    /// Get secret as string (only for immediate use)
    pub fn expose_secret(&self) -> &str {
        &self.inner
    }

    /// Check if secret is empty
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Get secret length without exposing content
    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretValue")
            .field("length", &self.len())
            .field("value", &Self::REDACTED)
            .finish()
    }
}

impl Serialize for SecretValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(Self::REDACTED)
    }
}

impl<'de> Deserialize<'de> for SecretValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::from_string)
    }
}
