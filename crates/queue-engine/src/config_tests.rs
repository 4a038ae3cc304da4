//! Tests for queue configuration.

use super::*;
use serial_test::serial;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_yaml(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write yaml");
    file
}

#[test]
fn test_defaults() {
    let config = QueueConfig::default();
    assert_eq!(config.name, "default");
    assert!(!config.options.autosubscribe);
    assert_eq!(config.options.listen_interval_ms, 1000);
    assert_eq!(config.options.listen_interval(), Duration::from_secs(1));
    assert!(!config.options.reclaim_expired_locks);
    assert!(config.connection.is_none());
    assert!(config.credential.is_none());
    assert!(config.validate().is_ok());
}

#[test]
fn test_validate_rejects_empty_name() {
    let config = QueueConfig::named("  ");
    assert!(matches!(
        config.validate(),
        Err(ConfigurationError::Invalid { .. })
    ));
}

#[test]
fn test_validate_rejects_zero_listen_interval() {
    let mut config = QueueConfig::named("orders");
    config.options.listen_interval_ms = 0;
    assert!(config.validate().is_err());
}

#[test]
#[serial]
fn test_load_from_yaml_file() {
    let file = write_yaml(
        r#"
queue: orders
options:
  autosubscribe: true
  listen_interval_ms: 250
connection:
  uri: amqp://localhost:5672
  port: 5672
  properties:
    vhost: main
credential:
  username: guest
  password: s3cret
"#,
    );

    let config = QueueConfig::load(Some(file.path())).expect("config should load");

    assert_eq!(config.name, "orders");
    assert!(config.options.autosubscribe);
    assert_eq!(config.options.listen_interval_ms, 250);
    assert!(!config.options.reclaim_expired_locks);

    let connection = config.connection.expect("connection section");
    assert_eq!(connection.uri.as_deref(), Some("amqp://localhost:5672"));
    assert_eq!(connection.port, Some(5672));
    assert_eq!(connection.property("vhost"), Some("main"));

    let credential = config.credential.expect("credential section");
    assert_eq!(credential.username.as_deref(), Some("guest"));
    assert_eq!(
        credential.password.map(|p| p.expose_secret().to_string()),
        Some("s3cret".to_string())
    );
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let file = write_yaml("name: orders\noptions:\n  listen_interval_ms: 250\n");

    std::env::set_var("QUEUE_ENGINE__OPTIONS__LISTEN_INTERVAL_MS", "75");
    let result = QueueConfig::load(Some(file.path()));
    std::env::remove_var("QUEUE_ENGINE__OPTIONS__LISTEN_INTERVAL_MS");

    let config = result.expect("config should load");
    assert_eq!(config.name, "orders");
    assert_eq!(config.options.listen_interval_ms, 75);
}

#[test]
#[serial]
fn test_load_without_file_uses_defaults() {
    let config = QueueConfig::load(None).expect("defaults should load");
    assert_eq!(config.name, "default");
    assert_eq!(config.options, QueueOptions::default());
}

#[test]
#[serial]
fn test_load_missing_file_fails() {
    let result = QueueConfig::load(Some(Path::new("/nonexistent/queue-engine.yaml")));
    assert!(matches!(result, Err(ConfigurationError::Missing { .. })));
}

#[test]
#[serial]
fn test_load_rejects_invalid_values() {
    let file = write_yaml("name: orders\noptions:\n  listen_interval_ms: 0\n");
    assert!(matches!(
        QueueConfig::load(Some(file.path())),
        Err(ConfigurationError::Invalid { .. })
    ));
}

#[test]
fn test_secret_value_is_redacted() {
    let secret = SecretValue::from_string("hunter2".to_string());

    let debug = format!("{:?}", secret);
    assert!(!debug.contains("hunter2"));
    assert!(debug.contains("[REDACTED]"));

    let json = serde_json::to_string(&secret).unwrap();
    assert_eq!(json, "\"[REDACTED]\"");

    assert_eq!(secret.expose_secret(), "hunter2");
    assert_eq!(secret.len(), 7);
    assert!(!secret.is_empty());
}
