//! Tests for the shared queue base.

use super::*;
use crate::error::ErrorKind;

#[test]
fn test_new_base_is_closed() {
    let base = QueueBase::new("TestQueue", MessagingCapabilities::all());

    assert_eq!(base.name(), "TestQueue");
    assert!(!base.is_open());

    let error = base.check_open(&Context::new()).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::InvalidState);
    assert_eq!(error.code(), "NOT_OPENED");
}

#[test]
fn test_open_close_lifecycle() {
    let base = QueueBase::new("TestQueue", MessagingCapabilities::all());

    base.mark_opened();
    assert!(base.check_open(&Context::new()).is_ok());

    base.mark_opened();
    assert!(base.is_open(), "Opening twice keeps the queue open");

    base.mark_closed();
    base.mark_closed();
    assert!(!base.is_open());
}

#[test]
fn test_guard_checks_capability_before_state() {
    let base = QueueBase::new("TestQueue", MessagingCapabilities::none());

    let error = base
        .guard(&Context::new(), QueueOperation::Peek)
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::NotImplemented);

    let base = QueueBase::new("TestQueue", MessagingCapabilities::all());
    let error = base
        .guard(&Context::new(), QueueOperation::Peek)
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::InvalidState);

    base.mark_opened();
    assert!(base.guard(&Context::new(), QueueOperation::Peek).is_ok());
}

#[tokio::test]
async fn test_resolve_params_from_config_sections() {
    let mut config = QueueConfig::named("orders");
    config.connection = Some(ConnectionParams {
        host: Some("broker.local".to_string()),
        port: Some(9092),
        ..ConnectionParams::default()
    });

    let base = QueueBase::from_config(&config, MessagingCapabilities::all());
    let params = base.resolve_params(&Context::new()).await.unwrap();

    let connection = params.connection.expect("connection should resolve");
    assert_eq!(connection.host.as_deref(), Some("broker.local"));
    assert_eq!(connection.port, Some(9092));
    assert!(params.credential.is_none());
}

#[tokio::test]
async fn test_resolve_params_uses_injected_resolvers() {
    let mut connection_resolver = MockConnectionResolver::new();
    connection_resolver
        .expect_resolve()
        .times(1)
        .returning(|context| {
            assert_eq!(context.trace_id(), Some("open-1"));
            Ok(Some(ConnectionParams {
                uri: Some("kafka://localhost:9092".to_string()),
                ..ConnectionParams::default()
            }))
        });

    let mut credential_resolver = MockCredentialResolver::new();
    credential_resolver
        .expect_resolve()
        .times(1)
        .returning(|_| Ok(None));

    let base = QueueBase::with_resolvers(
        "events",
        MessagingCapabilities::all(),
        Arc::new(connection_resolver),
        Arc::new(credential_resolver),
    );

    let params = base
        .resolve_params(&Context::with_trace_id("open-1"))
        .await
        .unwrap();

    assert_eq!(
        params.connection.and_then(|c| c.uri),
        Some("kafka://localhost:9092".to_string())
    );
}

#[tokio::test]
async fn test_resolver_failure_propagates() {
    let mut connection_resolver = MockConnectionResolver::new();
    connection_resolver.expect_resolve().returning(|_| {
        Err(QueueError::ConnectionFailed {
            message: "discovery unavailable".to_string(),
        })
    });

    let mut credential_resolver = MockCredentialResolver::new();
    credential_resolver.expect_resolve().never();

    let base = QueueBase::with_resolvers(
        "events",
        MessagingCapabilities::all(),
        Arc::new(connection_resolver),
        Arc::new(credential_resolver),
    );

    let error = base.resolve_params(&Context::new()).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Connection);
}
