//! Tests for error types

use prometheus_call_budget::core::{CallFailureKind, InvokeError, PoolError, SchedulerError, StoreError};

#[test]
fn test_store_error_wraps_into_scheduler_error() {
    let err: SchedulerError = StoreError::Unavailable("pool timed out".to_string()).into();
    assert_eq!(
        format!("{err}"),
        "store error: connection unavailable: pool timed out"
    );
}

#[test]
fn test_pool_error_display() {
    let err: SchedulerError = PoolError::QueueFull { requested: 9, max: 4 }.into();
    assert_eq!(format!("{err}"), "pool error: batch too large: requested 9, max 4");
    assert_eq!(format!("{}", PoolError::PoolShutdown), "pool has been shut down");
}

#[test]
fn test_backend_error() {
    let err = SchedulerError::Backend("connection failed".to_string());
    assert_eq!(format!("{err}"), "backend error: connection failed");
}

#[test]
fn test_retryable_classification() {
    assert!(StoreError::LockTimeout("row".into()).is_retryable());
    assert!(StoreError::Conflict("deadlock".into()).is_retryable());
    assert!(StoreError::Unavailable("io".into()).is_retryable());
    assert!(!StoreError::Corrupt("mode".into()).is_retryable());
    assert!(!StoreError::Backend("syntax".into()).is_retryable());
}

#[test]
fn test_invoke_error_display() {
    assert_eq!(format!("{}", InvokeError::Timeout(20)), "call timed out after 20s");
    assert_eq!(
        format!("{}", InvokeError::Network("dns".into())),
        "network error: dns"
    );
    assert_eq!(
        format!("{}", InvokeError::Client("no tls backend".into())),
        "http client setup failed: no tls backend"
    );
}

#[test]
fn test_failure_kind_labels() {
    assert_eq!(CallFailureKind::NetworkOrTimeout.label(), "http-exception");
    assert_eq!(CallFailureKind::UnsupportedOperation.to_string(), "unsupported");
    assert_eq!(
        serde_json::to_string(&CallFailureKind::RateLimited).unwrap(),
        "\"rate_limited\""
    );
}
