//! Tests for builder modules

use std::sync::Arc;

use async_trait::async_trait;
use prometheus_call_budget::builders::SchedulerBuilder;
use prometheus_call_budget::config::SchedulerConfig;
use prometheus_call_budget::core::{
    BudgetKey, BudgetStore, CallInvoker, Credential, InvokeError, InvokeResponse, OperationDescriptor,
    SchedulerError,
};
use prometheus_call_budget::infra::InMemoryBudgetStore;

struct NeverCalled;

#[async_trait]
impl CallInvoker for NeverCalled {
    async fn invoke(
        &self,
        _operation: &OperationDescriptor,
        _credential: &Credential,
    ) -> Result<InvokeResponse, InvokeError> {
        Err(InvokeError::Network("not expected".into()))
    }
}

#[tokio::test]
async fn test_builder_defaults_and_enroll() {
    let store = Arc::new(InMemoryBudgetStore::new());
    let scheduler = SchedulerBuilder::new(SchedulerConfig {
        worker_count: 2,
        ..SchedulerConfig::default()
    })
    .store(store.clone())
    .invoker(Arc::new(NeverCalled))
    .build()
    .unwrap();

    assert_eq!(scheduler.config().effective_batch_limit(), 80);
    let created = scheduler
        .enroll(&[BudgetKey::new(1, 1), BudgetKey::new(1, 2)])
        .await
        .unwrap();
    assert_eq!(created, 2);
    assert!(store.has_any().await.unwrap());

    let health = scheduler.health();
    assert!(!health.alive);
    assert_eq!(health.pool.worker_count, 2);
}

#[test]
fn test_builder_rejects_invalid_config() {
    let err = SchedulerBuilder::new(SchedulerConfig {
        worker_count: 0,
        ..SchedulerConfig::default()
    })
    .invoker(Arc::new(NeverCalled))
    .build()
    .err()
    .unwrap();
    assert!(matches!(err, SchedulerError::Config(_)));
}
