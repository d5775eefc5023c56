//! Tests for configuration validation

use prometheus_call_budget::config::{SchedulerConfig, StoreConfig, WorkerPoolConfig};

#[test]
fn test_scheduler_defaults() {
    let cfg = SchedulerConfig::default();
    assert!(cfg.worker_count >= 2);
    assert_eq!(cfg.batch_limit, None);
    assert_eq!(cfg.effective_batch_limit(), cfg.worker_count * 20);
    assert_eq!(cfg.call_timeout_secs, 10);
    assert_eq!(cfg.idle_interval_secs, 30);
    assert_eq!(cfg.max_idle_sleep_secs, 60);
    assert_eq!(cfg.error_backoff_secs, 5);
    assert!(cfg.lease_policy().floor_secs >= 2 * cfg.job_deadline().as_secs());
    assert!(cfg.validate().is_ok());
}

#[test]
fn test_scheduler_config_from_json() {
    let cfg = SchedulerConfig::from_json_str(r#"{"worker_count": 4, "call_timeout_secs": 3}"#).unwrap();
    assert_eq!(cfg.worker_count, 4);
    assert_eq!(cfg.effective_batch_limit(), 80);
    // 6s deadline times 21 waves.
    assert_eq!(cfg.lease_policy().floor_secs, 126);
    assert_eq!(cfg.idle_interval_secs, 30);
}

#[test]
fn test_scheduler_config_rejects_bad_values() {
    assert!(SchedulerConfig::from_json_str(r#"{"worker_count": 0}"#).is_err());
    assert!(SchedulerConfig::from_json_str(r#"{"batch_limit": 0}"#).is_err());
    assert!(
        SchedulerConfig::from_json_str(r#"{"lease_jitter_min_secs": 9, "lease_jitter_max_secs": 1}"#)
            .is_err()
    );
    assert!(SchedulerConfig::from_json_str("not json").is_err());
}

#[test]
fn test_pool_config_validation() {
    assert!(WorkerPoolConfig::new().validate().is_ok());
    assert!(WorkerPoolConfig::new().with_worker_count(0).validate().is_err());
    assert!(WorkerPoolConfig::new().with_max_batch(0).validate().is_err());
}

#[test]
fn test_store_config_defaults() {
    let cfg = StoreConfig::new("postgres://localhost/budget");
    assert_eq!(cfg.max_connections, 10);
    assert_eq!(cfg.lock_timeout_secs, 3);
}
