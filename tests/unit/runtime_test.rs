//! Tests for health reporting

use prometheus_call_budget::core::PoolStats;
use prometheus_call_budget::runtime::{HealthCounters, HealthReport};

#[test]
fn test_fresh_counters_report_idle_scheduler() {
    let counters = HealthCounters::default();
    let report = counters.snapshot(PoolStats {
        worker_count: 4,
        ..PoolStats::default()
    });
    assert!(!report.alive);
    assert_eq!(report.batches_run, 0);
    assert_eq!(report.pool.worker_count, 4);
}

#[test]
fn test_health_report_serializes() {
    let report = HealthCounters::default().snapshot(PoolStats::default());
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["alive"], false);
    assert_eq!(json["last_claimed"], 0);
    let back: HealthReport = serde_json::from_value(json).unwrap();
    assert_eq!(back, report);
}
