//! Tests for utility functions

use chrono::{Duration, TimeZone, Timelike, Utc};
use prometheus_call_budget::util::{jitter_secs, jittered, next_midnight, same_day, secs};

#[test]
fn test_next_midnight_is_start_of_next_utc_day() {
    let t = Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 59).unwrap();
    let m = next_midnight(t);
    assert_eq!(m, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
    assert_eq!(m.hour(), 0);
}

#[test]
fn test_same_day() {
    let a = Utc.with_ymd_and_hms(2025, 5, 5, 0, 0, 1).unwrap();
    assert!(same_day(a, a + Duration::hours(23)));
    assert!(!same_day(a, a + Duration::hours(24)));
}

#[test]
fn test_jitter_bounds() {
    let now = Utc.with_ymd_and_hms(2025, 5, 5, 10, 0, 0).unwrap();
    for _ in 0..200 {
        let j = jitter_secs(8, 15);
        assert!((8..=15).contains(&j));
        let t = jittered(now, 2, 5);
        assert!(t >= now + Duration::seconds(2) && t <= now + Duration::seconds(5));
    }
    assert_eq!(jitter_secs(7, 3), 7);
}

#[test]
fn test_secs_conversion() {
    assert_eq!(secs(1800), Duration::seconds(1800));
}
