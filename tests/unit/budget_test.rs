//! Long-running budget scenarios driven through the public API

use chrono::{DateTime, Duration, TimeZone, Utc};
use prometheus_call_budget::core::{
    BudgetKey, BudgetMode, CallBudget, CallOutcome, Cooldown, REDUCED_DAILY_CALLS, REDUCED_THRESHOLD,
};
use rand::Rng;

fn day_start(day: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 1, 0).unwrap() + Duration::days(day)
}

fn rank(mode: BudgetMode) -> u8 {
    match mode {
        BudgetMode::Normal => 0,
        BudgetMode::Reduced => 1,
        BudgetMode::Stopped => 2,
    }
}

#[test]
fn test_busy_resource_lifecycle() {
    let mut b = CallBudget::new(BudgetKey::new(7, 2), day_start(0));

    for i in 0..REDUCED_THRESHOLD {
        let t = day_start(0) + Duration::seconds(i64::try_from(i).unwrap());
        b.record_call(true, t);
    }
    assert_eq!(b.mode, BudgetMode::Reduced);
    assert_eq!(b.reduced_days_count, 0);

    for day in 1..30 {
        for _ in 0..REDUCED_DAILY_CALLS {
            let t = b.next_eligible_at.unwrap().max(day_start(day));
            assert!(b.can_call(t), "day {day} should allow a reduced call");
            b.record_call(true, t);
        }
        assert_eq!(b.reduced_days_count, u32::try_from(day).unwrap());
        let later = b.last_checked_at.unwrap() + Duration::seconds(20);
        assert!(!b.can_call(later), "day {day} cap exceeded");
        assert!(b.next_eligible_at.unwrap() >= day_start(day + 1) - Duration::seconds(60));
    }

    assert!(!b.can_call(day_start(30)));
    assert_eq!(b.mode, BudgetMode::Stopped);
    assert!(!b.can_call(day_start(400)));
}

#[test]
fn test_mode_is_monotonic_under_random_traffic() {
    let mut rng = rand::rng();
    let mut b = CallBudget::new(BudgetKey::new(1, 1), day_start(0));
    let mut t = day_start(0);
    let mut last = rank(b.mode);

    for _ in 0..20_000 {
        t += Duration::seconds(rng.random_range(1..120));
        match rng.random_range(0..10) {
            0 => b.set_cooldown(rng.random_range(60..900), Some(4), None, t),
            1 => {
                let _ = b.can_call(t);
            }
            2 => b.record_call(false, t),
            _ => b.record_call(true, t),
        }
        let now = rank(b.mode);
        assert!(now >= last, "mode went backwards at {t}");
        last = now;
    }
}

#[test]
fn test_cooldown_precedence_scenario() {
    let t = day_start(3);
    let mut b = CallBudget::new(BudgetKey::new(5, 1), t);
    b.apply_outcome(
        &CallOutcome::failure_with_cooldown(Cooldown {
            seconds: 1800,
            error_code: Some(80004),
            error_subcode: Some(2_446_079),
        }),
        t,
    );
    assert_eq!(b.next_eligible_at, Some(t + Duration::seconds(1800)));
    assert_eq!(b.last_error_subcode, Some(2_446_079));
    assert_eq!(b.total_errors, 1);
    assert!(!b.can_call(t + Duration::seconds(1799)));
    assert!(b.can_call(t + Duration::seconds(1800)));
}
