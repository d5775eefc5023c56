//! Wall-clock helpers shared by the budget state machine and the scheduler.
//!
//! All scheduling timestamps are UTC; "calendar day" and "midnight" are UTC too.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use rand::Rng;

/// Current UTC time.
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// `now + random(min..=max)` whole seconds.
#[must_use]
pub fn jittered(now: DateTime<Utc>, min_secs: u64, max_secs: u64) -> DateTime<Utc> {
    now + Duration::seconds(jitter_secs(min_secs, max_secs))
}

/// Uniform random whole seconds in `[min, max]`.
///
/// An inverted range collapses to `min`.
#[must_use]
pub fn jitter_secs(min_secs: u64, max_secs: u64) -> i64 {
    let secs = if max_secs <= min_secs {
        min_secs
    } else {
        rand::rng().random_range(min_secs..=max_secs)
    };
    i64::try_from(secs).unwrap_or(i64::MAX)
}

/// Start of the UTC day following `now`.
#[must_use]
pub fn next_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive() + Duration::days(1);
    tomorrow.and_time(NaiveTime::MIN).and_utc()
}

/// Whether two instants fall on the same UTC calendar day.
#[must_use]
pub fn same_day(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.date_naive() == b.date_naive()
}

/// Convert a whole-second count into a chrono duration, saturating.
#[must_use]
pub fn secs(seconds: u64) -> Duration {
    Duration::seconds(i64::try_from(seconds).unwrap_or(i64::MAX / 1000))
}
