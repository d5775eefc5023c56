//! Per-(resource, api type) call budget and its throttling state machine.
//!
//! A [`CallBudget`] decides whether an external call may be attempted now
//! ([`CallBudget::can_call`]) and, after every attempt, when the next one is
//! due ([`CallBudget::record_call`], [`CallBudget::set_cooldown`]).
//!
//! Mode only moves forward:
//!
//! ```text
//! Normal --(1500 successes in one day)--> Reduced --(30 reduced days)--> Stopped
//! ```
//!
//! Stores own persistence and locking; everything here is a pure in-memory
//! transition on a loaded row.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::util::clock::{jittered, next_midnight, same_day, secs};

/// Opaque identifier of a managed resource.
pub type ResourceId = i64;
/// Identifier of an [`ApiType`](crate::core::ApiType).
pub type ApiTypeId = i32;

/// Successful calls in one day that push a Normal budget into Reduced.
pub const REDUCED_THRESHOLD: u64 = 1500;
/// Attempts allowed per day while Reduced.
pub const REDUCED_DAILY_CALLS: u64 = 5;
/// Reduced days after which a budget is Stopped.
pub const STOP_AFTER_REDUCED_DAYS: u32 = 30;

const NORMAL_GAP_SECS: (u64, u64) = (2, 5);
const REDUCED_GAP_SECS: (u64, u64) = (8, 15);
const MIDNIGHT_OFFSET_SECS: i64 = 10;
const MIDNIGHT_JITTER_SECS: u64 = 30;
const STOPPED_PARK_DAYS: i64 = 365 * 10;

/// Primary key of a budget row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BudgetKey {
    /// Managed resource.
    pub resource_id: ResourceId,
    /// Operation type.
    pub api_type_id: ApiTypeId,
}

impl BudgetKey {
    /// Build a key.
    #[must_use]
    pub const fn new(resource_id: ResourceId, api_type_id: ApiTypeId) -> Self {
        Self {
            resource_id,
            api_type_id,
        }
    }
}

impl fmt::Display for BudgetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_id, self.api_type_id)
    }
}

/// Throttling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetMode {
    /// Short cadence, no daily cap.
    #[default]
    Normal,
    /// Wide cadence, capped at five attempts per day.
    Reduced,
    /// Never called again.
    Stopped,
}

impl BudgetMode {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Reduced => "reduced",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for BudgetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BudgetMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Self::Normal),
            "reduced" => Ok(Self::Reduced),
            "stopped" => Ok(Self::Stopped),
            other => Err(format!("unknown budget mode `{other}`")),
        }
    }
}

/// Provider-imposed pause applied before recording a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cooldown {
    /// Length of the pause.
    pub seconds: u64,
    /// Provider error code that triggered it.
    pub error_code: Option<i64>,
    /// Provider error subcode that triggered it.
    pub error_subcode: Option<i64>,
}

impl Cooldown {
    /// Cooldown with no provider diagnostics attached.
    #[must_use]
    pub const fn plain(seconds: u64) -> Self {
        Self {
            seconds,
            error_code: None,
            error_subcode: None,
        }
    }
}

/// What a finished job reports back to its budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallOutcome {
    /// Whether the external call succeeded.
    pub success: bool,
    /// Cooldown to apply before recording the call.
    pub cooldown: Option<Cooldown>,
}

impl CallOutcome {
    /// A successful call.
    #[must_use]
    pub const fn success() -> Self {
        Self {
            success: true,
            cooldown: None,
        }
    }

    /// A failed call without cooldown escalation.
    #[must_use]
    pub const fn failure() -> Self {
        Self {
            success: false,
            cooldown: None,
        }
    }

    /// A failed call that pauses the budget.
    #[must_use]
    pub const fn failure_with_cooldown(cooldown: Cooldown) -> Self {
        Self {
            success: false,
            cooldown: Some(cooldown),
        }
    }
}

/// Persisted throttling record for one (resource, api type) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallBudget {
    /// Row key.
    pub key: BudgetKey,
    /// Most recent attempt.
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Lifetime attempts.
    pub total_calls: u64,
    /// Lifetime successes.
    pub total_success_calls: u64,
    /// Lifetime failures.
    pub total_errors: u64,
    /// Attempts on the day of `daily_reset_at`.
    pub daily_calls: u64,
    /// Successes on the day of `daily_reset_at`.
    pub daily_success_calls: u64,
    /// Day the daily counters belong to.
    pub daily_reset_at: Option<DateTime<Utc>>,
    /// Throttling mode.
    pub mode: BudgetMode,
    /// When Reduced began.
    pub reduced_mode_start: Option<DateTime<Utc>>,
    /// Calendar days spent in Reduced.
    pub reduced_days_count: u32,
    /// Hard floor for the next attempt.
    pub cooldown_until: Option<DateTime<Utc>>,
    /// Soft schedule for the next attempt; doubles as the claim lease.
    pub next_eligible_at: Option<DateTime<Utc>>,
    /// When the last cooldown was applied.
    pub last_rate_limit_at: Option<DateTime<Utc>>,
    /// Error code of the last cooldown.
    pub last_error_code: Option<i64>,
    /// Error subcode of the last cooldown.
    pub last_error_subcode: Option<i64>,
}

impl CallBudget {
    /// Fresh budget created on first scheduling attempt.
    #[must_use]
    pub const fn new(key: BudgetKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            last_checked_at: None,
            total_calls: 0,
            total_success_calls: 0,
            total_errors: 0,
            daily_calls: 0,
            daily_success_calls: 0,
            daily_reset_at: Some(now),
            mode: BudgetMode::Normal,
            reduced_mode_start: None,
            reduced_days_count: 0,
            cooldown_until: None,
            next_eligible_at: None,
            last_rate_limit_at: None,
            last_error_code: None,
            last_error_subcode: None,
        }
    }

    /// Reset daily counters when `now` is on a different day than the one
    /// they belong to. Returns whether a rollover happened.
    pub fn roll_daily(&mut self, now: DateTime<Utc>) -> bool {
        if self.daily_reset_at.is_some_and(|at| same_day(at, now)) {
            return false;
        }
        self.daily_calls = 0;
        self.daily_success_calls = 0;
        self.daily_reset_at = Some(now);
        if self.mode == BudgetMode::Reduced {
            self.reduced_days_count += 1;
            if self.reduced_days_count >= STOP_AFTER_REDUCED_DAYS {
                self.mode = BudgetMode::Stopped;
            }
        }
        true
    }

    /// Whether a call may be attempted at `now`.
    ///
    /// Applies the daily rollover first, so this mutates the counters once
    /// per calendar day.
    pub fn can_call(&mut self, now: DateTime<Utc>) -> bool {
        self.roll_daily(now);

        if self.mode == BudgetMode::Stopped {
            return false;
        }
        if self.cooldown_until.is_some_and(|until| now < until) {
            return false;
        }
        if self.mode == BudgetMode::Reduced && self.daily_calls >= REDUCED_DAILY_CALLS {
            return false;
        }
        if self.next_eligible_at.is_some_and(|at| now < at) {
            return false;
        }
        true
    }

    /// Record one attempt and recompute the next eligible time.
    pub fn record_call(&mut self, success: bool, now: DateTime<Utc>) {
        self.last_checked_at = Some(now);
        self.total_calls += 1;
        self.daily_calls += 1;

        if success {
            self.total_success_calls += 1;
            self.daily_success_calls += 1;
            if self.mode == BudgetMode::Normal && self.daily_success_calls >= REDUCED_THRESHOLD {
                self.mode = BudgetMode::Reduced;
                self.reduced_mode_start = Some(now);
                self.reduced_days_count = 0;
            }
        } else {
            self.total_errors += 1;
        }

        self.reschedule(now);
    }

    /// Pause the budget for `seconds`; the cooldown becomes the next
    /// eligible time unconditionally.
    pub fn set_cooldown(
        &mut self,
        seconds: u64,
        error_code: Option<i64>,
        error_subcode: Option<i64>,
        now: DateTime<Utc>,
    ) {
        let until = now + secs(seconds);
        self.cooldown_until = Some(until);
        self.last_rate_limit_at = Some(now);
        self.last_error_code = error_code;
        self.last_error_subcode = error_subcode;
        self.next_eligible_at = Some(until);
    }

    /// Apply a finished job's outcome: cooldown first, then the call itself.
    pub fn apply_outcome(&mut self, outcome: &CallOutcome, now: DateTime<Utc>) {
        if let Some(cd) = outcome.cooldown {
            self.set_cooldown(cd.seconds, cd.error_code, cd.error_subcode, now);
        }
        self.record_call(outcome.success, now);
    }

    /// Recompute `next_eligible_at` from cooldown and mode.
    pub fn reschedule(&mut self, now: DateTime<Utc>) {
        self.next_eligible_at = Some(self.next_eligible(now));
    }

    fn next_eligible(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        if let Some(until) = self.cooldown_until.filter(|until| now < *until) {
            return until;
        }
        match self.mode {
            BudgetMode::Stopped => now + Duration::days(STOPPED_PARK_DAYS),
            BudgetMode::Reduced if self.daily_calls >= REDUCED_DAILY_CALLS => jittered(
                next_midnight(now) + Duration::seconds(MIDNIGHT_OFFSET_SECS),
                0,
                MIDNIGHT_JITTER_SECS,
            ),
            BudgetMode::Reduced => jittered(now, REDUCED_GAP_SECS.0, REDUCED_GAP_SECS.1),
            BudgetMode::Normal => jittered(now, NORMAL_GAP_SECS.0, NORMAL_GAP_SECS.1),
        }
    }

    /// Stamp a claim lease: the row is not due again before `now + lease`.
    pub fn stamp_lease(&mut self, now: DateTime<Utc>, lease: Duration) {
        self.next_eligible_at = Some(now + lease);
    }

    /// Whether the row can ever be claimed again.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.mode == BudgetMode::Stopped
    }
}
