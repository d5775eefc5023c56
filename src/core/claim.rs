//! Claim lease policy and the per-row claim decision shared by all stores.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::core::budget::CallBudget;
use crate::util::clock::{jitter_secs, secs};

/// How long a claimed row stays invisible to other claimers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeasePolicy {
    /// Lower bound of the random lease part, seconds.
    pub jitter_min_secs: u64,
    /// Upper bound of the random lease part, seconds.
    pub jitter_max_secs: u64,
    /// Fixed part added to every lease, seconds. Sized to the time a full
    /// batch needs to drain through the worker pool.
    pub floor_secs: u64,
}

impl Default for LeasePolicy {
    fn default() -> Self {
        Self {
            jitter_min_secs: 2,
            jitter_max_secs: 5,
            floor_secs: 0,
        }
    }
}

impl LeasePolicy {
    /// Draw one lease length.
    #[must_use]
    pub fn lease(&self) -> Duration {
        secs(self.floor_secs) + Duration::seconds(jitter_secs(self.jitter_min_secs, self.jitter_max_secs))
    }

    /// Shortest lease [`lease`](Self::lease) can draw. A row claimed at `t`
    /// stays invisible to other claimers until at least `t + min_lease()`.
    #[must_use]
    pub fn min_lease(&self) -> Duration {
        secs(self.floor_secs) + secs(self.jitter_min_secs)
    }
}

/// Decide whether a locked, due row is handed out.
///
/// Runs the budget gate (daily rollover included). A row that passes gets a
/// lease stamped into `next_eligible_at`; a row that fails is rescheduled so
/// it stops showing up as due.
pub fn claim_row(budget: &mut CallBudget, now: DateTime<Utc>, policy: &LeasePolicy) -> bool {
    if budget.can_call(now) {
        budget.stamp_lease(now, policy.lease());
        true
    } else {
        budget.reschedule(now);
        false
    }
}
