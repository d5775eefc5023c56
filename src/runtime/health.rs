//! Liveness and progress snapshots of a running scheduler.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::core::worker_pool::PoolStats;

/// Point-in-time health of a scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// The loop is running and has not been asked to stop.
    pub alive: bool,
    /// Size of the most recent claim.
    pub last_claimed: usize,
    /// Batches dispatched since start.
    pub batches_run: u64,
    /// Consecutive loop iterations without work.
    pub idle_ticks: u64,
    /// Infrastructure errors since start.
    pub loop_errors: u64,
    /// Worker pool counters.
    pub pool: PoolStats,
}

/// Lock-free counters updated by the scheduler loop.
#[derive(Debug, Default)]
pub struct HealthCounters {
    pub(crate) alive: AtomicBool,
    pub(crate) last_claimed: AtomicUsize,
    pub(crate) batches_run: AtomicU64,
    pub(crate) idle_ticks: AtomicU64,
    pub(crate) loop_errors: AtomicU64,
}

impl HealthCounters {
    /// Count an idle iteration; returns the streak before this one.
    pub(crate) fn idle_tick(&self) -> u64 {
        self.idle_ticks.fetch_add(1, Ordering::Relaxed)
    }

    /// Record a dispatched batch of `claimed` rows.
    pub(crate) fn batch(&self, claimed: usize) {
        self.idle_ticks.store(0, Ordering::Relaxed);
        self.batches_run.fetch_add(1, Ordering::Relaxed);
        self.last_claimed.store(claimed, Ordering::Relaxed);
    }

    /// Snapshot combined with the pool's own counters.
    #[must_use]
    pub fn snapshot(&self, pool: PoolStats) -> HealthReport {
        HealthReport {
            alive: self.alive.load(Ordering::Acquire),
            last_claimed: self.last_claimed.load(Ordering::Relaxed),
            batches_run: self.batches_run.load(Ordering::Relaxed),
            idle_ticks: self.idle_ticks.load(Ordering::Relaxed),
            loop_errors: self.loop_errors.load(Ordering::Relaxed),
            pool,
        }
    }
}
