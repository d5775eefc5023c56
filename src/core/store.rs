//! Budget store abstraction.
//!
//! A store is the single owner of [`CallBudget`] rows. Every mutation goes
//! through one of the methods below, each of which is one atomic unit of
//! work against the backing storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::budget::{BudgetKey, CallBudget, CallOutcome};
use crate::core::claim::LeasePolicy;
use crate::core::error::StoreError;

/// Durable table of call budgets keyed by (resource, api type).
#[async_trait]
pub trait BudgetStore: Send + Sync + 'static {
    /// Create missing rows for `keys` with `daily_reset_at = now`.
    /// Existing rows are left untouched. Returns how many rows were created.
    async fn enroll(&self, keys: &[BudgetKey], now: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Load one row.
    async fn get(&self, key: BudgetKey) -> Result<Option<CallBudget>, StoreError>;

    /// Whether any row exists at all.
    async fn has_any(&self) -> Result<bool, StoreError>;

    /// Earliest scheduled `next_eligible_at` among rows that are not stopped.
    async fn earliest_next_eligible(&self) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Claim up to `limit` due rows and lease them to the caller.
    ///
    /// Phase 1 takes overdue rows (`next_eligible_at <= now`) oldest first,
    /// phase 2 fills the remainder with never-scheduled rows. Rows held by
    /// a concurrent claim are skipped, never awaited. Concurrent callers
    /// always receive disjoint sets.
    async fn claim_due_jobs(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease: &LeasePolicy,
    ) -> Result<Vec<BudgetKey>, StoreError>;

    /// Apply a finished job's outcome to its row, creating it if missing.
    async fn apply_outcome(
        &self,
        key: BudgetKey,
        outcome: &CallOutcome,
        now: DateTime<Utc>,
    ) -> Result<CallBudget, StoreError>;
}
