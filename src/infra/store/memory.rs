//! In-memory budget store.
//!
//! Every operation runs under one mutex, so a claim is trivially atomic and
//! concurrent claimers get disjoint sets. Suitable for tests, benches and
//! single-process deployments without durability needs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::core::budget::{BudgetKey, CallBudget, CallOutcome};
use crate::core::claim::{claim_row, LeasePolicy};
use crate::core::error::StoreError;
use crate::core::store::BudgetStore;

/// Budget rows kept in a `BTreeMap` behind a `parking_lot::Mutex`.
#[derive(Default)]
pub struct InMemoryBudgetStore {
    rows: Mutex<BTreeMap<BudgetKey, CallBudget>>,
}

impl InMemoryBudgetStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a row as-is.
    pub fn put(&self, budget: CallBudget) {
        self.rows.lock().insert(budget.key, budget);
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    /// Whether the store holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }

    /// Copy of all rows ordered by key.
    #[must_use]
    pub fn snapshot(&self) -> Vec<CallBudget> {
        self.rows.lock().values().cloned().collect()
    }
}

#[async_trait]
impl BudgetStore for InMemoryBudgetStore {
    async fn enroll(&self, keys: &[BudgetKey], now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut rows = self.rows.lock();
        let mut created = 0;
        for key in keys {
            rows.entry(*key).or_insert_with(|| {
                created += 1;
                CallBudget::new(*key, now)
            });
        }
        Ok(created)
    }

    async fn get(&self, key: BudgetKey) -> Result<Option<CallBudget>, StoreError> {
        Ok(self.rows.lock().get(&key).cloned())
    }

    async fn has_any(&self) -> Result<bool, StoreError> {
        Ok(!self.rows.lock().is_empty())
    }

    async fn earliest_next_eligible(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .rows
            .lock()
            .values()
            .filter(|b| !b.is_stopped())
            .filter_map(|b| b.next_eligible_at)
            .min())
    }

    async fn claim_due_jobs(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease: &LeasePolicy,
    ) -> Result<Vec<BudgetKey>, StoreError> {
        let mut rows = self.rows.lock();

        let mut overdue: Vec<(DateTime<Utc>, BudgetKey)> = rows
            .values()
            .filter(|b| !b.is_stopped())
            .filter_map(|b| b.next_eligible_at.filter(|at| *at <= now).map(|at| (at, b.key)))
            .collect();
        overdue.sort_unstable();
        overdue.truncate(limit);

        let left = limit - overdue.len();
        let unscheduled: Vec<BudgetKey> = rows
            .values()
            .filter(|b| !b.is_stopped() && b.next_eligible_at.is_none())
            .map(|b| b.key)
            .take(left)
            .collect();

        let mut claimed = Vec::with_capacity(overdue.len() + unscheduled.len());
        for key in overdue.into_iter().map(|(_, k)| k).chain(unscheduled) {
            if let Some(budget) = rows.get_mut(&key) {
                if claim_row(budget, now, lease) {
                    claimed.push(key);
                }
            }
        }
        Ok(claimed)
    }

    async fn apply_outcome(
        &self,
        key: BudgetKey,
        outcome: &CallOutcome,
        now: DateTime<Utc>,
    ) -> Result<CallBudget, StoreError> {
        let mut rows = self.rows.lock();
        let budget = rows.entry(key).or_insert_with(|| CallBudget::new(key, now));
        budget.apply_outcome(outcome, now);
        Ok(budget.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::budget::{BudgetMode, Cooldown};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap()
    }

    fn scheduled(key: BudgetKey, at: DateTime<Utc>) -> CallBudget {
        let mut b = CallBudget::new(key, now());
        b.next_eligible_at = Some(at);
        b
    }

    #[tokio::test]
    async fn test_enroll_is_idempotent() {
        let store = InMemoryBudgetStore::new();
        let keys = [BudgetKey::new(1, 1), BudgetKey::new(1, 2)];
        assert_eq!(store.enroll(&keys, now()).await.unwrap(), 2);
        assert_eq!(store.enroll(&keys, now()).await.unwrap(), 0);
        assert_eq!(store.len(), 2);
        assert!(store.has_any().await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_overdue_first_oldest_first() {
        let store = InMemoryBudgetStore::new();
        store.put(scheduled(BudgetKey::new(1, 1), now() - Duration::seconds(5)));
        store.put(scheduled(BudgetKey::new(2, 1), now() - Duration::seconds(50)));
        store.put(scheduled(BudgetKey::new(3, 1), now() + Duration::seconds(50)));
        store.put(CallBudget::new(BudgetKey::new(4, 1), now()));

        let claimed = store.claim_due_jobs(now(), 2, &LeasePolicy::default()).await.unwrap();
        assert_eq!(claimed, vec![BudgetKey::new(2, 1), BudgetKey::new(1, 1)]);

        // Leased rows are no longer due; the unscheduled row fills the next batch.
        let claimed = store.claim_due_jobs(now(), 10, &LeasePolicy::default()).await.unwrap();
        assert_eq!(claimed, vec![BudgetKey::new(4, 1)]);
    }

    #[tokio::test]
    async fn test_claim_skips_stopped_and_cooling_rows() {
        let store = InMemoryBudgetStore::new();
        let mut stopped = scheduled(BudgetKey::new(1, 1), now() - Duration::seconds(1));
        stopped.mode = BudgetMode::Stopped;
        store.put(stopped);

        let mut cooling = scheduled(BudgetKey::new(2, 1), now() - Duration::seconds(1));
        cooling.cooldown_until = Some(now() + Duration::seconds(600));
        store.put(cooling);

        let claimed = store.claim_due_jobs(now(), 10, &LeasePolicy::default()).await.unwrap();
        assert!(claimed.is_empty());
        let cooling = store.get(BudgetKey::new(2, 1)).await.unwrap().unwrap();
        assert_eq!(cooling.next_eligible_at, Some(now() + Duration::seconds(600)));
        assert_eq!(
            store.earliest_next_eligible().await.unwrap(),
            Some(now() + Duration::seconds(600))
        );
    }

    #[tokio::test]
    async fn test_apply_outcome_creates_missing_row() {
        let store = InMemoryBudgetStore::new();
        let key = BudgetKey::new(9, 2);
        let outcome = CallOutcome::failure_with_cooldown(Cooldown::plain(300));
        let b = store.apply_outcome(key, &outcome, now()).await.unwrap();
        assert_eq!(b.total_errors, 1);
        assert_eq!(b.next_eligible_at, Some(now() + Duration::seconds(300)));
        assert_eq!(store.len(), 1);
    }
}
