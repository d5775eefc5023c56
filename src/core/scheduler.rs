//! The scheduler loop: claim due budgets, resolve credentials, dispatch the
//! batch to the worker pool, wait, repeat.
//!
//! One loop per process. Several processes may share one store; the
//! store's claim keeps their batches disjoint.
//!
//! ```rust,ignore
//! let scheduler = Scheduler::new(config, store, registry, catalog, invoker, call_log)?;
//! let handle = scheduler.spawn();
//! // ...
//! handle.shutdown().await;
//! ```

use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::SchedulerConfig;
use crate::core::api_type::OperationCatalog;
use crate::core::budget::{BudgetKey, ResourceId};
use crate::core::call_log::CallLogSink;
use crate::core::error::{CallFailureKind, SchedulerError, StoreError};
use crate::core::executor::{CallInvoker, CredentialRegistry};
use crate::core::job::{BudgetJobExecutor, ClaimedJob, JobReport};
use crate::core::retry::{retry_with_backoff, RetryPolicy};
use crate::core::store::BudgetStore;
use crate::core::worker_pool::WorkerPool;
use crate::runtime::health::{HealthCounters, HealthReport};
use crate::util::clock;

/// Log an empty-store tick every this many ticks.
const EMPTY_LOG_EVERY: u64 = 20;
/// Log a nothing-due tick every this many ticks.
const IDLE_LOG_EVERY: u64 = 10;

/// Counts for one dispatched batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Rows claimed.
    pub claimed: usize,
    /// Jobs handed to the pool.
    pub dispatched: usize,
    /// Calls that succeeded.
    pub succeeded: usize,
    /// Calls that failed, credential misses included.
    pub failed: usize,
    /// Rows parked for lack of a credential.
    pub credential_missing: usize,
    /// Jobs that never reported (panicked).
    pub lost: usize,
    /// Outcomes that could not be persisted.
    pub unpersisted: usize,
    /// Jobs skipped because their claim lease ran short before they started.
    pub expired: usize,
}

impl BatchSummary {
    fn absorb(&mut self, report: &JobReport) {
        if report.lease_expired {
            self.expired += 1;
            return;
        }
        if report.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        if report.failure == Some(CallFailureKind::CredentialMissing) {
            self.credential_missing += 1;
        }
        if !report.persisted {
            self.unpersisted += 1;
        }
    }
}

/// Result of one loop iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tick {
    /// The store holds no rows yet.
    Empty,
    /// Nothing was due; sleep this long before the next iteration.
    Idle(Duration),
    /// A batch ran to completion.
    Ran(BatchSummary),
}

/// Budget-driven call scheduler.
pub struct Scheduler {
    config: SchedulerConfig,
    store: Arc<dyn BudgetStore>,
    registry: Arc<dyn CredentialRegistry>,
    executor: BudgetJobExecutor,
    pool: WorkerPool<ClaimedJob, JobReport, BudgetJobExecutor>,
    retry: RetryPolicy,
    counters: HealthCounters,
}

impl Scheduler {
    /// Assemble a scheduler from its collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Config`] for an invalid configuration.
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn BudgetStore>,
        registry: Arc<dyn CredentialRegistry>,
        catalog: Arc<dyn OperationCatalog>,
        invoker: Arc<dyn CallInvoker>,
        call_log: Arc<dyn CallLogSink>,
    ) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::Config)?;
        let retry = config.retry_policy();
        let executor = BudgetJobExecutor::new(
            catalog,
            invoker,
            Arc::clone(&store),
            call_log,
            config.job_deadline(),
            retry,
        );
        let pool = WorkerPool::new(config.pool_config(), executor.clone())?;
        Ok(Self {
            config,
            store,
            registry,
            executor,
            pool,
            retry,
            counters: HealthCounters::default(),
        })
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Create budget rows for pairs that have none yet.
    ///
    /// # Errors
    ///
    /// Propagates the store error.
    pub async fn enroll(&self, keys: &[BudgetKey]) -> Result<usize, SchedulerError> {
        let created = self.store.enroll(keys, clock::now()).await?;
        if created > 0 {
            info!(created, requested = keys.len(), "enrolled call budgets");
        }
        Ok(created)
    }

    /// Current health snapshot.
    #[must_use]
    pub fn health(&self) -> HealthReport {
        self.counters.snapshot(self.pool.stats())
    }

    /// One loop iteration at the current time. Never sleeps; the caller
    /// decides what to do with [`Tick::Empty`] and [`Tick::Idle`].
    ///
    /// # Errors
    ///
    /// Store, registry and pool failures. All are transient from the
    /// loop's point of view.
    pub async fn tick(&self) -> Result<Tick, SchedulerError> {
        self.tick_at(clock::now()).await
    }

    /// Same as [`tick`](Self::tick) with an explicit claim time.
    ///
    /// # Errors
    ///
    /// See [`tick`](Self::tick).
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<Tick, SchedulerError> {
        if !self.store.has_any().await? {
            if self.counters.idle_tick() % EMPTY_LOG_EVERY == 0 {
                info!("no call budgets yet, idle");
            }
            return Ok(Tick::Empty);
        }

        let limit = self.config.effective_batch_limit();
        let lease = self.config.lease_policy();
        let store = &self.store;
        let claimed = retry_with_backoff("claim", &self.retry, StoreError::is_retryable, || {
            store.claim_due_jobs(now, limit, &lease)
        })
        .await?;
        // Every row claimed above is leased until at least this instant.
        let lease_until = now + lease.min_lease();
        self.counters.last_claimed.store(claimed.len(), Ordering::Relaxed);

        if claimed.is_empty() {
            let next = self.store.earliest_next_eligible().await?;
            if self.counters.idle_tick() % IDLE_LOG_EVERY == 0 {
                info!(next_eligible_at = ?next, "no due jobs");
            }
            return Ok(Tick::Idle(self.idle_sleep(next, clock::now())));
        }

        info!(claimed = claimed.len(), sample = ?&claimed[..claimed.len().min(3)], "claimed jobs");
        self.counters.batch(claimed.len());
        let summary = self.dispatch(claimed, lease_until).await?;
        info!(
            dispatched = summary.dispatched,
            succeeded = summary.succeeded,
            failed = summary.failed,
            credential_missing = summary.credential_missing,
            expired = summary.expired,
            "batch finished"
        );
        Ok(Tick::Ran(summary))
    }

    /// How long to wait when nothing is due.
    fn idle_sleep(&self, next: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
        let Some(next) = next else {
            return Duration::from_secs(self.config.idle_interval_secs);
        };
        let until = (next - now).to_std().unwrap_or(Duration::ZERO);
        until
            .max(Duration::from_secs(1))
            .min(Duration::from_secs(self.config.max_idle_sleep_secs))
    }

    /// Resolve credentials once per resource, park rows without one, run
    /// the rest and wait for all of them.
    async fn dispatch(
        &self,
        claimed: Vec<BudgetKey>,
        lease_until: DateTime<Utc>,
    ) -> Result<BatchSummary, SchedulerError> {
        let resources: Vec<ResourceId> = claimed
            .iter()
            .map(|k| k.resource_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let registry = &self.registry;
        let credentials = retry_with_backoff("credentials", &self.retry, StoreError::is_retryable, || {
            registry.credentials(&resources)
        })
        .await?;

        let mut summary = BatchSummary {
            claimed: claimed.len(),
            ..BatchSummary::default()
        };
        let mut jobs = Vec::with_capacity(claimed.len());
        for key in claimed {
            match credentials.get(&key.resource_id) {
                Some(credential) => jobs.push(ClaimedJob {
                    key,
                    credential: credential.clone(),
                    lease_until,
                }),
                None => {
                    let report = self.executor.reject_missing_credential(key, lease_until).await;
                    summary.absorb(&report);
                }
            }
        }

        summary.dispatched = jobs.len();
        for result in self.pool.run_batch(jobs).await? {
            match result {
                Ok(report) => summary.absorb(&report),
                Err(e) => {
                    error!(error = %e, "job did not report");
                    summary.lost += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Run the loop until `shutdown` flips to `true` or its sender drops.
    /// A batch in flight always finishes first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        self.counters.alive.store(true, Ordering::Release);
        info!(
            workers = self.config.worker_count,
            batch_limit = self.config.effective_batch_limit(),
            "scheduler started"
        );

        while !*shutdown.borrow() {
            let pause = match self.tick().await {
                Ok(Tick::Empty) => Duration::from_secs(self.config.idle_interval_secs),
                Ok(Tick::Idle(pause)) => pause,
                Ok(Tick::Ran(_)) => Duration::ZERO,
                Err(e) => {
                    self.counters.loop_errors.fetch_add(1, Ordering::Relaxed);
                    error!(error = %e, "scheduler iteration failed");
                    Duration::from_secs(self.config.error_backoff_secs)
                }
            };
            if pause.is_zero() {
                continue;
            }
            debug!(pause_ms = pause.as_millis(), "scheduler sleeping");
            tokio::select! {
                () = tokio::time::sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.pool.shutdown();
        self.counters.alive.store(false, Ordering::Release);
        info!("scheduler stopped");
    }

    /// Run the loop on a background task.
    #[must_use]
    pub fn spawn(self) -> SchedulerHandle {
        let scheduler = Arc::new(self);
        let (tx, rx) = watch::channel(false);
        let runner = Arc::clone(&scheduler);
        let join = tokio::spawn(async move { runner.run(rx).await });
        SchedulerHandle {
            scheduler,
            shutdown: tx,
            join,
        }
    }
}

/// Handle to a scheduler running in the background.
pub struct SchedulerHandle {
    scheduler: Arc<Scheduler>,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Health of the running scheduler.
    #[must_use]
    pub fn health(&self) -> HealthReport {
        self.scheduler.health()
    }

    /// The scheduler itself, e.g. for enrollment while running.
    #[must_use]
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Signal shutdown and wait for the loop to exit.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Backend`] if the loop task panicked.
    pub async fn shutdown(self) -> Result<(), SchedulerError> {
        let _ = self.shutdown.send(true);
        self.join
            .await
            .map_err(|e| SchedulerError::Backend(format!("scheduler task failed: {e}")))
    }
}
