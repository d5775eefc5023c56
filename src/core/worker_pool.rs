//! Bounded worker pool running scheduler jobs as async tasks.
//!
//! At most `worker_count` jobs execute at once; the rest wait on a semaphore
//! permit. [`WorkerPool::run_batch`] is the batch barrier the scheduler
//! loop waits on before it claims again.
//!
//! # Design Principles
//!
//! - **No polling**: Results come back over oneshot channels
//! - **Semaphore-based concurrency**: Efficient permit-based limiting
//! - **Isolated jobs**: A panicking job fails alone; siblings still report
//!
//! # Example
//!
//! ```rust,ignore
//! use prometheus_call_budget::config::WorkerPoolConfig;
//! use prometheus_call_budget::core::WorkerPool;
//!
//! let pool = WorkerPool::new(WorkerPoolConfig::new().with_worker_count(4), my_executor)?;
//! let results = pool.run_batch(jobs).await?;
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, info, warn};

use crate::config::WorkerPoolConfig;
use crate::core::executor::WorkerExecutor;

/// Errors that can occur when using a `WorkerPool`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The batch is larger than the pool accepts at once.
    QueueFull {
        /// Jobs offered.
        requested: usize,
        /// Maximum accepted.
        max: usize,
    },

    /// The pool has been shut down.
    PoolShutdown,

    /// Configuration validation failed.
    InvalidConfig(String),

    /// Internal error (job panicked, channel closed, etc.).
    Internal(String),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull { requested, max } => {
                write!(f, "batch too large: requested {requested}, max {max}")
            }
            Self::PoolShutdown => write!(f, "pool has been shut down"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for PoolError {}

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PoolStats {
    /// Number of concurrent workers.
    pub worker_count: usize,

    /// Currently executing jobs.
    pub active_tasks: u64,

    /// Jobs waiting for a worker.
    pub queued_tasks: u64,

    /// Total jobs that finished.
    pub completed_tasks: u64,

    /// Total jobs that panicked or were dropped.
    pub failed_tasks: u64,

    /// Total jobs submitted.
    pub submitted_tasks: u64,

    /// Total batches run.
    pub batches: u64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub active_tasks: AtomicU64,
    pub queued_tasks: AtomicU64,
    pub completed_tasks: AtomicU64,
    pub failed_tasks: AtomicU64,
    pub submitted_tasks: AtomicU64,
    pub batches: AtomicU64,
}

impl PoolCounters {
    /// Get a snapshot of current statistics.
    pub fn snapshot(&self, worker_count: usize) -> PoolStats {
        PoolStats {
            worker_count,
            active_tasks: self.active_tasks.load(Ordering::Relaxed),
            queued_tasks: self.queued_tasks.load(Ordering::Relaxed),
            completed_tasks: self.completed_tasks.load(Ordering::Relaxed),
            failed_tasks: self.failed_tasks.load(Ordering::Relaxed),
            submitted_tasks: self.submitted_tasks.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
        }
    }
}

/// Fixed-size pool of async workers.
pub struct WorkerPool<P, R, E>
where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    /// Pool configuration.
    config: WorkerPoolConfig,

    /// Executor for job execution.
    executor: E,

    /// Semaphore for concurrency control.
    semaphore: Arc<Semaphore>,

    /// Pool statistics counters (lock-free).
    counters: Arc<PoolCounters>,

    /// Shutdown flag (lock-free).
    shutdown: Arc<AtomicBool>,

    _marker: std::marker::PhantomData<fn(P) -> R>,
}

impl<P, R, E> WorkerPool<P, R, E>
where
    P: Send + 'static,
    R: Send + 'static,
    E: WorkerExecutor<P, R>,
{
    /// Create a new worker pool with the given configuration and executor.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` if the configuration is invalid.
    pub fn new(config: WorkerPoolConfig, executor: E) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;

        info!(
            worker_count = config.worker_count,
            max_batch = config.max_batch,
            "WorkerPool initialized"
        );

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(config.worker_count)),
            config,
            executor,
            counters: Arc::new(PoolCounters::default()),
            shutdown: Arc::new(AtomicBool::new(false)),
            _marker: std::marker::PhantomData,
        })
    }

    /// Submit one job; the receiver yields its result.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - `PoolError::PoolShutdown` if the pool has been shut down
    pub fn submit(&self, payload: P) -> Result<oneshot::Receiver<R>, PoolError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(PoolError::PoolShutdown);
        }

        let (tx, rx) = oneshot::channel();
        let task_id = self.counters.submitted_tasks.fetch_add(1, Ordering::Relaxed);
        self.counters.queued_tasks.fetch_add(1, Ordering::Relaxed);

        let semaphore = Arc::clone(&self.semaphore);
        let counters = Arc::clone(&self.counters);
        let executor = self.executor.clone();

        tokio::spawn(async move {
            // Acquire semaphore permit (efficient async wait, no polling)
            let Ok(_permit) = semaphore.acquire_owned().await else {
                counters.queued_tasks.fetch_sub(1, Ordering::Relaxed);
                counters.failed_tasks.fetch_add(1, Ordering::Relaxed);
                return;
            };

            counters.queued_tasks.fetch_sub(1, Ordering::Relaxed);
            counters.active_tasks.fetch_add(1, Ordering::Relaxed);
            debug!(task_id, "worker executing job");

            let guard = ActiveGuard(Arc::clone(&counters));
            let result = executor.execute(payload).await;
            drop(guard);

            counters.completed_tasks.fetch_add(1, Ordering::Relaxed);
            debug!(task_id, "worker completed job");

            // Receiver gone means the batch was abandoned; nothing to do.
            let _ = tx.send(result);
        });

        Ok(rx)
    }

    /// Run a whole batch and wait until every job has finished.
    ///
    /// Results are returned in submission order. A job that panicked shows
    /// up as `Err(PoolError::Internal)` without affecting its siblings.
    ///
    /// # Errors
    ///
    /// - `PoolError::QueueFull` if the batch exceeds `max_batch`
    /// - `PoolError::PoolShutdown` if the pool has been shut down
    pub async fn run_batch(&self, payloads: Vec<P>) -> Result<Vec<Result<R, PoolError>>, PoolError> {
        if payloads.len() > self.config.max_batch {
            warn!(requested = payloads.len(), max = self.config.max_batch, "batch rejected");
            return Err(PoolError::QueueFull {
                requested: payloads.len(),
                max: self.config.max_batch,
            });
        }

        let receivers = payloads
            .into_iter()
            .map(|p| self.submit(p))
            .collect::<Result<Vec<_>, _>>()?;
        self.counters.batches.fetch_add(1, Ordering::Relaxed);

        let mut results = Vec::with_capacity(receivers.len());
        for rx in receivers {
            results.push(rx.await.map_err(|_| {
                PoolError::Internal("job dropped before reporting a result".into())
            }));
        }
        Ok(results)
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot(self.config.worker_count)
    }

    /// Stop accepting work. Jobs already holding a permit run to completion;
    /// jobs still waiting for one are dropped.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.semaphore.close();
        info!("worker pool shut down");
    }
}

/// Decrements the active counter even if the job panics; panicking jobs are
/// counted as failed.
struct ActiveGuard(Arc<PoolCounters>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active_tasks.fetch_sub(1, Ordering::Relaxed);
        if std::thread::panicking() {
            self.0.failed_tasks.fetch_add(1, Ordering::Relaxed);
        }
    }
}
