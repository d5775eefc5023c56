//! Worker pool configuration.

use serde::{Deserialize, Serialize};

/// Sizing of the bounded worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Jobs executing concurrently.
    pub worker_count: usize,
    /// Largest batch accepted by `run_batch`.
    pub max_batch: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        let worker_count = default_worker_count();
        Self {
            worker_count,
            max_batch: default_batch_limit(worker_count),
        }
    }
}

impl WorkerPoolConfig {
    /// Defaults sized from available parallelism.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the worker count.
    #[must_use]
    pub const fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Override the largest accepted batch.
    #[must_use]
    pub const fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch;
        self
    }

    /// Validate pool configuration values.
    ///
    /// # Errors
    ///
    /// Returns a message naming the offending field.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.max_batch == 0 {
            return Err("max_batch must be greater than 0".into());
        }
        Ok(())
    }
}

/// Two workers per available core, never fewer than two.
#[must_use]
pub fn default_worker_count() -> usize {
    (num_cpus::get() * 2).max(2)
}

/// Claim batch default: twenty rows per worker.
#[must_use]
pub const fn default_batch_limit(worker_count: usize) -> usize {
    worker_count * 20
}
