//! Scheduler and store configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::pool::{default_batch_limit, default_worker_count, WorkerPoolConfig};
use crate::core::claim::LeasePolicy;
use crate::core::retry::RetryPolicy;

/// Default base URL of the Graph-style provider API.
pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.facebook.com/v21.0";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),

    /// Values parsed but are inconsistent.
    #[error("config invalid: {0}")]
    Rejected(String),
}

/// Root scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Jobs executing concurrently.
    pub worker_count: usize,
    /// Rows claimed per batch; `None` means `worker_count × 20`.
    pub batch_limit: Option<usize>,
    /// Per-request timeout of the external call, seconds.
    pub call_timeout_secs: u64,
    /// Sleep when the store is empty or nothing is scheduled, seconds.
    pub idle_interval_secs: u64,
    /// Upper bound for sleeping until the next due row, seconds.
    pub max_idle_sleep_secs: u64,
    /// Sleep after an infrastructure error, seconds.
    pub error_backoff_secs: u64,
    /// Lower bound of the random claim lease part, seconds.
    pub lease_jitter_min_secs: u64,
    /// Upper bound of the random claim lease part, seconds.
    pub lease_jitter_max_secs: u64,
    /// Attempts for a store mutation before giving up.
    pub store_retry_attempts: u32,
    /// Base backoff between store attempts, milliseconds.
    pub store_retry_base_ms: u64,
    /// Provider API base URL.
    pub graph_base_url: String,
    /// Daemon only: enroll every credentialed resource for every known
    /// api type at startup.
    pub enroll_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            batch_limit: None,
            call_timeout_secs: 10,
            idle_interval_secs: 30,
            max_idle_sleep_secs: 60,
            error_backoff_secs: 5,
            lease_jitter_min_secs: 2,
            lease_jitter_max_secs: 5,
            store_retry_attempts: 3,
            store_retry_base_ms: 50,
            graph_base_url: DEFAULT_GRAPH_BASE_URL.into(),
            enroll_on_start: true,
        }
    }
}

impl SchedulerConfig {
    /// Rows claimed per batch.
    #[must_use]
    pub fn effective_batch_limit(&self) -> usize {
        self.batch_limit
            .unwrap_or_else(|| default_batch_limit(self.worker_count))
    }

    /// Per-request timeout.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Deadline for a whole job: a lookup request plus the target request.
    #[must_use]
    pub const fn job_deadline(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs * 2)
    }

    /// Job slots a full batch needs: one per `worker_count` rows, plus
    /// one spare for claim, credential lookup and outcome writes.
    #[must_use]
    pub fn lease_waves(&self) -> u64 {
        let waves = self.effective_batch_limit().div_ceil(self.worker_count.max(1)) + 1;
        u64::try_from(waves).unwrap_or(u64::MAX)
    }

    /// Lease policy handed to the store's claim.
    ///
    /// The fixed part covers draining a whole batch through the pool, so
    /// the last queued job still starts inside its lease.
    #[must_use]
    pub fn lease_policy(&self) -> LeasePolicy {
        LeasePolicy {
            jitter_min_secs: self.lease_jitter_min_secs,
            jitter_max_secs: self.lease_jitter_max_secs,
            floor_secs: self.job_deadline().as_secs().saturating_mul(self.lease_waves()),
        }
    }

    /// Retry policy for store mutations.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.store_retry_attempts,
            base_delay: Duration::from_millis(self.store_retry_base_ms),
        }
    }

    /// Worker pool sizing; a pool always accepts a full claim batch.
    #[must_use]
    pub fn pool_config(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::new()
            .with_worker_count(self.worker_count)
            .with_max_batch(self.effective_batch_limit())
    }

    /// Validate all values.
    ///
    /// # Errors
    ///
    /// Returns a message naming the offending field.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if self.batch_limit == Some(0) {
            return Err("batch_limit must be greater than 0".into());
        }
        if self.call_timeout_secs == 0 {
            return Err("call_timeout_secs must be greater than 0".into());
        }
        if self.idle_interval_secs == 0 || self.max_idle_sleep_secs == 0 {
            return Err("idle sleeps must be greater than 0".into());
        }
        if self.lease_jitter_max_secs < self.lease_jitter_min_secs {
            return Err("lease_jitter_max_secs must be >= lease_jitter_min_secs".into());
        }
        if self.store_retry_attempts == 0 {
            return Err("store_retry_attempts must be greater than 0".into());
        }
        if self.graph_base_url.is_empty() {
            return Err("graph_base_url must not be empty".into());
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns the parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `CALL_BUDGET_MAX_WORKERS`: worker count (default: 2 × cores, min 2)
    /// - `CALL_BUDGET_BATCH_LIMIT`: rows per claim (default: workers × 20)
    /// - `CALL_BUDGET_CALL_TIMEOUT_SECS`: per-request timeout (default: 10)
    /// - `CALL_BUDGET_GRAPH_BASE_URL`: provider base URL
    /// - `CALL_BUDGET_ENROLL_ON_START`: `true`/`false` (default: true)
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for unparsable or inconsistent values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for unparsable or inconsistent values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(v) = lookup("CALL_BUDGET_MAX_WORKERS") {
            cfg.worker_count = v
                .parse()
                .map_err(|_| ConfigError::Invalid("CALL_BUDGET_MAX_WORKERS", "must be a positive integer"))?;
        }
        if let Some(v) = lookup("CALL_BUDGET_BATCH_LIMIT") {
            cfg.batch_limit = Some(
                v.parse()
                    .map_err(|_| ConfigError::Invalid("CALL_BUDGET_BATCH_LIMIT", "must be a positive integer"))?,
            );
        }
        if let Some(v) = lookup("CALL_BUDGET_CALL_TIMEOUT_SECS") {
            cfg.call_timeout_secs = v.parse().map_err(|_| {
                ConfigError::Invalid("CALL_BUDGET_CALL_TIMEOUT_SECS", "must be a positive integer")
            })?;
        }
        if let Some(v) = lookup("CALL_BUDGET_GRAPH_BASE_URL") {
            cfg.graph_base_url = v;
        }
        if let Some(v) = lookup("CALL_BUDGET_ENROLL_ON_START") {
            cfg.enroll_on_start = v
                .parse()
                .map_err(|_| ConfigError::Invalid("CALL_BUDGET_ENROLL_ON_START", "must be true or false"))?;
        }
        cfg.validate().map_err(ConfigError::Rejected)?;
        Ok(cfg)
    }
}

/// Connection settings for the PostgreSQL-backed store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Pool size.
    pub max_connections: u32,
    /// Row lock wait limit inside claim/outcome transactions, seconds.
    pub lock_timeout_secs: u64,
}

impl StoreConfig {
    /// Config with default pool size and lock timeout.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 10,
            lock_timeout_secs: 3,
        }
    }

    /// Load from environment variables.
    ///
    /// Required:
    /// - `CALL_BUDGET_DATABASE_URL`
    ///
    /// Optional:
    /// - `CALL_BUDGET_DB_MAX_CONNECTIONS` (default: 10)
    /// - `CALL_BUDGET_LOCK_TIMEOUT_SECS` (default: 3)
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for missing or unparsable values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for missing or unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url =
            lookup("CALL_BUDGET_DATABASE_URL").ok_or(ConfigError::Missing("CALL_BUDGET_DATABASE_URL"))?;
        let mut cfg = Self::new(database_url);
        if let Some(v) = lookup("CALL_BUDGET_DB_MAX_CONNECTIONS") {
            cfg.max_connections = v.parse().map_err(|_| {
                ConfigError::Invalid("CALL_BUDGET_DB_MAX_CONNECTIONS", "must be a positive integer")
            })?;
        }
        if let Some(v) = lookup("CALL_BUDGET_LOCK_TIMEOUT_SECS") {
            cfg.lock_timeout_secs = v.parse().map_err(|_| {
                ConfigError::Invalid("CALL_BUDGET_LOCK_TIMEOUT_SECS", "must be a positive integer")
            })?;
        }
        if cfg.max_connections == 0 {
            return Err(ConfigError::Rejected("max_connections must be greater than 0".into()));
        }
        Ok(cfg)
    }
}
