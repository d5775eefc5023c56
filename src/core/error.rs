//! Error types for scheduler operations.

use thiserror::Error;

/// Errors produced by scheduler components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The budget store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// The worker pool rejected or lost work.
    #[error("pool error: {0}")]
    Pool(#[from] crate::core::worker_pool::PoolError),
    /// Configuration was rejected.
    #[error("config invalid: {0}")]
    Config(String),
    /// Backend-specific failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Errors raised by budget stores, call log sinks and credential registries.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A row lock could not be taken within the configured lock timeout.
    #[error("lock wait timeout: {0}")]
    LockTimeout(String),
    /// The database aborted the transaction to break a deadlock or
    /// serialization conflict.
    #[error("transaction conflict: {0}")]
    Conflict(String),
    /// No pooled connection became available in time.
    #[error("connection unavailable: {0}")]
    Unavailable(String),
    /// Stored data could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),
    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether retrying the same mutation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout(_) | Self::Conflict(_) | Self::Unavailable(_)
        )
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => Self::Unavailable(err.to_string()),
            sqlx::Error::Database(db) => match db.code().as_deref() {
                // lock_not_available
                Some("55P03") => Self::LockTimeout(err.to_string()),
                // deadlock_detected, serialization_failure
                Some("40P01" | "40001") => Self::Conflict(err.to_string()),
                _ => Self::Backend(err.to_string()),
            },
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Corrupt(err.to_string())
            }
            sqlx::Error::Io(_) => Self::Unavailable(err.to_string()),
            _ => Self::Backend(err.to_string()),
        }
    }
}

/// Errors raised by a [`CallInvoker`](crate::core::CallInvoker) before any
/// HTTP response was obtained.
#[derive(Debug, Clone, Error)]
pub enum InvokeError {
    /// The call did not complete within its deadline.
    #[error("call timed out after {0}s")]
    Timeout(u64),
    /// Connection, DNS or protocol failure.
    #[error("network error: {0}")]
    Network(String),
    /// The HTTP client could not be constructed.
    #[error("http client setup failed: {0}")]
    Client(String),
}

/// Failure classes a single scheduled call can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallFailureKind {
    /// The resource has no usable credential.
    CredentialMissing,
    /// The catalog cannot turn the api type into a call.
    UnsupportedOperation,
    /// Transport failure or deadline exceeded.
    NetworkOrTimeout,
    /// The provider signaled quota exhaustion.
    RateLimited,
    /// Any other non-2xx response.
    ProviderError,
}

impl CallFailureKind {
    /// Stable label used in logs and call log endpoint markers.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::CredentialMissing => "credential-missing",
            Self::UnsupportedOperation => "unsupported",
            Self::NetworkOrTimeout => "http-exception",
            Self::RateLimited => "rate-limited",
            Self::ProviderError => "provider-error",
        }
    }
}

impl std::fmt::Display for CallFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
