//! Retry-with-jittered-backoff for store mutations.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first one included.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles afterwards.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (0-based):
    /// `base * 2^attempt + random(0..base)`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let jitter = if base_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..base_ms)
        };
        exp + Duration::from_millis(jitter)
    }
}

/// Run `op` until it succeeds, fails with an error `is_retryable` rejects,
/// or the attempts run out. The last error is returned.
pub async fn retry_with_backoff<T, E, F, Fut, C>(
    ctx: &str,
    policy: &RetryPolicy,
    is_retryable: C,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
    E: Display,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt + 1 < policy.max_attempts && is_retryable(&err) => {
                warn!(ctx, attempt = attempt + 1, error = %err, "retrying after transient store error");
                tokio::time::sleep(policy.delay_for(attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
