//! Retry policy applied at every batch boundary

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::Result;

/// Bounded retries with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            crate::config::DEFAULT_MAX_ATTEMPTS,
            Duration::from_millis(crate::config::DEFAULT_BACKOFF_MS),
            Duration::from_millis(crate::config::DEFAULT_MAX_BACKOFF_MS),
        )
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
        }
    }

    /// A policy that runs every operation exactly once
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before attempt `attempt + 1`, doubling from the initial backoff
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out
    ///
    /// Only errors reporting [`is_transient`](crate::MigrationError::is_transient)
    /// are retried; the last error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, unit: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    let delay = self.backoff_for(attempt);
                    warn!(
                        unit,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Batch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                Err(err) => return Err(err),
            }
        }
    }
}
