//! Bounded retry for screening service calls.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::CallError;

/// Fixed-delay retry policy for a fallible call.
///
/// `max_attempts` counts *total* attempts, not retries: the default of 3
/// means one initial call plus at most two retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Run `operation`, retrying transient failures with a fixed delay.
    ///
    /// Returns the first success immediately. Permanent failures (see
    /// [`CallError::is_transient`]) abort without using the remaining
    /// attempts. When every attempt fails, the last error is wrapped in
    /// [`CallError::RetriesExhausted`] so exhaustion stays distinguishable
    /// from a single failure.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CallError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_err = CallError::Transport("no attempt executed".to_string());

        for attempt in 1..=attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_transient() => {
                    debug!(attempt, error = %err, "permanent failure, not retrying");
                    return Err(err);
                }
                Err(err) => {
                    debug!(attempt, error = %err, "transient failure");
                    last_err = err;
                    if attempt < attempts {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }

        Err(CallError::retries_exhausted(attempts, last_err))
    }
}
