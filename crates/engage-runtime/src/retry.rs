use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

use engage_config::RetryConfig;
use engage_core::{EngageError, Result};

/// Bounded retry with exponential backoff.
///
/// Attempt `n` (0-based) that fails is followed by a sleep of
/// `min(base_delay * 2^n, max_delay)` unless it was the last attempt. Fatal and
/// non-retryable errors are returned immediately.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_secs(config.max_delay_secs),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Sleep after the failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds or attempts run out. Exhaustion is reported as
    /// `EngageError::RetryExhausted`; this never panics.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut last_err = None;

        for attempt in 0..attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    if attempt + 1 < attempts {
                        let delay = e
                            .retry_after_secs()
                            .map(Duration::from_secs)
                            .unwrap_or_else(|| self.delay_for(attempt))
                            .min(self.max_delay);
                        warn!(
                            operation,
                            attempt = attempt + 1,
                            max = attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "retrying after transient error"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_err = Some(e);
                }
            }
        }

        let reason = last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempt made".into());
        error!(operation, attempts, error = %reason, "giving up after retries");
        Err(EngageError::RetryExhausted {
            operation: operation.to_string(),
            attempts,
            reason,
        })
    }
}
