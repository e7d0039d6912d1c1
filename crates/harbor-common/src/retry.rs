//! Retry and timeout helpers for calls to remote collaborators.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::HarborError;

/// Backoff policy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (1 = no retries).
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Add up to 25% jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay to wait before the given attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let base =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi((attempt - 2) as i32);
        let delay = Duration::from_secs_f64(base.min(self.max_delay.as_secs_f64()));

        if self.jitter {
            delay + Duration::from_secs_f64(delay.as_secs_f64() * jitter_fraction() * 0.25)
        } else {
            delay
        }
    }
}

/// Pseudo-random value in `0.0..=1.0` from the clock's sub-second nanos.
fn jitter_fraction() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos) / f64::from(u32::MAX)
}

/// Retry an async operation with exponential backoff.
///
/// Errors for which `HarborError::is_retryable` is false stop the loop
/// immediately.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, HarborError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HarborError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retries");
                }
                return Ok(value);
            }
            Err(e) if attempt < max_attempts && e.is_retryable() => {
                warn!(attempt, max_attempts, category = e.category(), error = %e, "Operation failed, retrying");
                attempt += 1;
                sleep(config.delay_for_attempt(attempt)).await;
            }
            Err(e) => {
                warn!(attempt, max_attempts, category = e.category(), error = %e, "Operation failed");
                return Err(e);
            }
        }
    }
}

/// Run a future with a deadline.
pub async fn with_timeout<T, Fut>(timeout: Duration, future: Fut) -> Result<T, HarborError>
where
    Fut: Future<Output = T>,
{
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| HarborError::Timeout(timeout))
}
