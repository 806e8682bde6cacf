//! Retry with backoff, and deadlines.

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::HavenError;

/// How often, and how patiently, to retry.
///
/// Delays double after every failure, starting at `base_delay` and capped
/// at `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first (1 = no retries).
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Stretch each delay by up to a quarter.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// A single attempt.
    pub fn none() -> Self {
        Self::attempts(1)
    }

    /// `max_attempts` attempts (at least one) with the default backoff.
    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay after the `failures`-th failed attempt.
    pub fn backoff(&self, failures: u32) -> Duration {
        let doublings = failures.saturating_sub(1).min(31);
        let delay = self
            .base_delay
            .saturating_mul(1u32 << doublings)
            .min(self.max_delay);

        if self.jitter {
            delay + delay.mul_f64(jitter_fraction() / 4.0)
        } else {
            delay
        }
    }
}

/// Cheap value in `[0, 1)` from the clock's sub-second part.
fn jitter_fraction() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos) / 1_000_000_000.0
}

/// Run `operation` until it succeeds or the attempt budget is spent.
///
/// At least one attempt is always made. The error of the final attempt is
/// returned.
pub async fn retry_with_backoff<T, E, F, Fut>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let budget = config.max_attempts.max(1);
    let mut failures = 0;

    loop {
        let error = match operation().await {
            Ok(value) => {
                if failures > 0 {
                    debug!(failures, "Succeeded after retrying");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        failures += 1;
        if failures >= budget {
            debug!(attempts = failures, error = %error, "Retry budget spent");
            return Err(error);
        }

        let delay = config.backoff(failures);
        warn!(attempt = failures, budget, ?delay, error = %error, "Attempt failed, retrying");
        sleep(delay).await;
    }
}

/// Fail with [`HavenError::Timeout`] if `operation` outlives `timeout`.
pub async fn with_timeout<T, F, Fut>(timeout: Duration, operation: F) -> Result<T, HavenError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    tokio::time::timeout(timeout, operation())
        .await
        .map_err(|_| HavenError::Timeout(timeout))
}
