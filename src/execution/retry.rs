//! Bounded exponential backoff for external calls

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// Errors that know whether another attempt could succeed
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Backoff policy applied around a single external call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Ceiling of the first delay
    pub initial_delay: Duration,

    /// Largest ceiling any single delay may reach
    pub max_delay: Duration,

    /// Total time budget, measured from the first attempt
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(8),
            Duration::from_secs(128),
            Duration::from_secs(128),
        )
    }
}

impl RetryPolicy {
    pub fn new(initial_delay: Duration, max_delay: Duration, max_elapsed: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_elapsed,
        }
    }

    /// Upper bound of the delay before retry number `retry` (1-based)
    pub fn backoff_ceiling(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Jittered delay: half the ceiling plus a random share of the other half
    pub fn delay_for(&self, retry: u32) -> Duration {
        let half = self.backoff_ceiling(retry) / 2;
        let half_ms = u64::try_from(half.as_millis()).unwrap_or(u64::MAX);
        let extra_ms = rand::thread_rng().gen_range(0..=half_ms);
        half + Duration::from_millis(extra_ms)
    }

    /// Run `call` until it succeeds, fails non-retryably or the budget runs out
    ///
    /// `on_retry` is invoked with the retry number before each sleep.
    pub async fn retry<T, E, F, Fut>(
        &self,
        operation: &str,
        mut on_retry: impl FnMut(u32),
        mut call: F,
    ) -> Result<T, E>
    where
        E: Retryable + Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let mut retries = 0u32;

        loop {
            let err = match call().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() {
                return Err(err);
            }

            let elapsed = started.elapsed();
            if elapsed >= self.max_elapsed {
                warn!(
                    operation,
                    retries,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %err,
                    "Retry budget exhausted"
                );
                return Err(err);
            }

            retries += 1;
            let delay = self.delay_for(retries).min(self.max_elapsed - elapsed);
            warn!(
                operation,
                attempt = retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retryable error, will retry"
            );
            on_retry(retries);
            tokio::time::sleep(delay).await;
        }
    }
}
