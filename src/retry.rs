//! Exponential backoff.
//!
//! Two users share the same delay arithmetic:
//!
//! - The consumer runner, which delays redelivery of a failed task by
//!   `delay_for_attempt(attempt_count)`.
//! - Remote clients, which retry idempotent reads with [`retry_with_backoff`].
//!
//! Only errors reporting themselves as transient are retried in-call. Review
//! creation is not idempotent and is never wrapped in this helper.

use std::future::Future;
use std::time::Duration;

/// Errors that know whether retrying the same call can succeed.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Configuration for exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retries (not including the initial attempt).
    pub max_retries: u32,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Cap for exponential growth.
    pub max_delay: Duration,

    /// Multiplier applied per attempt (typically 2.0).
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// 3 retries with 2s, 4s, 8s delays.
    pub const DEFAULT: Self = Self {
        max_retries: 3,
        initial_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(16),
        backoff_multiplier: 2.0,
    };

    /// Idempotent HTTP reads: 2 retries, 250ms base, 2s cap.
    pub const HTTP_READ: Self = Self {
        max_retries: 2,
        initial_delay: Duration::from_millis(250),
        max_delay: Duration::from_secs(2),
        backoff_multiplier: 2.0,
    };

    /// Task redelivery: 1s base, 60s cap.
    pub const REDELIVERY: Self = Self {
        max_retries: 10,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(60),
        backoff_multiplier: 2.0,
    };

    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Computes the delay for the given retry attempt (0-indexed).
    ///
    /// `initial_delay * backoff_multiplier^attempt`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        let capped_secs = delay_secs.min(self.max_delay.as_secs_f64());
        // Float rounding can push a cap near Duration::MAX out of range.
        Duration::try_from_secs_f64(capped_secs)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Returns an iterator over all retry delays.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries).map(|attempt| self.delay_for_attempt(attempt))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Runs `operation`, retrying transient errors with exponential backoff.
///
/// Non-transient errors are returned immediately. After `max_retries` retries
/// the last transient error is returned.
pub async fn retry_with_backoff<T, E, F, Fut>(config: RetryConfig, mut operation: F) -> Result<T, E>
where
    E: Transient,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    let max_attempts = config.max_retries + 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if !e.is_transient() || attempt >= max_attempts {
                    return Err(e);
                }
                tokio::time::sleep(config.delay_for_attempt(attempt - 1)).await;
            }
        }
    }
}
