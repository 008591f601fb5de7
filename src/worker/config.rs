//! Consumer runner tuning.
//!
//! # Polling Strategy
//!
//! - **Claim**: up to `batch_size` tasks, blocking at most `block_timeout`
//! - **Idle sleep**: `poll_interval` after an empty claim, plus 0-20% jitter
//!   derived from the stream name so runners for different streams drift apart
//! - **Redelivery**: a failed task comes back after `retry.delay_for_attempt(n)`
//!   where `n` counts its earlier failures; after `max_attempts` deliveries it
//!   is dead-lettered
//! - **Claim errors**: the poll loop backs off with the same schedule
//! - **Lease renewal**: while a handler runs, its claim is renewed every third
//!   of the claim lease

use std::hash::{Hash, Hasher};
use std::time::Duration;

use crate::config::{ConfigError, Result, Vars};
use crate::queue::Stream;
use crate::queue::spool::DEFAULT_CLAIM_LEASE;
use crate::retry::RetryConfig;

const DEFAULT_BATCH_SIZE: usize = 1;
const DEFAULT_BLOCK_TIMEOUT_SECS: u64 = 5;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_JITTER_PERCENT: u8 = 20;

/// Upper bound for `OVERHAVE_RETRY_MAX_SECS`.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(24 * 60 * 60);
const MIN_LEASE_RENEWAL: Duration = Duration::from_millis(10);

/// Configuration for one [`ConsumerRunner`](super::ConsumerRunner).
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    /// Maximum tasks per claim. `OVERHAVE_BATCH_SIZE`, default 1.
    pub batch_size: usize,

    /// Longest a claim may block. `OVERHAVE_BLOCK_TIMEOUT_SECS`, default 5s.
    pub block_timeout: Duration,

    /// Sleep after an empty claim. `OVERHAVE_POLL_INTERVAL_MS`, default 1s.
    pub poll_interval: Duration,

    /// Deliveries before a retriable failure is dead-lettered.
    /// `OVERHAVE_MAX_ATTEMPTS`, default 3.
    pub max_attempts: u32,

    /// Redelivery and claim-error backoff. `OVERHAVE_RETRY_BASE_MS` (default
    /// 1000) and `OVERHAVE_RETRY_MAX_SECS` (default 60).
    pub retry: RetryConfig,

    /// Upper bound of the idle-sleep jitter, in percent.
    /// `OVERHAVE_JITTER_PERCENT`, default 20.
    pub jitter_percent: u8,

    /// How often a running task's claim is renewed. A third of the claim
    /// lease; see [`RunnerConfig::with_claim_lease`].
    pub lease_renewal: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RunnerConfig {
    pub fn new() -> Self {
        RunnerConfig {
            batch_size: DEFAULT_BATCH_SIZE,
            block_timeout: Duration::from_secs(DEFAULT_BLOCK_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry: RetryConfig::REDELIVERY,
            jitter_percent: DEFAULT_JITTER_PERCENT,
            lease_renewal: DEFAULT_CLAIM_LEASE / 3,
        }
    }

    /// Renews claims often enough that a lease of `lease` never runs out
    /// under a live handler.
    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.lease_renewal = (lease / 3).max(MIN_LEASE_RENEWAL);
        self
    }

    /// Reads the runner variables from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(&Vars::new(|var: &str| std::env::var(var).ok()))
    }

    pub(crate) fn from_vars(vars: &Vars<impl Fn(&str) -> Option<String>>) -> Result<Self> {
        let defaults = Self::new();
        let config = RunnerConfig {
            batch_size: vars.parse_or("OVERHAVE_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            block_timeout: vars.secs_or("OVERHAVE_BLOCK_TIMEOUT_SECS", DEFAULT_BLOCK_TIMEOUT_SECS)?,
            poll_interval: vars.millis_or("OVERHAVE_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?,
            max_attempts: vars.parse_or("OVERHAVE_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?,
            retry: RetryConfig {
                initial_delay: vars.millis_or(
                    "OVERHAVE_RETRY_BASE_MS",
                    defaults.retry.initial_delay.as_millis() as u64,
                )?,
                max_delay: vars.secs_or(
                    "OVERHAVE_RETRY_MAX_SECS",
                    defaults.retry.max_delay.as_secs(),
                )?,
                ..defaults.retry
            },
            jitter_percent: vars.parse_or("OVERHAVE_JITTER_PERCENT", DEFAULT_JITTER_PERCENT)?,
            lease_renewal: defaults.lease_renewal,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let invalid = |var: &'static str, value: String, reason: &str| ConfigError::Invalid {
            var,
            value,
            reason: reason.into(),
        };
        if self.batch_size == 0 {
            return Err(invalid("OVERHAVE_BATCH_SIZE", "0".into(), "must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(invalid("OVERHAVE_MAX_ATTEMPTS", "0".into(), "must be at least 1"));
        }
        if self.retry.max_delay > MAX_RETRY_DELAY {
            return Err(invalid(
                "OVERHAVE_RETRY_MAX_SECS",
                self.retry.max_delay.as_secs().to_string(),
                "must be at most 86400",
            ));
        }
        if self.retry.initial_delay > self.retry.max_delay {
            return Err(invalid(
                "OVERHAVE_RETRY_BASE_MS",
                self.retry.initial_delay.as_millis().to_string(),
                "must not exceed OVERHAVE_RETRY_MAX_SECS",
            ));
        }
        if self.jitter_percent > 100 {
            return Err(invalid(
                "OVERHAVE_JITTER_PERCENT",
                self.jitter_percent.to_string(),
                "must be at most 100",
            ));
        }
        Ok(())
    }

    /// The idle sleep for `stream`, with its deterministic jitter applied.
    ///
    /// `poll_interval * (1 + (hash(stream name) % jitter_percent) / 100)`
    pub fn poll_interval_with_jitter(&self, stream: &Stream) -> Duration {
        self.poll_interval.mul_f64(self.jitter_factor(stream))
    }

    /// Delay before the task's next delivery, given its earlier failures.
    pub fn redelivery_delay(&self, previous_failures: u32) -> Duration {
        self.retry.delay_for_attempt(previous_failures)
    }

    /// Poll loop pause after `consecutive_errors` failed claims (at least one).
    pub fn claim_error_backoff(&self, consecutive_errors: u32) -> Duration {
        self.retry.delay_for_attempt(consecutive_errors.saturating_sub(1))
    }

    fn jitter_factor(&self, stream: &Stream) -> f64 {
        if self.jitter_percent == 0 {
            return 1.0;
        }
        let mut hasher = std::hash::DefaultHasher::new();
        stream.name.hash(&mut hasher);
        let jitter = (hasher.finish() % self.jitter_percent as u64) as f64 / 100.0;
        1.0 + jitter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::StreamKind;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<RunnerConfig> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RunnerConfig::from_vars(&Vars::new(move |var: &str| env.get(var).cloned()))
    }

    #[test]
    fn default_config_has_expected_values() {
        let config = RunnerConfig::new();
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.block_timeout, Duration::from_secs(5));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.retry.initial_delay, Duration::from_secs(1));
        assert_eq!(config.retry.max_delay, Duration::from_secs(60));
        assert_eq!(config.jitter_percent, 20);
        assert_eq!(config.lease_renewal, Duration::from_secs(200));
        assert_eq!(from_pairs(&[]).unwrap(), config);
    }

    #[test]
    fn reads_overrides() {
        let config = from_pairs(&[
            ("OVERHAVE_BATCH_SIZE", "10"),
            ("OVERHAVE_MAX_ATTEMPTS", "5"),
            ("OVERHAVE_POLL_INTERVAL_MS", "250"),
            ("OVERHAVE_RETRY_BASE_MS", "500"),
            ("OVERHAVE_RETRY_MAX_SECS", "30"),
        ])
        .unwrap();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.retry.initial_delay, Duration::from_millis(500));
        assert_eq!(config.retry.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn rejects_zero_attempts_and_bad_numbers() {
        assert!(from_pairs(&[("OVERHAVE_MAX_ATTEMPTS", "0")]).is_err());
        assert!(from_pairs(&[("OVERHAVE_BATCH_SIZE", "0")]).is_err());
        assert!(from_pairs(&[("OVERHAVE_JITTER_PERCENT", "150")]).is_err());
        assert!(matches!(
            from_pairs(&[("OVERHAVE_BLOCK_TIMEOUT_SECS", "soon")]),
            Err(ConfigError::Invalid {
                var: "OVERHAVE_BLOCK_TIMEOUT_SECS",
                ..
            })
        ));
    }

    #[test]
    fn rejects_retry_cap_beyond_a_day() {
        let err = from_pairs(&[("OVERHAVE_RETRY_MAX_SECS", "18446744073709551615")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                var: "OVERHAVE_RETRY_MAX_SECS",
                ..
            }
        ));
        assert!(from_pairs(&[("OVERHAVE_RETRY_MAX_SECS", "86400")]).is_ok());
        assert!(from_pairs(&[("OVERHAVE_RETRY_BASE_MS", "120000"), ("OVERHAVE_RETRY_MAX_SECS", "60")]).is_err());
    }

    #[test]
    fn lease_renewal_follows_the_claim_lease() {
        let config = RunnerConfig::new().with_claim_lease(Duration::from_secs(30));
        assert_eq!(config.lease_renewal, Duration::from_secs(10));
        let tiny = RunnerConfig::new().with_claim_lease(Duration::ZERO);
        assert_eq!(tiny.lease_renewal, MIN_LEASE_RENEWAL);
    }

    #[test]
    fn jitter_is_deterministic_and_bounded() {
        let config = RunnerConfig::new();
        for kind in [StreamKind::Test, StreamKind::Emulation, StreamKind::Publication] {
            let stream = Stream::for_kind(kind);
            let a = config.poll_interval_with_jitter(&stream);
            let b = config.poll_interval_with_jitter(&stream);
            assert_eq!(a, b);
            assert!(a >= config.poll_interval);
            assert!(a <= config.poll_interval.mul_f64(1.2));
        }
    }

    #[test]
    fn zero_jitter_returns_exact_interval() {
        let config = RunnerConfig {
            jitter_percent: 0,
            ..RunnerConfig::new()
        };
        let stream = Stream::for_kind(StreamKind::Test);
        assert_eq!(config.poll_interval_with_jitter(&stream), config.poll_interval);
    }

    #[test]
    fn backoff_schedules() {
        let config = RunnerConfig::new();
        assert_eq!(config.redelivery_delay(0), Duration::from_secs(1));
        assert_eq!(config.redelivery_delay(2), Duration::from_secs(4));
        assert_eq!(config.claim_error_backoff(1), Duration::from_secs(1));
        assert_eq!(config.claim_error_backoff(3), Duration::from_secs(4));
        assert_eq!(config.claim_error_backoff(20), Duration::from_secs(60));
    }
}
