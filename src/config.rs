//! Configuration for SALPA
//!
//! Breaker and retry settings are per-instance, not process-global: every
//! guarded dependency gets its own [`BreakerConfig`] and every call site its
//! own [`RetryPolicy`](crate::RetryPolicy). [`Config::from_env`] only provides
//! process-wide defaults for the binary.

use crate::error::FailureKind;
use std::collections::HashSet;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Configuration error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("configuration error: {0}")]
pub struct ConfigError(pub String);

/// Settings for one circuit breaker
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Size of the sliding outcome window (>= 1)
    pub sliding_window_size: usize,

    /// Failure rate (%) at or above which a full window opens the breaker
    pub failure_rate_threshold: f32,

    /// Calls at least this slow are classified SLOW
    pub slow_call_duration_threshold: Duration,

    /// Slow call rate (%) at or above which a full window opens the breaker
    pub slow_call_rate_threshold: f32,

    /// How long an open breaker refuses calls before probing
    pub wait_duration_in_open_state: Duration,

    /// Trial calls permitted while half-open (>= 1)
    pub half_open_max_permits: u32,

    /// Failure kinds invisible to the breaker window
    ///
    /// Everything not listed here is recorded - unknown kinds fail toward
    /// visibility.
    pub ignored_kinds: HashSet<FailureKind>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            sliding_window_size: 10,
            failure_rate_threshold: 50.0,
            slow_call_duration_threshold: Duration::from_secs(2),
            slow_call_rate_threshold: 50.0,
            wait_duration_in_open_state: Duration::from_secs(5),
            half_open_max_permits: 3,
            ignored_kinds: HashSet::from([FailureKind::Validation, FailureKind::NotFound]),
        }
    }
}

impl BreakerConfig {
    /// Check invariants on the configured values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sliding_window_size == 0 {
            return Err(ConfigError("sliding_window_size must be >= 1".into()));
        }
        if self.half_open_max_permits == 0 {
            return Err(ConfigError("half_open_max_permits must be >= 1".into()));
        }
        for (name, rate) in [
            ("failure_rate_threshold", self.failure_rate_threshold),
            ("slow_call_rate_threshold", self.slow_call_rate_threshold),
        ] {
            if !(0.0..=100.0).contains(&rate) {
                return Err(ConfigError(format!("{name} must be within 0..=100, got {rate}")));
            }
        }
        Ok(())
    }

    /// True when this failure kind should land in the outcome window
    pub fn records(&self, kind: FailureKind) -> bool {
        !self.ignored_kinds.contains(&kind)
    }
}

/// Settings for one retry policy
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum attempts including the first (>= 1)
    pub max_attempts: u32,

    /// Delay before the second attempt; later delays double
    pub base_delay: Duration,

    /// Upper bound on any single inter-attempt delay
    pub max_delay: Duration,

    /// Failure kinds worth another attempt
    pub retryable_kinds: HashSet<FailureKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            retryable_kinds: HashSet::from([
                FailureKind::Connection,
                FailureKind::Timeout,
                FailureKind::Transport,
                FailureKind::RateLimited,
            ]),
        }
    }
}

impl RetryConfig {
    /// Check invariants on the configured values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError("max_attempts must be >= 1".into()));
        }
        Ok(())
    }

    /// Backoff before the attempt following `attempt` (1-based)
    ///
    /// Deterministic exponential schedule: `base_delay * 2^(attempt-1)`,
    /// capped at `max_delay`. No jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(1u32 << exp);
        delay.min(self.max_delay)
    }
}

/// Process-wide configuration for the demo binary
#[derive(Debug, Clone)]
pub struct Config {
    /// Default breaker settings
    pub breaker: BreakerConfig,

    /// Default retry settings
    pub retry: RetryConfig,

    /// Log level
    pub log_level: String,

    /// Log format (json or pretty)
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            breaker: BreakerConfig::default(),
            retry: RetryConfig::default(),
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(size) = env::var("SALPA_SLIDING_WINDOW_SIZE") {
            config.breaker.sliding_window_size = size
                .parse()
                .map_err(|e| ConfigError(format!("invalid SALPA_SLIDING_WINDOW_SIZE: {e}")))?;
        }

        if let Ok(rate) = env::var("SALPA_FAILURE_RATE_THRESHOLD") {
            config.breaker.failure_rate_threshold = rate
                .parse()
                .map_err(|e| ConfigError(format!("invalid SALPA_FAILURE_RATE_THRESHOLD: {e}")))?;
        }

        if let Ok(ms) = env::var("SALPA_SLOW_CALL_THRESHOLD_MS") {
            config.breaker.slow_call_duration_threshold = Duration::from_millis(
                ms.parse()
                    .map_err(|e| ConfigError(format!("invalid SALPA_SLOW_CALL_THRESHOLD_MS: {e}")))?,
            );
        }

        if let Ok(rate) = env::var("SALPA_SLOW_CALL_RATE_THRESHOLD") {
            config.breaker.slow_call_rate_threshold = rate
                .parse()
                .map_err(|e| ConfigError(format!("invalid SALPA_SLOW_CALL_RATE_THRESHOLD: {e}")))?;
        }

        if let Ok(ms) = env::var("SALPA_WAIT_OPEN_MS") {
            config.breaker.wait_duration_in_open_state = Duration::from_millis(
                ms.parse()
                    .map_err(|e| ConfigError(format!("invalid SALPA_WAIT_OPEN_MS: {e}")))?,
            );
        }

        if let Ok(permits) = env::var("SALPA_HALF_OPEN_PERMITS") {
            config.breaker.half_open_max_permits = permits
                .parse()
                .map_err(|e| ConfigError(format!("invalid SALPA_HALF_OPEN_PERMITS: {e}")))?;
        }

        if let Ok(attempts) = env::var("SALPA_MAX_ATTEMPTS") {
            config.retry.max_attempts = attempts
                .parse()
                .map_err(|e| ConfigError(format!("invalid SALPA_MAX_ATTEMPTS: {e}")))?;
        }

        if let Ok(ms) = env::var("SALPA_RETRY_BASE_DELAY_MS") {
            config.retry.base_delay = Duration::from_millis(
                ms.parse()
                    .map_err(|e| ConfigError(format!("invalid SALPA_RETRY_BASE_DELAY_MS: {e}")))?,
            );
        }

        if let Ok(level) = env::var("SALPA_LOG_LEVEL") {
            config.log_level = level;
        }

        if let Ok(format) = env::var("SALPA_LOG_FORMAT") {
            config.log_format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                other => {
                    return Err(ConfigError(format!(
                        "invalid SALPA_LOG_FORMAT: {other} (expected 'json' or 'pretty')"
                    )))
                }
            };
        }

        config.breaker.validate()?;
        config.retry.validate()?;

        Ok(config)
    }
}
