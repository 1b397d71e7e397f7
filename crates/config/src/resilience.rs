//! Retry and circuit breaker configuration.

use std::time::Duration;

use anyhow::anyhow;

use crate::env::EnvSource;

/// Settings for the retry and circuit breaker kernel wrapping upstream calls.
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    /// Retry strategy settings.
    pub retry: RetryConfig,
    /// Circuit breaker settings.
    pub breaker: BreakerConfig,
    /// Overall per-request deadline across all attempts.
    /// `REQUEST_DEADLINE_MS`, default 120 000.
    pub request_deadline: Duration,
    /// Maximum silence between streamed upstream chunks before the stream
    /// is considered dead. `STREAM_IDLE_TIMEOUT_MS`, default 60 000.
    pub stream_idle_timeout: Duration,
}

/// Retry strategy settings.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum attempts per request. `RETRY_MAX_ATTEMPTS`, default 3.
    pub max_attempts: u32,
    /// Base delay before the first retry. `RETRY_BASE_DELAY_MS`, default 1000.
    pub base_delay: Duration,
    /// Upper bound on any single delay. `RETRY_MAX_DELAY_MS`, default 30 000.
    pub max_delay: Duration,
    /// Jitter factor applied to computed delays, in [0, 1].
    pub jitter: f64,
}

/// Circuit breaker settings, applied per upstream operation.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures within the window that trip the breaker.
    /// `BREAKER_FAILURE_THRESHOLD`, default 5.
    pub failure_threshold: u32,
    /// Sliding window over which failures accumulate.
    pub failure_window: Duration,
    /// Cool-down before a half-open probe is admitted.
    /// `BREAKER_COOLDOWN_MS`, default 30 000.
    pub cooldown: Duration,
}

impl ResilienceConfig {
    pub(crate) fn load(env: &EnvSource) -> anyhow::Result<Self> {
        Ok(ResilienceConfig {
            retry: RetryConfig {
                max_attempts: env.parse("RETRY_MAX_ATTEMPTS", 3)?,
                base_delay: env.parse_millis("RETRY_BASE_DELAY_MS", 1_000)?,
                max_delay: env.parse_millis("RETRY_MAX_DELAY_MS", 30_000)?,
                jitter: 0.1,
            },
            breaker: BreakerConfig {
                failure_threshold: env.parse("BREAKER_FAILURE_THRESHOLD", 5)?,
                failure_window: env.parse_millis("BREAKER_FAILURE_WINDOW_MS", 60_000)?,
                cooldown: env.parse_millis("BREAKER_COOLDOWN_MS", 30_000)?,
            },
            request_deadline: env.parse_millis("REQUEST_DEADLINE_MS", 120_000)?,
            stream_idle_timeout: env.parse_millis("STREAM_IDLE_TIMEOUT_MS", 60_000)?,
        })
    }

    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("RETRY_MAX_ATTEMPTS must be at least 1"));
        }

        if self.breaker.failure_threshold == 0 {
            return Err(anyhow!("BREAKER_FAILURE_THRESHOLD must be at least 1"));
        }

        Ok(())
    }
}
