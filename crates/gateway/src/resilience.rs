//! Resilient execution of upstream calls.
//!
//! Composes the circuit breaker and the retry strategy around the
//! dispatcher: the breaker is consulted before every attempt, a retry
//! never bypasses an open breaker, and the whole composition runs under
//! one per-request deadline. When both give up, the degradation path
//! renders a dialect-correct reply.

pub mod breaker;
pub mod degrade;
pub mod retry;

use std::time::Instant;

use config::ResilienceConfig;

use crate::error::{GatewayError, Result};

use breaker::BreakerRegistry;
use retry::RetryPolicy;

/// Outcome of a resilient execution, carrying attempt accounting for the
/// audit record alongside the result.
pub struct Execution<T> {
    /// The final result after all attempts.
    pub result: Result<T>,
    /// Attempts actually made (1 for a first-try success).
    pub attempts: u32,
    /// Whether the breaker short-circuited any attempt.
    pub breaker_rejected: bool,
}

impl<T> Execution<T> {
    /// Retries performed beyond the first attempt.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Breaker registry plus retry policy under a shared deadline.
pub struct ResilienceKernel {
    policy: RetryPolicy,
    breakers: BreakerRegistry,
    config: ResilienceConfig,
}

impl ResilienceKernel {
    /// Build the kernel from configuration.
    pub fn new(config: ResilienceConfig) -> Self {
        Self {
            policy: RetryPolicy::new(config.retry.clone()),
            breakers: BreakerRegistry::new(config.breaker.clone()),
            config,
        }
    }

    /// Breaker state snapshots for health reporting.
    pub fn breaker_snapshots(&self) -> Vec<(String, breaker::BreakerSnapshot)> {
        self.breakers.snapshots()
    }

    /// Total breaker trips across all operations.
    pub fn total_trips(&self) -> u64 {
        self.breakers
            .snapshots()
            .into_iter()
            .map(|(_, snapshot)| snapshot.trip_count)
            .sum()
    }

    /// Run `attempt_fn` under retry, breaker and deadline control.
    ///
    /// The attempt function receives the 1-based attempt number.
    pub async fn execute<T, F, Fut>(&self, operation: &str, attempt_fn: F) -> Execution<T>
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let breaker = self.breakers.breaker(operation);
        let started = Instant::now();
        let max_attempts = self.config.retry.max_attempts.max(1);

        let mut attempts = 0;
        let mut breaker_rejected = false;

        loop {
            if let Err(error) = breaker.try_acquire() {
                breaker_rejected = true;
                return Execution {
                    result: Err(error),
                    attempts,
                    breaker_rejected,
                };
            }

            attempts += 1;

            let remaining = match self.config.request_deadline.checked_sub(started.elapsed()) {
                Some(remaining) if !remaining.is_zero() => remaining,
                _ => {
                    breaker.release_probe();
                    return Execution {
                        result: Err(GatewayError::UpstreamTimeout),
                        attempts,
                        breaker_rejected,
                    };
                }
            };

            let error = match tokio::time::timeout(remaining, attempt_fn(attempts)).await {
                Ok(Ok(value)) => {
                    breaker.record_success();
                    return Execution {
                        result: Ok(value),
                        attempts,
                        breaker_rejected,
                    };
                }
                Ok(Err(error)) => {
                    breaker.record_failure();
                    error
                }
                Err(_) => {
                    breaker.record_failure();
                    GatewayError::UpstreamTimeout
                }
            };

            if !error.is_retryable() || attempts >= max_attempts {
                return Execution {
                    result: Err(error),
                    attempts,
                    breaker_rejected,
                };
            }

            let delay = self.policy.delay_for(attempts, error.retry_after());

            if started.elapsed() + delay >= self.config.request_deadline {
                log::debug!(
                    "giving up after {attempts} attempts, next delay {delay:?} would exceed the request deadline"
                );
                return Execution {
                    result: Err(error),
                    attempts,
                    breaker_rejected,
                };
            }

            log::debug!(
                "attempt {attempts} failed ({class}), retrying in {delay:?}",
                class = error.class()
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicU32, Ordering},
        time::Duration,
    };

    use config::{BreakerConfig, RetryConfig};

    use super::*;

    fn kernel(max_attempts: u32, failure_threshold: u32) -> ResilienceKernel {
        ResilienceKernel::new(ResilienceConfig {
            retry: RetryConfig {
                max_attempts,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(10),
                jitter: 0.0,
            },
            breaker: BreakerConfig {
                failure_threshold,
                failure_window: Duration::from_secs(60),
                cooldown: Duration::from_millis(30),
            },
            request_deadline: Duration::from_secs(5),
            stream_idle_timeout: Duration::from_secs(60),
        })
    }

    fn server_error() -> GatewayError {
        GatewayError::UpstreamServer {
            status: 503,
            message: "overloaded".into(),
        }
    }

    #[tokio::test]
    async fn fails_twice_then_succeeds_within_attempt_budget() {
        let kernel = kernel(3, 100);
        let calls = AtomicU32::new(0);

        let execution = kernel
            .execute("respond", |_| {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call < 2 { Err(server_error()) } else { Ok("answer") }
                }
            })
            .await;

        assert_eq!(execution.attempts, 3);
        assert_eq!(execution.retries(), 2);
        assert!(!execution.breaker_rejected);
        assert_eq!(execution.result.unwrap(), "answer");
    }

    #[tokio::test]
    async fn never_exceeds_max_attempts() {
        let kernel = kernel(3, 100);
        let calls = AtomicU32::new(0);

        let execution = kernel
            .execute("respond", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(server_error()) }
            })
            .await;

        assert!(execution.result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_fast() {
        let kernel = kernel(3, 100);
        let calls = AtomicU32::new(0);

        let execution = kernel
            .execute("respond", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(GatewayError::Validation("bad".into())) }
            })
            .await;

        assert!(execution.result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn open_breaker_short_circuits_without_calling_upstream() {
        let kernel = kernel(1, 2);
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            let _ = kernel
                .execute("respond", |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(server_error()) }
                })
                .await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let execution = kernel
            .execute("respond", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok("should not run") }
            })
            .await;

        assert!(matches!(execution.result, Err(GatewayError::CircuitOpen)));
        assert!(execution.breaker_rejected);
        assert_eq!(execution.attempts, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 2, "no upstream call while open");
    }

    #[tokio::test]
    async fn half_open_probe_recovers_after_cooldown() {
        let kernel = kernel(1, 1);

        let _ = kernel
            .execute("respond", |_| async { Err::<(), _>(server_error()) })
            .await;

        let execution = kernel.execute("respond", |_| async { Ok("early") }).await;
        assert!(matches!(execution.result, Err(GatewayError::CircuitOpen)));

        tokio::time::sleep(Duration::from_millis(40)).await;

        let execution = kernel.execute("respond", |_| async { Ok("probe") }).await;
        assert_eq!(execution.result.unwrap(), "probe");

        let execution = kernel.execute("respond", |_| async { Ok("closed again") }).await;
        assert_eq!(execution.result.unwrap(), "closed again");
    }

    #[tokio::test]
    async fn retry_after_hint_is_honored() {
        let kernel = kernel(2, 100);
        let calls = AtomicU32::new(0);

        let started = Instant::now();
        let execution = kernel
            .execute("respond", |_| {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call == 0 {
                        Err(GatewayError::RateLimit {
                            message: "slow down".into(),
                            retry_after: Some(Duration::from_millis(5)),
                        })
                    } else {
                        Ok("answer")
                    }
                }
            })
            .await;

        assert_eq!(execution.result.unwrap(), "answer");
        assert!(started.elapsed() >= Duration::from_millis(5));
    }
}
