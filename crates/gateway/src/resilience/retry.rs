//! Exponential backoff with jitter.

use std::time::Duration;

use config::RetryConfig;
use rand::Rng;

/// Computes inter-attempt delays.
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Build a policy from configuration.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay before the retry following the given 1-based attempt.
    ///
    /// `delay(n) = min(cap, base · 2^(n-1)) · (1 ± jitter)`. An upstream
    /// retry-after hint overrides the computed delay, clamped to the cap.
    pub fn delay_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint.min(self.config.max_delay);
        }

        let exponent = attempt.saturating_sub(1).min(16);
        let backoff = self
            .config
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.config.max_delay);

        apply_jitter(backoff, self.config.jitter)
    }
}

fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return delay;
    }

    let factor = 1.0 + rand::rng().random_range(-jitter..=jitter);
    delay.mul_f64(factor.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: f64) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter,
        })
    }

    #[test]
    fn doubles_until_the_cap_without_jitter() {
        let policy = policy(0.0);

        assert_eq!(policy.delay_for(1, None), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2, None), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3, None), Duration::from_secs(4));
        assert_eq!(policy.delay_for(6, None), Duration::from_secs(30));
        assert_eq!(policy.delay_for(30, None), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = policy(0.1);

        for _ in 0..100 {
            let delay = policy.delay_for(2, None);
            assert!(delay >= Duration::from_millis(1_800), "delay too short: {delay:?}");
            assert!(delay <= Duration::from_millis(2_200), "delay too long: {delay:?}");
        }
    }

    #[test]
    fn hint_overrides_and_is_clamped() {
        let policy = policy(0.1);

        assert_eq!(
            policy.delay_for(1, Some(Duration::from_secs(7))),
            Duration::from_secs(7)
        );
        assert_eq!(
            policy.delay_for(1, Some(Duration::from_secs(120))),
            Duration::from_secs(30)
        );
    }
}
