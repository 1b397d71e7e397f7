//! Circuit breaker, one per upstream operation.

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use config::BreakerConfig;
use dashmap::DashMap;

use crate::error::{GatewayError, Result};

/// Breaker state as exposed in snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Traffic flows; failures accumulate.
    Closed,
    /// All traffic short-circuits until the cool-down elapses.
    Open,
    /// A single probe is admitted.
    HalfOpen,
}

impl BreakerState {
    /// Snapshot label.
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// Point-in-time view of one breaker for health reporting.
#[derive(Debug, Clone)]
pub struct BreakerSnapshot {
    /// Current state.
    pub state: BreakerState,
    /// Times the breaker has tripped to open.
    pub trip_count: u64,
    /// Successes recorded while closed or probing.
    pub success_count: u64,
    /// Failures recorded.
    pub failure_count: u64,
    /// Time since the most recent failure.
    pub last_failure_age: Option<Duration>,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    window_failures: u32,
    window_start: Option<Instant>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    trip_count: u64,
    success_count: u64,
    failure_count: u64,
    last_failure: Option<Instant>,
}

/// Circuit breaker guarding a single upstream operation.
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                window_failures: 0,
                window_start: None,
                opened_at: None,
                probe_in_flight: false,
                trip_count: 0,
                success_count: 0,
                failure_count: 0,
                last_failure: None,
            }),
        }
    }

    /// Ask for permission before an attempt.
    ///
    /// Returns `CircuitOpen` while the breaker is open or a probe is
    /// already in flight. After the cool-down, exactly one caller is
    /// admitted as the half-open probe.
    pub fn try_acquire(&self) -> Result<()> {
        let mut inner = self.lock();
        let now = Instant::now();

        match inner.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let cooled_down = inner
                    .opened_at
                    .is_some_and(|opened| now.duration_since(opened) >= self.config.cooldown);

                if cooled_down {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    log::debug!("circuit half-open, admitting probe");
                    Ok(())
                } else {
                    Err(GatewayError::CircuitOpen)
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(GatewayError::CircuitOpen)
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Release an admitted probe that never ran.
    pub fn release_probe(&self) {
        let mut inner = self.lock();

        if inner.state == BreakerState::HalfOpen {
            inner.probe_in_flight = false;
        }
    }

    /// Record a successful attempt.
    pub fn record_success(&self) {
        let mut inner = self.lock();

        inner.success_count += 1;

        match inner.state {
            BreakerState::HalfOpen => {
                log::info!("circuit closing after successful probe");
                inner.state = BreakerState::Closed;
                inner.probe_in_flight = false;
                inner.window_failures = 0;
                inner.window_start = None;
                inner.opened_at = None;
            }
            BreakerState::Closed => {
                inner.window_failures = 0;
                inner.window_start = None;
            }
            BreakerState::Open => {}
        }
    }

    /// Record a failed attempt.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        let now = Instant::now();

        inner.failure_count += 1;
        inner.last_failure = Some(now);

        match inner.state {
            BreakerState::HalfOpen => {
                log::warn!("probe failed, circuit re-opening");
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
                inner.probe_in_flight = false;
                inner.trip_count += 1;
            }
            BreakerState::Closed => {
                let window_expired = inner
                    .window_start
                    .is_some_and(|start| now.duration_since(start) > self.config.failure_window);

                if inner.window_start.is_none() || window_expired {
                    inner.window_start = Some(now);
                    inner.window_failures = 0;
                }

                inner.window_failures += 1;

                if inner.window_failures >= self.config.failure_threshold {
                    log::warn!(
                        "circuit opening after {} failures within the window",
                        inner.window_failures
                    );
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(now);
                    inner.trip_count += 1;
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Point-in-time view for health reporting.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();

        BreakerSnapshot {
            state: inner.state,
            trip_count: inner.trip_count,
            success_count: inner.success_count,
            failure_count: inner.failure_count,
            last_failure_age: inner.last_failure.map(|at| at.elapsed()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Per-operation breaker registry.
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    /// Build an empty registry.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// The breaker for an operation, created on first use.
    pub fn breaker(&self, operation: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(operation.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config.clone())))
            .clone()
    }

    /// Snapshots of every known breaker.
    pub fn snapshots(&self) -> Vec<(String, BreakerSnapshot)> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect()
    }
}
