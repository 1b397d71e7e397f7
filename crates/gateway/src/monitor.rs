//! Request monitoring and security auditing.
//!
//! Bounded ring buffers of per-request summaries and security events,
//! aggregated on demand for the health and metrics endpoints and flushed
//! to the log by a periodic reporter. Writers append under a short lock;
//! readers work on snapshot copies.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant, SystemTime},
};

use serde::Serialize;

use crate::{detect::Dialect, messages::unified::ReasoningEffort};

const REQUEST_BUFFER_CAP: usize = 1000;
const SECURITY_BUFFER_CAP: usize = 500;

/// One completed request, as recorded in the audit buffer.
#[derive(Debug, Clone)]
pub struct RequestMetric {
    /// Correlation id of the request.
    pub correlation_id: String,
    /// Dialect the client spoke.
    pub dialect: Dialect,
    /// Client-requested model.
    pub model: String,
    /// Reasoning effort chosen for the request.
    pub effort: ReasoningEffort,
    /// Input tokens reported by the upstream.
    pub input_tokens: u64,
    /// Output tokens reported by the upstream.
    pub output_tokens: u64,
    /// Reasoning tokens reported by the upstream.
    pub reasoning_tokens: u64,
    /// Wall-clock time spent serving the request.
    pub response_time: Duration,
    /// Whether the request succeeded.
    pub success: bool,
    /// Error classification when it failed.
    pub error_class: Option<&'static str>,
    /// Retries performed beyond the first attempt.
    pub retry_count: u32,
    /// Whether the circuit breaker short-circuited any attempt.
    pub breaker_used: bool,
    /// Whether a degraded fallback answered the request.
    pub fallback_used: bool,
}

/// Kind of security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    /// Failed or suspicious authentication.
    Authentication,
    /// Rate limiting fired.
    RateLimit,
    /// Validation rejected a request.
    Validation,
    /// Injection pattern or other suspicious content.
    SuspiciousActivity,
}

/// A recorded security event. Details never contain sensitive values.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityEvent {
    /// Event kind.
    pub kind: SecurityEventKind,
    /// Hash of the client address.
    pub client_ip_hash: String,
    /// Whether the client sent a user agent.
    pub has_user_agent: bool,
    /// Wall-clock timestamp.
    pub timestamp: SystemTime,
    /// Correlation id of the triggering request.
    pub correlation_id: String,
    /// Non-sensitive detail map.
    pub detail: BTreeMap<String, String>,
}

/// Aggregated view over the request buffer.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSummary {
    /// Requests recorded since startup.
    pub total_requests: u64,
    /// Successful requests since startup.
    pub successful_requests: u64,
    /// Failed requests since startup.
    pub failed_requests: u64,
    /// Success rate over the buffered window, in [0, 1].
    pub success_rate: f64,
    /// Average response time over the window, milliseconds.
    pub average_response_time_ms: f64,
    /// 95th percentile response time over the window, milliseconds.
    pub p95_response_time_ms: f64,
    /// Requests per chosen effort bucket over the window.
    pub effort_distribution: BTreeMap<String, u64>,
    /// Failures per error class over the window.
    pub error_distribution: BTreeMap<String, u64>,
    /// Total tokens recorded since startup.
    pub total_tokens: u64,
    /// Reasoning tokens recorded since startup.
    pub reasoning_tokens: u64,
    /// Retries recorded over the window.
    pub retries: u64,
    /// Degraded fallbacks recorded over the window.
    pub fallbacks: u64,
}

/// Process memory usage.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MemoryStats {
    /// Resident set size in bytes.
    pub used: u64,
    /// Total system memory in bytes.
    pub total: u64,
    /// Used as a share of total, in [0, 100].
    pub percentage: f64,
}

/// Overall health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Serving normally.
    Healthy,
    /// Serving with degraded quality or recent breaker activity.
    Degraded,
    /// Error rate or resource pressure beyond thresholds.
    Unhealthy,
}

impl HealthStatus {
    /// Wire label.
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

/// Process-wide monitor. Built at startup, flushed at shutdown.
pub struct Monitor {
    requests: Mutex<VecDeque<RequestMetric>>,
    security: Mutex<VecDeque<SecurityEvent>>,
    started: Instant,
    total_requests: AtomicU64,
    total_success: AtomicU64,
    total_failed: AtomicU64,
    total_tokens: AtomicU64,
    reasoning_tokens: AtomicU64,
    fallbacks_since_report: AtomicU64,
    trips_at_last_report: AtomicU64,
}

impl Monitor {
    /// Build an empty monitor.
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(VecDeque::with_capacity(REQUEST_BUFFER_CAP)),
            security: Mutex::new(VecDeque::with_capacity(SECURITY_BUFFER_CAP)),
            started: Instant::now(),
            total_requests: AtomicU64::new(0),
            total_success: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
            total_tokens: AtomicU64::new(0),
            reasoning_tokens: AtomicU64::new(0),
            fallbacks_since_report: AtomicU64::new(0),
            trips_at_last_report: AtomicU64::new(0),
        }
    }

    /// Seconds since startup.
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Record a completed request.
    pub fn record_request(&self, metric: RequestMetric) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        if metric.success {
            self.total_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.total_failed.fetch_add(1, Ordering::Relaxed);
        }

        self.total_tokens
            .fetch_add(metric.input_tokens + metric.output_tokens, Ordering::Relaxed);
        self.reasoning_tokens.fetch_add(metric.reasoning_tokens, Ordering::Relaxed);

        if metric.fallback_used {
            self.fallbacks_since_report.fetch_add(1, Ordering::Relaxed);
        }

        let mut requests = lock(&self.requests);
        if requests.len() == REQUEST_BUFFER_CAP {
            requests.pop_front();
        }
        requests.push_back(metric);
    }

    /// Record a security event.
    pub fn record_security(&self, event: SecurityEvent) {
        log::warn!(
            "security event {:?} correlation_id={} client={}",
            event.kind,
            event.correlation_id,
            event.client_ip_hash
        );

        let mut security = lock(&self.security);
        if security.len() == SECURITY_BUFFER_CAP {
            security.pop_front();
        }
        security.push_back(event);
    }

    /// Snapshot of the buffered security events.
    pub fn security_events(&self) -> Vec<SecurityEvent> {
        lock(&self.security).iter().cloned().collect()
    }

    /// Aggregate the buffered request metrics.
    pub fn summary(&self) -> MonitorSummary {
        let window: Vec<RequestMetric> = lock(&self.requests).iter().cloned().collect();

        let mut effort_distribution = BTreeMap::new();
        let mut error_distribution = BTreeMap::new();
        let mut retries = 0u64;
        let mut fallbacks = 0u64;
        let mut succeeded = 0u64;

        let mut times_ms: Vec<f64> = Vec::with_capacity(window.len());

        for metric in &window {
            times_ms.push(metric.response_time.as_secs_f64() * 1000.0);
            retries += metric.retry_count as u64;

            if metric.fallback_used {
                fallbacks += 1;
            }

            if metric.success {
                succeeded += 1;
            }

            *effort_distribution
                .entry(metric.effort.as_str().to_string())
                .or_insert(0) += 1;

            if let Some(class) = metric.error_class {
                *error_distribution.entry(class.to_string()).or_insert(0) += 1;
            }
        }

        let success_rate = if window.is_empty() {
            1.0
        } else {
            succeeded as f64 / window.len() as f64
        };

        let average = if times_ms.is_empty() {
            0.0
        } else {
            times_ms.iter().sum::<f64>() / times_ms.len() as f64
        };

        MonitorSummary {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.total_success.load(Ordering::Relaxed),
            failed_requests: self.total_failed.load(Ordering::Relaxed),
            success_rate,
            average_response_time_ms: average,
            p95_response_time_ms: percentile(&mut times_ms, 0.95),
            effort_distribution,
            error_distribution,
            total_tokens: self.total_tokens.load(Ordering::Relaxed),
            reasoning_tokens: self.reasoning_tokens.load(Ordering::Relaxed),
            retries,
            fallbacks,
        }
    }

    /// Classify overall health.
    ///
    /// Error rate above one half or memory above 90% is unhealthy; breaker
    /// trips or fallbacks since the last report, or memory above 80%, is
    /// degraded.
    pub fn health_status(&self, breaker_trips: u64, memory: &MemoryStats) -> HealthStatus {
        let summary = self.summary();

        if summary.success_rate < 0.5 || memory.percentage > 90.0 {
            return HealthStatus::Unhealthy;
        }

        let new_trips = breaker_trips > self.trips_at_last_report.load(Ordering::Relaxed);
        let recent_fallbacks = self.fallbacks_since_report.load(Ordering::Relaxed) > 0;

        if new_trips || recent_fallbacks || memory.percentage > 80.0 {
            return HealthStatus::Degraded;
        }

        HealthStatus::Healthy
    }

    /// Log the periodic summary and reset the since-last-report deltas.
    pub fn report(&self, breaker_trips: u64) {
        let summary = self.summary();

        log::info!(
            "request summary: total={} success_rate={:.3} avg_ms={:.1} p95_ms={:.1} retries={} fallbacks={} breaker_trips={} tokens={} reasoning_tokens={}",
            summary.total_requests,
            summary.success_rate,
            summary.average_response_time_ms,
            summary.p95_response_time_ms,
            summary.retries,
            summary.fallbacks,
            breaker_trips,
            summary.total_tokens,
            summary.reasoning_tokens,
        );

        self.fallbacks_since_report.store(0, Ordering::Relaxed);
        self.trips_at_last_report.store(breaker_trips, Ordering::Relaxed);
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn percentile(times_ms: &mut [f64], q: f64) -> f64 {
    if times_ms.is_empty() {
        return 0.0;
    }

    times_ms.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let rank = ((times_ms.len() as f64 - 1.0) * q).round() as usize;
    times_ms[rank.min(times_ms.len() - 1)]
}

/// Current process memory usage, with total system memory for context.
///
/// Reads the proc filesystem; on other platforms the stats are zero and
/// memory plays no part in health classification.
pub fn memory_stats() -> MemoryStats {
    #[cfg(target_os = "linux")]
    {
        let used = std::fs::read_to_string("/proc/self/status")
            .ok()
            .and_then(|status| parse_proc_kb(&status, "VmRSS:"))
            .unwrap_or(0)
            * 1024;

        let total = std::fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|meminfo| parse_proc_kb(&meminfo, "MemTotal:"))
            .unwrap_or(0)
            * 1024;

        let percentage = if total == 0 {
            0.0
        } else {
            used as f64 / total as f64 * 100.0
        };

        MemoryStats {
            used,
            total,
            percentage,
        }
    }

    #[cfg(not(target_os = "linux"))]
    {
        MemoryStats {
            used: 0,
            total: 0,
            percentage: 0.0,
        }
    }
}

#[cfg(target_os = "linux")]
fn parse_proc_kb(content: &str, field: &str) -> Option<u64> {
    content
        .lines()
        .find(|line| line.starts_with(field))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|value| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(success: bool, time_ms: u64) -> RequestMetric {
        RequestMetric {
            correlation_id: "corr-1".to_string(),
            dialect: Dialect::Claude,
            model: "claude-3-5-sonnet".to_string(),
            effort: ReasoningEffort::Medium,
            input_tokens: 10,
            output_tokens: 5,
            reasoning_tokens: 2,
            response_time: Duration::from_millis(time_ms),
            success,
            error_class: if success { None } else { Some("upstream_server") },
            retry_count: if success { 0 } else { 2 },
            breaker_used: false,
            fallback_used: false,
        }
    }

    #[test]
    fn summary_aggregates_the_window() {
        let monitor = Monitor::new();

        for _ in 0..8 {
            monitor.record_request(metric(true, 100));
        }
        monitor.record_request(metric(false, 300));
        monitor.record_request(metric(false, 500));

        let summary = monitor.summary();

        assert_eq!(summary.total_requests, 10);
        assert_eq!(summary.successful_requests, 8);
        assert_eq!(summary.failed_requests, 2);
        assert!((summary.success_rate - 0.8).abs() < 1e-9);
        assert_eq!(summary.retries, 4);
        assert_eq!(summary.effort_distribution.get("medium"), Some(&10));
        assert_eq!(summary.error_distribution.get("upstream_server"), Some(&2));
        assert_eq!(summary.total_tokens, 150);
        assert_eq!(summary.reasoning_tokens, 20);
        assert!(summary.p95_response_time_ms >= summary.average_response_time_ms);
    }

    #[test]
    fn request_buffer_is_bounded() {
        let monitor = Monitor::new();

        for _ in 0..(REQUEST_BUFFER_CAP + 50) {
            monitor.record_request(metric(true, 10));
        }

        assert_eq!(lock(&monitor.requests).len(), REQUEST_BUFFER_CAP);
        assert_eq!(monitor.summary().total_requests, (REQUEST_BUFFER_CAP + 50) as u64);
    }

    #[test]
    fn security_buffer_is_bounded() {
        let monitor = Monitor::new();

        for i in 0..(SECURITY_BUFFER_CAP + 10) {
            monitor.record_security(SecurityEvent {
                kind: SecurityEventKind::Validation,
                client_ip_hash: "abcd".to_string(),
                has_user_agent: true,
                timestamp: SystemTime::now(),
                correlation_id: format!("corr-{i}"),
                detail: BTreeMap::new(),
            });
        }

        assert_eq!(monitor.security_events().len(), SECURITY_BUFFER_CAP);
    }

    #[test]
    fn health_degrades_on_fallbacks_and_recovers_after_report() {
        let monitor = Monitor::new();
        let memory = MemoryStats {
            used: 0,
            total: 0,
            percentage: 0.0,
        };

        assert_eq!(monitor.health_status(0, &memory), HealthStatus::Healthy);

        let mut degraded = metric(true, 50);
        degraded.fallback_used = true;
        monitor.record_request(degraded);

        assert_eq!(monitor.health_status(0, &memory), HealthStatus::Degraded);

        monitor.report(0);
        assert_eq!(monitor.health_status(0, &memory), HealthStatus::Healthy);
    }

    #[test]
    fn health_is_unhealthy_beyond_the_error_threshold() {
        let monitor = Monitor::new();
        let memory = MemoryStats {
            used: 0,
            total: 0,
            percentage: 0.0,
        };

        for _ in 0..3 {
            monitor.record_request(metric(false, 100));
        }
        monitor.record_request(metric(true, 100));

        assert_eq!(monitor.health_status(0, &memory), HealthStatus::Unhealthy);
    }

    #[test]
    fn new_breaker_trips_degrade_until_reported() {
        let monitor = Monitor::new();
        let memory = MemoryStats {
            used: 0,
            total: 0,
            percentage: 0.0,
        };

        assert_eq!(monitor.health_status(1, &memory), HealthStatus::Degraded);

        monitor.report(1);
        assert_eq!(monitor.health_status(1, &memory), HealthStatus::Healthy);
    }
}
