//! Prometheus-style metrics endpoint.

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse};
use http::header;
use prometheus_client::{encoding::text::encode, metrics::gauge::Gauge, registry::Registry};

use crate::AppState;

/// `GET /metrics`: the monitor summary in Prometheus text format.
///
/// The registry is rebuilt per scrape from the monitor's aggregates; the
/// buffers themselves stay the single source of truth.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let summary = state.gateway.monitor().summary();
    let memory = gateway::monitor::memory_stats();
    let trips = state.gateway.kernel().total_trips();

    let mut registry = Registry::default();

    gauge(
        &mut registry,
        "switchboard_requests_total",
        "Requests handled since startup",
        summary.total_requests,
    );
    gauge(
        &mut registry,
        "switchboard_requests_successful_total",
        "Successful requests since startup",
        summary.successful_requests,
    );
    gauge(
        &mut registry,
        "switchboard_requests_failed_total",
        "Failed requests since startup",
        summary.failed_requests,
    );
    gauge(
        &mut registry,
        "switchboard_response_time_avg_ms",
        "Average response time over the metric window",
        summary.average_response_time_ms as u64,
    );
    gauge(
        &mut registry,
        "switchboard_response_time_p95_ms",
        "95th percentile response time over the metric window",
        summary.p95_response_time_ms as u64,
    );
    gauge(
        &mut registry,
        "switchboard_retries_total",
        "Retries recorded over the metric window",
        summary.retries,
    );
    gauge(
        &mut registry,
        "switchboard_fallbacks_total",
        "Degraded fallbacks recorded over the metric window",
        summary.fallbacks,
    );
    gauge(
        &mut registry,
        "switchboard_breaker_trips_total",
        "Circuit breaker trips since startup",
        trips,
    );
    gauge(
        &mut registry,
        "switchboard_tokens_total",
        "Tokens recorded since startup",
        summary.total_tokens,
    );
    gauge(
        &mut registry,
        "switchboard_reasoning_tokens_total",
        "Reasoning tokens recorded since startup",
        summary.reasoning_tokens,
    );
    gauge(
        &mut registry,
        "switchboard_memory_used_bytes",
        "Resident set size",
        memory.used,
    );

    for (effort, count) in &summary.effort_distribution {
        gauge(
            &mut registry,
            &format!("switchboard_effort_{effort}_requests"),
            "Requests per chosen reasoning effort over the metric window",
            *count,
        );
    }

    for (class, count) in &summary.error_distribution {
        gauge(
            &mut registry,
            &format!("switchboard_errors_{class}_total"),
            "Failures per error class over the metric window",
            *count,
        );
    }

    let mut body = String::new();
    if let Err(e) = encode(&mut body, &registry) {
        log::error!("failed to encode metrics: {e}");
    }

    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

fn gauge(registry: &mut Registry, name: &str, help: &str, value: u64) {
    let gauge = Gauge::<i64>::default();
    gauge.set(value.min(i64::MAX as u64) as i64);
    registry.register(name, help, gauge);
}
