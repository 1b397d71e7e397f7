//! Health endpoint assembling the monitor snapshot.

use std::sync::Arc;

use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::AppState;

/// `GET /health`: overall status, per-service state, and rollup metrics.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let monitor = state.gateway.monitor();
    let summary = monitor.summary();
    let memory = gateway::monitor::memory_stats();
    let breakers = state.gateway.kernel().breaker_snapshots();
    let trips = state.gateway.kernel().total_trips();

    let status = monitor.health_status(trips, &memory);

    let upstream_state = breakers
        .iter()
        .find(|(operation, _)| operation == "respond")
        .map(|(_, snapshot)| snapshot.state)
        .unwrap_or(gateway::resilience::breaker::BreakerState::Closed);

    let upstream_status = match upstream_state {
        gateway::resilience::breaker::BreakerState::Closed => "healthy",
        gateway::resilience::breaker::BreakerState::HalfOpen => "recovering",
        gateway::resilience::breaker::BreakerState::Open => "unavailable",
    };

    let circuit_breakers: serde_json::Map<String, Value> = breakers
        .iter()
        .map(|(operation, snapshot)| {
            (
                operation.clone(),
                json!({
                    "state": snapshot.state.as_str(),
                    "trips": snapshot.trip_count,
                    "successes": snapshot.success_count,
                    "failures": snapshot.failure_count,
                    "lastFailureAgoMs": snapshot.last_failure_age.map(|age| age.as_millis() as u64),
                }),
            )
        })
        .collect();

    Json(json!({
        "status": status.as_str(),
        "timestamp": jiff::Timestamp::now().to_string(),
        "uptime": monitor.uptime().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.environment.as_str(),
        "services": {
            "azureOpenAI": {
                "status": upstream_status,
                "responseTime": summary.average_response_time_ms,
                "lastCheck": jiff::Timestamp::now().to_string(),
            },
            "circuitBreakers": circuit_breakers,
        },
        "metrics": {
            "requests": {
                "total": summary.total_requests,
                "successful": summary.successful_requests,
                "failed": summary.failed_requests,
                "averageResponseTime": summary.average_response_time_ms,
            },
            "tokens": {
                "total": summary.total_tokens,
                "reasoning": summary.reasoning_tokens,
            },
            "memory": {
                "used": memory.used,
                "total": memory.total,
                "percentage": memory.percentage,
            },
        },
    }))
}
