//! Per-request context carried through the pipeline.

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

use crate::{effort, messages::unified::ReasoningEffort};

/// Header carrying the request correlation id, assigned by middleware and
/// echoed back to the client.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Everything about one request that components downstream of the HTTP
/// surface need; passed explicitly, never stored globally.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Correlation id for logs, audit records and the upstream call.
    pub correlation_id: String,
    /// Client address as reported by the connection.
    pub client_ip: String,
    /// Explicit effort override from the client, if any.
    pub effort_override: Option<ReasoningEffort>,
    /// Whether the client sent a user agent.
    pub user_agent_present: bool,
}

impl RequestContext {
    /// Assemble the context from request headers and the peer address.
    pub fn extract(headers: &HeaderMap, client_ip: String) -> Self {
        let correlation_id = headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let effort_override = headers
            .get(effort::EFFORT_OVERRIDE_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(effort::parse_override);

        Self {
            correlation_id,
            client_ip,
            effort_override,
            user_agent_present: headers.contains_key(axum::http::header::USER_AGENT),
        }
    }

    /// Deterministic user tag for upstream abuse controls.
    pub fn user_tag(&self) -> String {
        format!("sw_{}", hash_prefix(&self.client_ip))
    }

    /// Hash of the client address for audit records.
    pub fn ip_hash(&self) -> String {
        hash_prefix(&self.client_ip)
    }
}

fn hash_prefix(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());

    let mut out = String::with_capacity(16);
    for byte in &digest[..8] {
        out.push_str(&format!("{byte:02x}"));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_a_correlation_id_when_absent() {
        let context = RequestContext::extract(&HeaderMap::new(), "10.0.0.1".to_string());
        assert!(!context.correlation_id.is_empty());
    }

    #[test]
    fn keeps_the_assigned_correlation_id() {
        let mut headers = HeaderMap::new();
        headers.insert(CORRELATION_ID_HEADER, "corr-42".parse().unwrap());

        let context = RequestContext::extract(&headers, "10.0.0.1".to_string());
        assert_eq!(context.correlation_id, "corr-42");
    }

    #[test]
    fn parses_the_effort_override() {
        let mut headers = HeaderMap::new();
        headers.insert("x-reasoning-effort", "high".parse().unwrap());

        let context = RequestContext::extract(&headers, "10.0.0.1".to_string());
        assert_eq!(context.effort_override, Some(ReasoningEffort::High));
    }

    #[test]
    fn user_tag_is_stable_per_client() {
        let a = RequestContext::extract(&HeaderMap::new(), "10.0.0.1".to_string());
        let b = RequestContext::extract(&HeaderMap::new(), "10.0.0.1".to_string());

        assert_eq!(a.user_tag(), b.user_tag());
        assert!(a.user_tag().starts_with("sw_"));
    }
}
