//! Gateway error taxonomy with dialect-specific wire envelopes.

use std::time::Duration;

use axum::http::StatusCode;
use thiserror::Error;

use crate::{
    detect::Dialect,
    messages::{anthropic::AnthropicErrorResponse, openai::OpenAiErrorResponse},
    scrub,
};

/// Result alias used across the gateway.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Every failure mode a request can hit, each with a fixed HTTP status and
/// a fixed answer to "may the dispatcher retry this?".
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Shape, size or range violation found during validation.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// Injection pattern or malformed credential material in the request.
    #[error("Request rejected: {0}")]
    Security(String),

    /// Client credential missing or invalid.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Upstream or local rate limit hit.
    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        /// Human-readable detail.
        message: String,
        /// Upstream-supplied wait hint.
        retry_after: Option<Duration>,
    },

    /// The per-request deadline elapsed before the upstream answered.
    #[error("Upstream request timed out")]
    UpstreamTimeout,

    /// Connection-class failure talking to the upstream.
    #[error("Upstream connection failed: {0}")]
    UpstreamNetwork(String),

    /// The upstream returned a 5xx.
    #[error("Upstream error ({status}): {message}")]
    UpstreamServer {
        /// HTTP status from the upstream.
        status: u16,
        /// Upstream error body, surfaced verbatim for classification.
        message: String,
    },

    /// The circuit breaker short-circuited this call.
    #[error("Upstream circuit is open")]
    CircuitOpen,

    /// Internal mapping failure building the upstream request.
    #[error("Request transformation failed: {0}")]
    Transformation(String),

    /// Request body exceeded the 10 MiB limit.
    #[error("Request body too large")]
    PayloadTooLarge,
}

impl GatewayError {
    /// HTTP status presented to the client.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::Security(_) => StatusCode::BAD_REQUEST,
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::UpstreamNetwork(_) | Self::UpstreamServer { .. } => StatusCode::BAD_GATEWAY,
            Self::CircuitOpen => StatusCode::SERVICE_UNAVAILABLE,
            Self::Transformation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    /// Whether the resilience kernel may retry the failed attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimit { .. } | Self::UpstreamTimeout | Self::UpstreamNetwork(_) => true,
            Self::UpstreamServer { status, .. } => matches!(status, 408 | 425 | 429 | 500 | 502 | 503 | 504),
            _ => false,
        }
    }

    /// Upstream wait hint, when one was supplied.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Short classification label for metrics and audit records.
    pub fn class(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Security(_) => "security",
            Self::Authentication(_) => "authentication",
            Self::RateLimit { .. } => "rate_limit",
            Self::UpstreamTimeout => "upstream_timeout",
            Self::UpstreamNetwork(_) => "upstream_network",
            Self::UpstreamServer { .. } => "upstream_server",
            Self::CircuitOpen => "circuit_open",
            Self::Transformation(_) => "transformation",
            Self::PayloadTooLarge => "payload_too_large",
        }
    }

    /// Error type string used inside dialect envelopes.
    pub fn wire_type(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::Security(_) | Self::PayloadTooLarge => "invalid_request_error",
            Self::Authentication(_) => "authentication_error",
            Self::RateLimit { .. } => "rate_limit_error",
            Self::UpstreamTimeout | Self::UpstreamNetwork(_) | Self::UpstreamServer { .. } | Self::CircuitOpen => {
                "api_error"
            }
            Self::Transformation(_) => "internal_error",
        }
    }

    /// Message safe to show a client: scrubbed of secrets, never a stack
    /// trace or internal type name.
    pub fn client_message(&self) -> String {
        scrub::scrub(&self.to_string())
    }

    /// Render the dialect-correct error envelope as a JSON value.
    pub fn to_wire(&self, dialect: Dialect) -> serde_json::Value {
        let message = self.client_message();

        match dialect {
            Dialect::Claude => {
                serde_json::to_value(AnthropicErrorResponse::new(self.wire_type(), message))
                    .unwrap_or_else(|_| serde_json::json!({"type": "error"}))
            }
            Dialect::OpenAi => {
                let code = match self {
                    Self::CircuitOpen => Some("service_unavailable"),
                    Self::RateLimit { .. } => Some("rate_limit_exceeded"),
                    _ => None,
                };
                let wire_type = match self {
                    Self::UpstreamTimeout | Self::UpstreamNetwork(_) | Self::UpstreamServer { .. } | Self::CircuitOpen => {
                        "server_error"
                    }
                    other => other.wire_type(),
                };

                serde_json::to_value(OpenAiErrorResponse::new(wire_type, message, code))
                    .unwrap_or_else(|_| serde_json::json!({"error": {}}))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_match_the_taxonomy() {
        assert_eq!(
            GatewayError::Validation("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::Authentication("no".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(GatewayError::UpstreamTimeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(GatewayError::CircuitOpen.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            GatewayError::PayloadTooLarge.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn retryability_follows_the_error_class() {
        assert!(GatewayError::UpstreamTimeout.is_retryable());
        assert!(GatewayError::UpstreamNetwork("reset".into()).is_retryable());
        assert!(
            GatewayError::RateLimit {
                message: "slow down".into(),
                retry_after: None
            }
            .is_retryable()
        );
        assert!(
            GatewayError::UpstreamServer {
                status: 503,
                message: "overloaded".into()
            }
            .is_retryable()
        );

        assert!(!GatewayError::Validation("bad".into()).is_retryable());
        assert!(!GatewayError::Authentication("no".into()).is_retryable());
        assert!(!GatewayError::CircuitOpen.is_retryable());
        assert!(
            !GatewayError::UpstreamServer {
                status: 403,
                message: "forbidden".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn claude_envelope_has_the_error_shape() {
        let wire = GatewayError::CircuitOpen.to_wire(Dialect::Claude);

        assert_eq!(wire["type"], "error");
        assert_eq!(wire["error"]["type"], "api_error");
    }

    #[test]
    fn openai_envelope_marks_unavailability() {
        let wire = GatewayError::CircuitOpen.to_wire(Dialect::OpenAi);

        assert_eq!(wire["error"]["type"], "server_error");
        assert_eq!(wire["error"]["code"], "service_unavailable");
    }

    #[test]
    fn client_messages_are_scrubbed() {
        let error = GatewayError::UpstreamServer {
            status: 500,
            message: "rejected key sk-proj-abc123def456".into(),
        };

        assert!(!error.client_message().contains("sk-proj"));
    }
}
