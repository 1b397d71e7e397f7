//! Graceful degradation: a wire-correct answer when the upstream cannot serve.

use std::time::Duration;

use axum::http::StatusCode;
use serde_json::Value;

use crate::{
    detect::Dialect,
    error::GatewayError,
    messages::{
        anthropic::{AnthropicChatResponse, AnthropicErrorResponse},
        openai::{ChatCompletionResponse, OpenAiErrorResponse},
        unified::{OutputContent, OutputItem, ResponseStatus, ResponsesResponse, ResponsesUsage},
    },
    tokens,
};

const OVERLOADED_MESSAGE: &str =
    "The upstream model service is temporarily overloaded. Please retry in a few moments.";

const FALLBACK_MESSAGE: &str =
    "I'm having temporary difficulty reaching the language model. Please try your request again shortly.";

/// A degraded reply, flagged for the audit record.
pub struct DegradedReply {
    /// HTTP status of the reply.
    pub status: StatusCode,
    /// Dialect-correct body.
    pub body: Value,
    /// Wait hint to surface as a `Retry-After` header.
    pub retry_after: Option<Duration>,
    /// Whether a static assistant message stood in for a real completion.
    pub used_fallback_message: bool,
}

/// Render a dialect-correct reply for an error the resilience kernel gave
/// up on. Unavailability and exhausted rate limits render as proper error
/// envelopes; anything else becomes a static assistant message so
/// well-behaved clients keep working.
pub fn render(error: &GatewayError, dialect: Dialect, model: &str) -> DegradedReply {
    match error {
        GatewayError::RateLimit { .. } => DegradedReply {
            status: error.status_code(),
            body: error.to_wire(dialect),
            retry_after: error.retry_after(),
            used_fallback_message: false,
        },
        GatewayError::CircuitOpen
        | GatewayError::UpstreamTimeout
        | GatewayError::UpstreamNetwork(_)
        | GatewayError::UpstreamServer { .. } => DegradedReply {
            status: error.status_code(),
            body: unavailable_envelope(dialect),
            retry_after: None,
            used_fallback_message: false,
        },
        _ => DegradedReply {
            status: StatusCode::OK,
            body: fallback_message(dialect, model),
            retry_after: None,
            used_fallback_message: true,
        },
    }
}

fn unavailable_envelope(dialect: Dialect) -> Value {
    match dialect {
        Dialect::Claude => serde_json::to_value(AnthropicErrorResponse::new("api_error", OVERLOADED_MESSAGE))
            .unwrap_or_else(|_| serde_json::json!({"type": "error"})),
        Dialect::OpenAi => serde_json::to_value(OpenAiErrorResponse::new(
            "server_error",
            OVERLOADED_MESSAGE,
            Some("service_unavailable"),
        ))
        .unwrap_or_else(|_| serde_json::json!({"error": {}})),
    }
}

/// A synthetic completed response holding the static message, run through
/// the regular translators so the wire shape stays consistent.
fn fallback_message(dialect: Dialect, model: &str) -> Value {
    let output_tokens = tokens::estimate_text(FALLBACK_MESSAGE);

    let response = ResponsesResponse {
        id: format!("resp_degraded_{}", uuid::Uuid::new_v4().simple()),
        model: model.to_string(),
        status: ResponseStatus::Completed,
        output: vec![OutputItem::Message {
            id: None,
            role: "assistant".to_string(),
            content: vec![OutputContent::OutputText {
                text: FALLBACK_MESSAGE.to_string(),
            }],
        }],
        usage: ResponsesUsage {
            input_tokens: 0,
            output_tokens,
            output_tokens_details: Default::default(),
            total_tokens: output_tokens,
        },
        incomplete_details: None,
    };

    let body = match dialect {
        Dialect::Claude => serde_json::to_value(AnthropicChatResponse::from(response)),
        Dialect::OpenAi => serde_json::to_value(ChatCompletionResponse::from(response)),
    };

    body.unwrap_or_else(|_| serde_json::json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailability_renders_a_claude_error_envelope() {
        let reply = render(&GatewayError::CircuitOpen, Dialect::Claude, "claude-3-5-sonnet");

        assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(!reply.used_fallback_message);
        assert_eq!(reply.body["type"], "error");
        assert_eq!(reply.body["error"]["type"], "api_error");
        assert!(
            reply.body["error"]["message"]
                .as_str()
                .unwrap()
                .contains("temporarily overloaded")
        );
    }

    #[test]
    fn unavailability_renders_an_openai_error_envelope() {
        let error = GatewayError::UpstreamServer {
            status: 502,
            message: "bad gateway".into(),
        };
        let reply = render(&error, Dialect::OpenAi, "gpt-4");

        assert_eq!(reply.status, StatusCode::BAD_GATEWAY);
        assert_eq!(reply.body["error"]["type"], "server_error");
        assert_eq!(reply.body["error"]["code"], "service_unavailable");
    }

    #[test]
    fn exhausted_rate_limits_render_a_429_envelope_with_the_hint() {
        let error = GatewayError::RateLimit {
            message: "exhausted".into(),
            retry_after: Some(Duration::from_secs(12)),
        };

        let reply = render(&error, Dialect::Claude, "claude-3-5-sonnet");

        assert_eq!(reply.status, StatusCode::TOO_MANY_REQUESTS);
        assert!(!reply.used_fallback_message);
        assert_eq!(reply.retry_after, Some(Duration::from_secs(12)));
        assert_eq!(reply.body["type"], "error");
        assert_eq!(reply.body["error"]["type"], "rate_limit_error");

        let reply = render(&error, Dialect::OpenAi, "gpt-4");

        assert_eq!(reply.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(reply.body["error"]["type"], "rate_limit_error");
        assert_eq!(reply.body["error"]["code"], "rate_limit_exceeded");
    }

    #[test]
    fn other_failures_become_a_static_assistant_message() {
        let error = GatewayError::Transformation("mapping failed".into());

        let reply = render(&error, Dialect::Claude, "claude-3-5-sonnet");

        assert_eq!(reply.status, StatusCode::OK);
        assert!(reply.used_fallback_message);
        assert_eq!(reply.body["type"], "message");
        assert_eq!(reply.body["content"][0]["type"], "text");
        assert!(reply.body["usage"]["output_tokens"].as_u64().unwrap() > 0);

        let reply = render(&error, Dialect::OpenAi, "gpt-4");
        assert_eq!(reply.body["object"], "chat.completion");
        assert_eq!(reply.body["choices"][0]["finish_reason"], "stop");
    }
}
