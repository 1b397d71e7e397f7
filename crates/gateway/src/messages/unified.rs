//! Backend-facing unified types for the upstream Responses API.
//!
//! Both client dialects are mapped onto these shapes before dispatch, and
//! every upstream reply is decoded into them before translation back to
//! the client's dialect:
//!
//! ```text
//! Dialect request → ResponsesRequest → upstream → ResponsesResponse → dialect response
//! ```
//!
//! Reasoning output items exist only on this side of the boundary; the
//! translators drop them before anything reaches a client.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub(crate) mod from_anthropic;
pub(crate) mod from_openai;
pub(crate) mod to_anthropic;
pub(crate) mod to_openai;

/// Request body for the upstream Responses API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesRequest {
    /// Model or deployment identifier.
    pub model: String,

    /// Normalized input items in conversation order.
    pub input: Vec<InputItem>,

    /// System instructions, extracted from the dialect's system carrier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Reasoning budget hint. Omitted entirely when effort is none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningParams>,

    /// Identifier of the previous response in this conversation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,

    /// Tool declarations in the backend-native shape.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tools: Vec<ResponsesTool>,

    /// Cap on generated tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u64>,

    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Nucleus sampling cutoff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    /// Stop sequences.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,

    /// Whether the upstream should stream.
    pub stream: bool,

    /// Ask the upstream to retain the response for conversation threading.
    pub store: bool,

    /// Deterministic end-user tag for upstream abuse controls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Request metadata; carries the correlation id.
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub metadata: BTreeMap<String, String>,
}

/// Reasoning parameters for the upstream request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReasoningParams {
    /// Requested deliberation budget.
    pub effort: ReasoningEffort,
}

/// Reasoning budget bucket chosen for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    /// Minimal deliberation.
    Low,
    /// Moderate deliberation.
    Medium,
    /// Extensive deliberation.
    High,
    /// No reasoning requested; the parameter is omitted upstream.
    None,
}

impl ReasoningEffort {
    /// Wire name of the bucket.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
            ReasoningEffort::None => "none",
        }
    }

    /// The next bucket up, capped at high.
    pub fn bumped(self) -> Self {
        match self {
            ReasoningEffort::None => ReasoningEffort::Low,
            ReasoningEffort::Low => ReasoningEffort::Medium,
            ReasoningEffort::Medium | ReasoningEffort::High => ReasoningEffort::High,
        }
    }
}

/// One item of upstream input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputItem {
    /// A conversation message.
    Message {
        /// `system`, `user` or `assistant`.
        role: String,
        /// Typed content parts.
        content: Vec<InputContent>,
    },

    /// A prior tool invocation by the assistant.
    FunctionCall {
        /// Identifier correlating the call with its output.
        call_id: String,
        /// Function name.
        name: String,
        /// Arguments as a JSON-encoded string.
        arguments: String,
    },

    /// Output of a prior tool invocation.
    FunctionCallOutput {
        /// The call this output answers.
        call_id: String,
        /// Tool output payload.
        output: String,
    },
}

/// Typed content inside a message input item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputContent {
    /// Text supplied by the client.
    InputText {
        /// The text.
        text: String,
    },

    /// Text previously produced by the model.
    OutputText {
        /// The text.
        text: String,
    },

    /// An image, forwarded opaquely.
    InputImage {
        /// Raw image source as received.
        source: Value,
    },
}

/// Tool declaration in the backend-native shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesTool {
    /// Always `function`.
    pub r#type: String,

    /// Tool name.
    pub name: String,

    /// What the tool does.
    pub description: String,

    /// JSON Schema for the tool input.
    pub parameters: Value,
}

impl ResponsesTool {
    /// Build a function tool declaration.
    pub fn function(name: String, description: String, parameters: Value) -> Self {
        Self {
            r#type: "function".to_string(),
            name,
            description,
            parameters,
        }
    }
}

/// A complete upstream response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesResponse {
    /// Response identifier, threaded into the next turn.
    pub id: String,

    /// Model that produced the response.
    #[serde(default)]
    pub model: String,

    /// Terminal status of the response.
    #[serde(default)]
    pub status: ResponseStatus,

    /// Ordered output items.
    #[serde(default)]
    pub output: Vec<OutputItem>,

    /// Token accounting.
    #[serde(default)]
    pub usage: ResponsesUsage,

    /// Details when the response is incomplete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incomplete_details: Option<IncompleteDetails>,
}

impl ResponsesResponse {
    /// Whether the upstream reported truncation rather than completion.
    pub fn is_truncated(&self) -> bool {
        matches!(self.status, ResponseStatus::Incomplete)
            || self
                .incomplete_details
                .as_ref()
                .is_some_and(|details| details.reason == "max_output_tokens")
    }

    /// Whether any output item is a tool call.
    pub fn has_tool_call(&self) -> bool {
        self.output
            .iter()
            .any(|item| matches!(item, OutputItem::FunctionCall { .. }))
    }
}

/// Terminal status of an upstream response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// Generation finished naturally.
    #[default]
    Completed,
    /// Generation stopped early, typically on the token cap.
    Incomplete,
    /// Generation failed upstream.
    Failed,
    /// Generation is still running (streaming).
    InProgress,
}

/// Reason a response is incomplete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncompleteDetails {
    /// Machine-readable reason, e.g. `max_output_tokens`.
    pub reason: String,
}

/// One item of upstream output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    /// A generated message.
    Message {
        /// Item identifier.
        #[serde(default)]
        id: Option<String>,
        /// Always `assistant`.
        role: String,
        /// Typed content parts.
        content: Vec<OutputContent>,
    },

    /// Internal deliberation. Never forwarded to clients.
    Reasoning {
        /// Item identifier.
        #[serde(default)]
        id: Option<String>,
        /// Opaque summary parts; consumed, not forwarded.
        #[serde(default)]
        summary: Vec<Value>,
    },

    /// A tool invocation requested by the model.
    FunctionCall {
        /// Item identifier.
        #[serde(default)]
        id: Option<String>,
        /// Identifier correlating the call with its output.
        call_id: String,
        /// Function name.
        name: String,
        /// Arguments as a JSON-encoded string.
        arguments: String,
    },

    /// Output of a tool invocation echoed by the upstream.
    FunctionCallOutput {
        /// The call this output answers.
        call_id: String,
        /// Tool output payload.
        output: String,
    },

    /// An item type this gateway does not know about.
    #[serde(other)]
    Unknown,
}

/// Typed content inside a message output item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputContent {
    /// Generated text.
    OutputText {
        /// The text.
        text: String,
    },

    /// The model declined to answer.
    Refusal {
        /// Refusal message.
        refusal: String,
    },

    /// A content type this gateway does not know about.
    #[serde(other)]
    Unknown,
}

/// Token accounting for an upstream response.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResponsesUsage {
    /// Tokens in the input.
    #[serde(default)]
    pub input_tokens: u64,

    /// Tokens generated, including reasoning tokens.
    #[serde(default)]
    pub output_tokens: u64,

    /// Breakdown of the output tokens.
    #[serde(default)]
    pub output_tokens_details: OutputTokensDetails,

    /// Input plus output.
    #[serde(default)]
    pub total_tokens: u64,
}

impl ResponsesUsage {
    /// Tokens spent on internal deliberation.
    pub fn reasoning_tokens(&self) -> u64 {
        self.output_tokens_details.reasoning_tokens
    }

    /// Output tokens excluding deliberation.
    pub fn visible_output_tokens(&self) -> u64 {
        self.output_tokens.saturating_sub(self.reasoning_tokens())
    }
}

/// Output token breakdown.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OutputTokensDetails {
    /// Tokens spent on internal deliberation.
    #[serde(default)]
    pub reasoning_tokens: u64,
}

/// One event from the upstream response stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ResponsesStreamEvent {
    /// Incremental generated text.
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta {
        /// Text to append.
        delta: String,
    },

    /// Incremental deliberation text. Consumed, never forwarded.
    #[serde(rename = "response.reasoning_text.delta")]
    ReasoningTextDelta {
        /// Deliberation fragment.
        delta: String,
    },

    /// Incremental deliberation summary. Consumed, never forwarded.
    #[serde(rename = "response.reasoning_summary_text.delta")]
    ReasoningSummaryDelta {
        /// Deliberation fragment.
        delta: String,
    },

    /// A complete output item.
    #[serde(rename = "response.output_item.done")]
    OutputItemDone {
        /// The finished item.
        item: OutputItem,
    },

    /// Terminal event carrying the full response envelope.
    #[serde(rename = "response.completed")]
    Completed {
        /// The complete response.
        response: ResponsesResponse,
    },

    /// Terminal event for a truncated response.
    #[serde(rename = "response.incomplete")]
    Incomplete {
        /// The truncated response.
        response: ResponsesResponse,
    },

    /// Terminal event for a failed response.
    #[serde(rename = "response.failed")]
    Failed {
        /// Raw failure envelope.
        response: Value,
    },

    /// An event type this gateway does not know about.
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_omits_empty_optionals() {
        let request = ResponsesRequest {
            model: "gpt-5".to_string(),
            input: vec![InputItem::Message {
                role: "user".to_string(),
                content: vec![InputContent::InputText {
                    text: "Hello".to_string(),
                }],
            }],
            instructions: None,
            reasoning: None,
            previous_response_id: None,
            tools: Vec::new(),
            max_output_tokens: Some(50),
            temperature: None,
            top_p: None,
            stop: None,
            stream: false,
            store: true,
            user: None,
            metadata: BTreeMap::new(),
        };

        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["model"], "gpt-5");
        assert_eq!(json["input"][0]["type"], "message");
        assert_eq!(json["input"][0]["content"][0]["type"], "input_text");
        assert!(json.get("reasoning").is_none());
        assert!(json.get("previous_response_id").is_none());
        assert!(json.get("tools").is_none());
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn response_decodes_mixed_output() {
        let response: ResponsesResponse = serde_json::from_value(json!({
            "id": "resp_abc",
            "status": "completed",
            "output": [
                {"type": "reasoning", "id": "rs_1", "summary": []},
                {"type": "message", "id": "msg_1", "role": "assistant", "content": [
                    {"type": "output_text", "text": "Hi"}
                ]},
                {"type": "function_call", "call_id": "call_1", "name": "get_weather",
                 "arguments": "{\"location\":\"Paris\"}"}
            ],
            "usage": {
                "input_tokens": 2,
                "output_tokens": 4,
                "output_tokens_details": {"reasoning_tokens": 3},
                "total_tokens": 6
            }
        }))
        .unwrap();

        assert_eq!(response.output.len(), 3);
        assert!(response.has_tool_call());
        assert_eq!(response.usage.reasoning_tokens(), 3);
        assert_eq!(response.usage.visible_output_tokens(), 1);
        assert!(!response.is_truncated());
    }

    #[test]
    fn unknown_output_items_do_not_fail_decoding() {
        let response: ResponsesResponse = serde_json::from_value(json!({
            "id": "resp_abc",
            "output": [{"type": "web_search_call", "id": "ws_1"}]
        }))
        .unwrap();

        assert!(matches!(response.output[0], OutputItem::Unknown));
    }

    #[test]
    fn stream_events_decode_by_type() {
        let event: ResponsesStreamEvent = serde_json::from_str(
            r#"{"type":"response.output_text.delta","delta":"Hel"}"#,
        )
        .unwrap();
        assert!(matches!(event, ResponsesStreamEvent::OutputTextDelta { ref delta } if delta == "Hel"));

        let event: ResponsesStreamEvent = serde_json::from_str(
            r#"{"type":"response.completed","response":{"id":"resp_1","status":"completed"}}"#,
        )
        .unwrap();
        assert!(matches!(event, ResponsesStreamEvent::Completed { .. }));

        let event: ResponsesStreamEvent =
            serde_json::from_str(r#"{"type":"response.audio.delta"}"#).unwrap();
        assert!(matches!(event, ResponsesStreamEvent::Unknown));
    }

    #[test]
    fn incomplete_status_counts_as_truncated() {
        let response: ResponsesResponse = serde_json::from_value(json!({
            "id": "resp_abc",
            "status": "incomplete",
            "incomplete_details": {"reason": "max_output_tokens"}
        }))
        .unwrap();

        assert!(response.is_truncated());
    }
}
