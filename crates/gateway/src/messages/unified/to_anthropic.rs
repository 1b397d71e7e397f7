//! Conversion from the upstream shape back to the Anthropic Messages dialect.

use serde_json::Value;

use crate::messages::{
    anthropic::{
        AnthropicChatResponse, AnthropicContent, AnthropicRole, AnthropicStopReason, AnthropicToolResultContent,
        AnthropicUsage,
    },
    unified::{OutputContent, OutputItem, ResponsesResponse},
};

impl From<ResponsesResponse> for AnthropicChatResponse {
    fn from(response: ResponsesResponse) -> Self {
        let stop_reason = stop_reason(&response);
        let usage = AnthropicUsage {
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.visible_output_tokens(),
        };

        let mut content = Vec::new();

        for item in response.output {
            match item {
                OutputItem::Message { content: parts, .. } => {
                    content.extend(parts.into_iter().filter_map(|part| match part {
                        OutputContent::OutputText { text } => Some(AnthropicContent::Text { text }),
                        OutputContent::Refusal { refusal } => Some(AnthropicContent::Text { text: refusal }),
                        OutputContent::Unknown => None,
                    }));
                }
                OutputItem::FunctionCall { call_id, name, arguments, .. } => {
                    content.push(AnthropicContent::ToolUse {
                        // Preserved verbatim so follow-up turns can reference it.
                        id: call_id,
                        name,
                        input: parse_arguments(&arguments),
                    });
                }
                OutputItem::FunctionCallOutput { call_id, output } => {
                    content.push(AnthropicContent::ToolResult {
                        tool_use_id: call_id,
                        content: AnthropicToolResultContent::Text(output),
                        is_error: None,
                    });
                }
                // Deliberation stays on the backend side of the boundary.
                OutputItem::Reasoning { .. } | OutputItem::Unknown => {}
            }
        }

        AnthropicChatResponse {
            id: response.id,
            r#type: "message".to_string(),
            role: AnthropicRole::Assistant,
            content,
            model: response.model,
            stop_reason: Some(stop_reason),
            stop_sequence: None,
            usage,
        }
    }
}

fn stop_reason(response: &ResponsesResponse) -> AnthropicStopReason {
    if response.has_tool_call() {
        AnthropicStopReason::ToolUse
    } else if response.is_truncated() {
        AnthropicStopReason::MaxTokens
    } else {
        AnthropicStopReason::EndTurn
    }
}

pub(crate) fn parse_arguments(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Object(serde_json::Map::new());
    }

    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::messages::{
        anthropic::{AnthropicChatResponse, AnthropicContent, AnthropicStopReason},
        unified::ResponsesResponse,
    };

    fn upstream(body: serde_json::Value) -> ResponsesResponse {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn reasoning_items_never_reach_the_client() {
        let response = AnthropicChatResponse::from(upstream(json!({
            "id": "resp_1",
            "model": "gpt-5",
            "status": "completed",
            "output": [
                {"type": "reasoning", "id": "rs_1", "summary": []},
                {"type": "message", "role": "assistant", "content": [
                    {"type": "output_text", "text": "Hi"}
                ]}
            ],
            "usage": {
                "input_tokens": 2,
                "output_tokens": 4,
                "output_tokens_details": {"reasoning_tokens": 3},
                "total_tokens": 6
            }
        })));

        assert_eq!(response.content.len(), 1);
        assert!(matches!(&response.content[0], AnthropicContent::Text { text } if text == "Hi"));
        assert_eq!(response.stop_reason, Some(AnthropicStopReason::EndTurn));

        // Reasoning tokens are hidden from the visible output count.
        assert_eq!(response.usage.input_tokens, 2);
        assert_eq!(response.usage.output_tokens, 1);
    }

    #[test]
    fn tool_calls_set_tool_use_stop_reason_and_keep_ids() {
        let response = AnthropicChatResponse::from(upstream(json!({
            "id": "resp_1",
            "model": "gpt-5",
            "output": [
                {"type": "function_call", "call_id": "tool_123", "name": "get_weather",
                 "arguments": "{\"location\":\"Paris\"}"}
            ]
        })));

        assert_eq!(response.stop_reason, Some(AnthropicStopReason::ToolUse));

        let AnthropicContent::ToolUse { id, name, input } = &response.content[0] else {
            unreachable!("expected tool use block");
        };
        assert_eq!(id, "tool_123");
        assert_eq!(name, "get_weather");
        assert_eq!(input["location"], "Paris");
    }

    #[test]
    fn truncation_maps_to_max_tokens() {
        let response = AnthropicChatResponse::from(upstream(json!({
            "id": "resp_1",
            "model": "gpt-5",
            "status": "incomplete",
            "incomplete_details": {"reason": "max_output_tokens"},
            "output": [
                {"type": "message", "role": "assistant", "content": [
                    {"type": "output_text", "text": "truncat"}
                ]}
            ]
        })));

        assert_eq!(response.stop_reason, Some(AnthropicStopReason::MaxTokens));
    }

    #[test]
    fn unparseable_arguments_fall_back_to_a_string() {
        let value = super::parse_arguments("not json");
        assert_eq!(value, json!("not json"));

        let value = super::parse_arguments("");
        assert_eq!(value, json!({}));
    }
}
