//! Conversion from the upstream shape back to the OpenAI Chat Completions dialect.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::messages::{
    openai::{
        ChatChoice, ChatCompletionResponse, ChatMessage, ChatMessageContent, ChatRole, ChatUsage, FinishReason,
        FunctionCall, ToolCall,
    },
    unified::{OutputContent, OutputItem, ResponsesResponse},
};

impl From<ResponsesResponse> for ChatCompletionResponse {
    fn from(response: ResponsesResponse) -> Self {
        let finish_reason = finish_reason(&response);

        let usage = ChatUsage {
            prompt_tokens: response.usage.input_tokens,
            completion_tokens: response.usage.visible_output_tokens(),
            total_tokens: response.usage.input_tokens + response.usage.visible_output_tokens(),
        };

        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for item in response.output {
            match item {
                OutputItem::Message { content, .. } => {
                    for part in content {
                        match part {
                            OutputContent::OutputText { text: t } => text.push_str(&t),
                            OutputContent::Refusal { refusal } => text.push_str(&refusal),
                            OutputContent::Unknown => {}
                        }
                    }
                }
                OutputItem::FunctionCall { call_id, name, arguments, .. } => {
                    tool_calls.push(ToolCall {
                        id: call_id,
                        call_type: "function".to_string(),
                        function: FunctionCall { name, arguments },
                    });
                }
                // Deliberation stays on the backend side of the boundary;
                // call outputs are inputs in this dialect, not completions.
                OutputItem::Reasoning { .. } | OutputItem::FunctionCallOutput { .. } | OutputItem::Unknown => {}
            }
        }

        ChatCompletionResponse {
            id: response.id,
            object: "chat.completion".to_string(),
            created: unix_now(),
            model: response.model,
            choices: vec![ChatChoice {
                index: 0,
                message: ChatMessage {
                    role: ChatRole::Assistant,
                    content: if text.is_empty() {
                        None
                    } else {
                        Some(ChatMessageContent::Text(text))
                    },
                    tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
                    tool_call_id: None,
                },
                finish_reason,
            }],
            usage,
        }
    }
}

fn finish_reason(response: &ResponsesResponse) -> FinishReason {
    if response.has_tool_call() {
        FinishReason::ToolCalls
    } else if response.is_truncated() {
        FinishReason::Length
    } else {
        FinishReason::Stop
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::messages::{
        openai::{ChatCompletionResponse, FinishReason},
        unified::ResponsesResponse,
    };

    fn upstream(body: serde_json::Value) -> ResponsesResponse {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn text_response_maps_to_a_single_choice() {
        let response = ChatCompletionResponse::from(upstream(json!({
            "id": "resp_1",
            "model": "gpt-5",
            "status": "completed",
            "output": [
                {"type": "reasoning", "id": "rs_1", "summary": []},
                {"type": "message", "role": "assistant", "content": [
                    {"type": "output_text", "text": "Hello there"}
                ]}
            ],
            "usage": {
                "input_tokens": 5,
                "output_tokens": 10,
                "output_tokens_details": {"reasoning_tokens": 4},
                "total_tokens": 15
            }
        })));

        assert_eq!(response.object, "chat.completion");
        assert_eq!(response.choices.len(), 1);
        assert_eq!(response.choices[0].finish_reason, FinishReason::Stop);
        assert_eq!(
            response.choices[0].message.content.as_ref().unwrap().joined_text(),
            "Hello there"
        );

        assert_eq!(response.usage.prompt_tokens, 5);
        assert_eq!(response.usage.completion_tokens, 6);
        assert_eq!(response.usage.total_tokens, 11);
    }

    #[test]
    fn tool_calls_map_to_the_tool_calls_array() {
        let response = ChatCompletionResponse::from(upstream(json!({
            "id": "resp_1",
            "model": "gpt-5",
            "output": [
                {"type": "function_call", "call_id": "call_7", "name": "search",
                 "arguments": "{\"q\":\"rust\"}"}
            ]
        })));

        assert_eq!(response.choices[0].finish_reason, FinishReason::ToolCalls);

        let calls = response.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "call_7");
        assert_eq!(calls[0].function.name, "search");
        assert_eq!(calls[0].function.arguments, "{\"q\":\"rust\"}");
    }

    #[test]
    fn truncation_maps_to_length() {
        let response = ChatCompletionResponse::from(upstream(json!({
            "id": "resp_1",
            "model": "gpt-5",
            "status": "incomplete",
            "incomplete_details": {"reason": "max_output_tokens"},
            "output": []
        })));

        assert_eq!(response.choices[0].finish_reason, FinishReason::Length);
    }
}
