//! Conversion from the Anthropic Messages dialect to the upstream shape.

use std::collections::BTreeMap;

use crate::messages::{
    anthropic::{
        AnthropicChatRequest, AnthropicContent, AnthropicMessageContent, AnthropicRole, AnthropicToolResultBlock,
        AnthropicToolResultContent,
    },
    unified::{InputContent, InputItem, ResponsesRequest, ResponsesTool},
};

impl From<AnthropicChatRequest> for ResponsesRequest {
    fn from(request: AnthropicChatRequest) -> Self {
        let mut input = Vec::with_capacity(request.messages.len());

        for message in request.messages {
            push_message(&mut input, message.role, message.content);
        }

        let tools = request
            .tools
            .unwrap_or_default()
            .into_iter()
            .map(|tool| ResponsesTool::function(tool.name, tool.description, tool.input_schema))
            .collect();

        ResponsesRequest {
            model: request.model,
            input,
            instructions: request.system,
            reasoning: None,
            previous_response_id: None,
            tools,
            max_output_tokens: request.max_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
            stop: request.stop_sequences,
            stream: request.stream.unwrap_or(false),
            store: true,
            user: request.metadata.and_then(|metadata| metadata.user_id),
            metadata: BTreeMap::new(),
        }
    }
}

fn push_message(input: &mut Vec<InputItem>, role: AnthropicRole, content: AnthropicMessageContent) {
    let role_name = match role {
        AnthropicRole::User => "user",
        AnthropicRole::Assistant => "assistant",
    };

    let blocks = match content {
        AnthropicMessageContent::Text(text) => {
            input.push(InputItem::Message {
                role: role_name.to_string(),
                content: vec![text_content(role, text)],
            });
            return;
        }
        AnthropicMessageContent::Blocks(blocks) => blocks,
    };

    // Text and image blocks group into one message item; tool blocks become
    // standalone function_call / function_call_output items so the upstream
    // can correlate them by call id.
    let mut parts = Vec::new();

    for block in blocks {
        match block {
            AnthropicContent::Text { text } => parts.push(text_content(role, text)),
            AnthropicContent::Image { source } => parts.push(InputContent::InputImage { source }),
            AnthropicContent::ToolUse { id, name, input: args } => {
                flush_parts(input, role_name, &mut parts);
                input.push(InputItem::FunctionCall {
                    call_id: id,
                    name,
                    arguments: args.to_string(),
                });
            }
            AnthropicContent::ToolResult {
                tool_use_id,
                content,
                is_error: _,
            } => {
                flush_parts(input, role_name, &mut parts);
                input.push(InputItem::FunctionCallOutput {
                    call_id: tool_use_id,
                    output: tool_result_text(content),
                });
            }
        }
    }

    flush_parts(input, role_name, &mut parts);
}

fn flush_parts(input: &mut Vec<InputItem>, role: &str, parts: &mut Vec<InputContent>) {
    if parts.is_empty() {
        return;
    }

    input.push(InputItem::Message {
        role: role.to_string(),
        content: std::mem::take(parts),
    });
}

fn text_content(role: AnthropicRole, text: String) -> InputContent {
    match role {
        AnthropicRole::User => InputContent::InputText { text },
        AnthropicRole::Assistant => InputContent::OutputText { text },
    }
}

fn tool_result_text(content: AnthropicToolResultContent) -> String {
    match content {
        AnthropicToolResultContent::Text(text) => text,
        AnthropicToolResultContent::Blocks(blocks) => blocks
            .into_iter()
            .map(|AnthropicToolResultBlock::Text { text }| text)
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::messages::{
        anthropic::AnthropicChatRequest,
        unified::{InputContent, InputItem, ResponsesRequest},
    };

    fn convert(body: serde_json::Value) -> ResponsesRequest {
        let request: AnthropicChatRequest = serde_json::from_value(body).unwrap();
        ResponsesRequest::from(request)
    }

    #[test]
    fn system_field_becomes_instructions() {
        let unified = convert(json!({
            "model": "claude-3-5-sonnet",
            "system": "You are terse.",
            "messages": [{"role": "user", "content": "Hi"}],
            "max_tokens": 50
        }));

        assert_eq!(unified.instructions.as_deref(), Some("You are terse."));
        assert_eq!(unified.max_output_tokens, Some(50));
        assert_eq!(unified.input.len(), 1);

        let InputItem::Message { role, content } = &unified.input[0] else {
            unreachable!("expected message item");
        };
        assert_eq!(role, "user");
        assert!(matches!(&content[0], InputContent::InputText { text } if text == "Hi"));
    }

    #[test]
    fn assistant_text_maps_to_output_text() {
        let unified = convert(json!({
            "model": "claude-3-5-sonnet",
            "messages": [
                {"role": "user", "content": "Hi"},
                {"role": "assistant", "content": "Hello!"}
            ],
            "max_tokens": 50
        }));

        let InputItem::Message { content, .. } = &unified.input[1] else {
            unreachable!("expected message item");
        };
        assert!(matches!(&content[0], InputContent::OutputText { text } if text == "Hello!"));
    }

    #[test]
    fn tool_blocks_become_call_items_with_verbatim_ids() {
        let unified = convert(json!({
            "model": "claude-3-5-sonnet",
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "text", "text": "Checking."},
                    {"type": "tool_use", "id": "tool_123", "name": "get_weather",
                     "input": {"location": "Paris"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "tool_123", "content": "rainy"}
                ]}
            ],
            "max_tokens": 50
        }));

        assert_eq!(unified.input.len(), 3);

        let InputItem::FunctionCall { call_id, name, arguments } = &unified.input[1] else {
            unreachable!("expected function call item");
        };
        assert_eq!(call_id, "tool_123");
        assert_eq!(name, "get_weather");
        assert!(arguments.contains("Paris"));

        let InputItem::FunctionCallOutput { call_id, output } = &unified.input[2] else {
            unreachable!("expected function call output item");
        };
        assert_eq!(call_id, "tool_123");
        assert_eq!(output, "rainy");
    }

    #[test]
    fn tool_declarations_map_to_function_tools() {
        let unified = convert(json!({
            "model": "claude-3-5-sonnet",
            "messages": [{"role": "user", "content": "weather?"}],
            "max_tokens": 50,
            "tools": [{
                "name": "get_weather",
                "description": "Get the weather",
                "input_schema": {"type": "object", "properties": {"location": {"type": "string"}}}
            }]
        }));

        assert_eq!(unified.tools.len(), 1);
        assert_eq!(unified.tools[0].r#type, "function");
        assert_eq!(unified.tools[0].name, "get_weather");
        assert_eq!(unified.tools[0].parameters["type"], "object");
    }

    #[test]
    fn stop_sequences_map_to_stop() {
        let unified = convert(json!({
            "model": "claude-3-5-sonnet",
            "messages": [{"role": "user", "content": "Hi"}],
            "max_tokens": 50,
            "stop_sequences": ["END"]
        }));

        assert_eq!(unified.stop.as_deref(), Some(["END".to_string()].as_slice()));
    }
}
