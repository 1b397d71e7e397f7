//! Conversion from the OpenAI Chat Completions dialect to the upstream shape.

use std::collections::BTreeMap;

use crate::messages::{
    openai::{ChatCompletionRequest, ChatMessage, ChatMessageContent, ChatRole},
    unified::{InputContent, InputItem, ResponsesRequest, ResponsesTool},
};

impl From<ChatCompletionRequest> for ResponsesRequest {
    fn from(request: ChatCompletionRequest) -> Self {
        let mut instructions: Vec<String> = Vec::new();
        let mut input = Vec::with_capacity(request.messages.len());

        for message in request.messages {
            match message.role {
                ChatRole::System => {
                    if let Some(content) = message.content {
                        instructions.push(content.joined_text());
                    }
                }
                ChatRole::Tool => {
                    input.push(InputItem::FunctionCallOutput {
                        call_id: message.tool_call_id.unwrap_or_default(),
                        output: message.content.map(|c| c.joined_text()).unwrap_or_default(),
                    });
                }
                ChatRole::User | ChatRole::Assistant => push_chat_message(&mut input, message),
            }
        }

        let tools = request
            .tools
            .unwrap_or_default()
            .into_iter()
            .map(|tool| {
                ResponsesTool::function(tool.function.name, tool.function.description, tool.function.parameters)
            })
            .collect();

        ResponsesRequest {
            model: request.model,
            input,
            instructions: if instructions.is_empty() {
                None
            } else {
                Some(instructions.join("\n\n"))
            },
            reasoning: None,
            previous_response_id: None,
            tools,
            max_output_tokens: request.max_completion_tokens.or(request.max_tokens),
            temperature: request.temperature,
            top_p: request.top_p,
            stop: request.stop.map(|stop| stop.to_vec()),
            stream: request.stream.unwrap_or(false),
            store: true,
            user: request.user,
            metadata: BTreeMap::new(),
        }
    }
}

fn push_chat_message(input: &mut Vec<InputItem>, message: ChatMessage) {
    let is_assistant = message.role == ChatRole::Assistant;

    if let Some(content) = message.content {
        let parts = match content {
            ChatMessageContent::Text(text) => vec![text_content(is_assistant, text)],
            ChatMessageContent::Parts(parts) => parts
                .into_iter()
                .filter_map(|part| {
                    if let Some(text) = part.text {
                        Some(text_content(is_assistant, text))
                    } else {
                        part.image_url.map(|source| InputContent::InputImage { source })
                    }
                })
                .collect(),
        };

        if !parts.is_empty() {
            input.push(InputItem::Message {
                role: if is_assistant { "assistant" } else { "user" }.to_string(),
                content: parts,
            });
        }
    }

    // Assistant tool calls become standalone function_call items.
    for call in message.tool_calls.unwrap_or_default() {
        input.push(InputItem::FunctionCall {
            call_id: call.id,
            name: call.function.name,
            arguments: call.function.arguments,
        });
    }
}

fn text_content(is_assistant: bool, text: String) -> InputContent {
    if is_assistant {
        InputContent::OutputText { text }
    } else {
        InputContent::InputText { text }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::messages::{
        openai::ChatCompletionRequest,
        unified::{InputContent, InputItem, ResponsesRequest},
    };

    fn convert(body: serde_json::Value) -> ResponsesRequest {
        let request: ChatCompletionRequest = serde_json::from_value(body).unwrap();
        ResponsesRequest::from(request)
    }

    #[test]
    fn system_messages_merge_into_instructions() {
        let unified = convert(json!({
            "model": "gpt-4",
            "messages": [
                {"role": "system", "content": "Be terse."},
                {"role": "system", "content": "Answer in French."},
                {"role": "user", "content": "Hi"}
            ],
            "max_completion_tokens": 10
        }));

        assert_eq!(unified.instructions.as_deref(), Some("Be terse.\n\nAnswer in French."));
        assert_eq!(unified.input.len(), 1);
        assert_eq!(unified.max_output_tokens, Some(10));
    }

    #[test]
    fn legacy_max_tokens_is_used_when_completion_limit_absent() {
        let unified = convert(json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "Hi"}],
            "max_tokens": 64
        }));

        assert_eq!(unified.max_output_tokens, Some(64));
    }

    #[test]
    fn tool_turns_become_call_output_items() {
        let unified = convert(json!({
            "model": "gpt-4",
            "messages": [
                {"role": "assistant", "tool_calls": [{
                    "id": "call_9", "type": "function",
                    "function": {"name": "search", "arguments": "{\"q\":\"rust\"}"}
                }]},
                {"role": "tool", "content": "found it", "tool_call_id": "call_9"}
            ]
        }));

        assert_eq!(unified.input.len(), 2);

        let InputItem::FunctionCall { call_id, name, .. } = &unified.input[0] else {
            unreachable!("expected function call item");
        };
        assert_eq!(call_id, "call_9");
        assert_eq!(name, "search");

        let InputItem::FunctionCallOutput { call_id, output } = &unified.input[1] else {
            unreachable!("expected function call output item");
        };
        assert_eq!(call_id, "call_9");
        assert_eq!(output, "found it");
    }

    #[test]
    fn function_tools_map_to_unified_tools() {
        let unified = convert(json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "Hi"}],
            "tools": [{
                "type": "function",
                "function": {
                    "name": "search",
                    "description": "Search the web",
                    "parameters": {"type": "object"}
                }
            }]
        }));

        assert_eq!(unified.tools.len(), 1);
        assert_eq!(unified.tools[0].name, "search");
        assert_eq!(unified.tools[0].description, "Search the web");
    }

    #[test]
    fn image_parts_pass_through_opaquely() {
        let unified = convert(json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "What is this?"},
                {"type": "image_url", "image_url": {"url": "https://example.com/cat.png"}}
            ]}]
        }));

        let InputItem::Message { content, .. } = &unified.input[0] else {
            unreachable!("expected message item");
        };
        assert_eq!(content.len(), 2);
        assert!(matches!(&content[1], InputContent::InputImage { .. }));
    }
}
