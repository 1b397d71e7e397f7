//! Wire types for the OpenAI Chat Completions dialect.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body for the `/v1/chat/completions` shape.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatCompletionRequest {
    /// The model to answer with.
    pub model: String,

    /// Conversation turns.
    pub messages: Vec<ChatMessage>,

    /// Legacy completion token limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,

    /// Completion token limit for reasoning-capable models.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u64>,

    /// Randomness control, 0.0 to 2.0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Nucleus sampling cutoff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    /// Sequences that stop generation; a bare string or up to four.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopSequences>,

    /// Whether to stream the response as Server-Sent Events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    /// Tools the model may call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ChatTool>>,

    /// Requested response format (`text` or `json_object`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,

    /// Opaque end-user identifier for abuse tracking.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// Stop sequences: a single string or a list.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum StopSequences {
    /// One stop sequence.
    One(String),
    /// Several stop sequences.
    Many(Vec<String>),
}

impl StopSequences {
    /// View as a list regardless of wire form.
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            StopSequences::One(s) => vec![s.clone()],
            StopSequences::Many(list) => list.clone(),
        }
    }
}

/// A single conversation turn.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatMessage {
    /// Sender of this turn.
    pub role: ChatRole,

    /// Message text, absent for pure tool-call turns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<ChatMessageContent>,

    /// Tool calls made by the assistant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,

    /// For `tool` turns, the call this message answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// Message sender role.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// System instructions.
    System,
    /// End-user input.
    User,
    /// Model output.
    Assistant,
    /// Tool execution result.
    Tool,
}

/// Message content: a flat string or an array of typed parts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ChatMessageContent {
    /// Plain text.
    Text(String),
    /// Multi-part content.
    Parts(Vec<ChatContentPart>),
}

impl ChatMessageContent {
    /// Concatenated text of all parts.
    pub fn joined_text(&self) -> String {
        match self {
            ChatMessageContent::Text(text) => text.clone(),
            ChatMessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| part.text.as_deref())
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// One part of a multi-part message.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatContentPart {
    /// Part type, typically `text` or `image_url`.
    #[serde(rename = "type")]
    pub part_type: String,

    /// Text payload for `text` parts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Image payload for `image_url` parts, forwarded opaquely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<Value>,
}

/// Tool declaration wrapping a function definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatTool {
    /// Always `function`.
    #[serde(rename = "type")]
    pub tool_type: String,

    /// The function definition.
    pub function: ChatFunction,
}

/// Function definition inside a tool declaration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatFunction {
    /// Function name.
    pub name: String,

    /// What the function does.
    #[serde(default)]
    pub description: String,

    /// JSON Schema describing the parameters.
    #[serde(default)]
    pub parameters: Value,
}

/// Tool call made by the assistant.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolCall {
    /// Identifier correlating this call with its result.
    pub id: String,

    /// Always `function`.
    #[serde(rename = "type")]
    pub call_type: String,

    /// The invoked function with serialized arguments.
    pub function: FunctionCall,
}

/// Function invocation with arguments as a JSON string.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FunctionCall {
    /// Function name.
    pub name: String,

    /// Arguments as a JSON-encoded string.
    pub arguments: String,
}

/// Response body for the `/v1/chat/completions` shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    /// Response identifier, preserved from the upstream.
    pub id: String,

    /// Always `chat.completion`.
    pub object: String,

    /// Unix timestamp of creation.
    pub created: u64,

    /// Model that produced the response.
    pub model: String,

    /// Completion choices; a single choice in practice.
    pub choices: Vec<ChatChoice>,

    /// Token accounting.
    pub usage: ChatUsage,
}

/// One completion choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    /// Choice index.
    pub index: u32,

    /// The generated message.
    pub message: ChatMessage,

    /// Why generation stopped.
    pub finish_reason: FinishReason,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural stopping point.
    Stop,
    /// Token limit reached; output may be truncated.
    Length,
    /// The model invoked tools.
    ToolCalls,
    /// Output was filtered.
    ContentFilter,
}

/// Token accounting in the OpenAI shape.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ChatUsage {
    /// Tokens in the prompt.
    pub prompt_tokens: u64,

    /// Tokens in the completion.
    pub completion_tokens: u64,

    /// Prompt plus completion.
    pub total_tokens: u64,
}

/// Error envelope in the OpenAI shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiErrorResponse {
    /// Error details.
    pub error: OpenAiErrorDetails,
}

/// Error details in the OpenAI shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiErrorDetails {
    /// Human-readable message.
    pub message: String,

    /// Machine-readable error type.
    pub r#type: String,

    /// Optional error code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl OpenAiErrorResponse {
    /// Build an error envelope.
    pub fn new(error_type: impl Into<String>, message: impl Into<String>, code: Option<&str>) -> Self {
        Self {
            error: OpenAiErrorDetails {
                message: message.into(),
                r#type: error_type.into(),
                code: code.map(str::to_string),
            },
        }
    }
}

/// Model descriptor for the listing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    /// Identifier to use in requests.
    pub id: String,

    /// Always `model`.
    pub object: String,

    /// Unix timestamp of model creation, 0 when unknown.
    pub created: u64,

    /// Organization providing the model.
    pub owned_by: String,
}

/// Response of the model listing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    /// Always `list`.
    pub object: String,

    /// Available models.
    pub data: Vec<Model>,
}

/// A streaming chunk in the `chat.completion.chunk` shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    /// Chunk identifier, shared across the stream.
    pub id: String,

    /// Always `chat.completion.chunk`.
    pub object: String,

    /// Unix timestamp of creation.
    pub created: u64,

    /// Model producing the stream.
    pub model: String,

    /// Incremental choice updates.
    pub choices: Vec<ChunkChoice>,

    /// Final usage, present only on the terminating chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<ChatUsage>,
}

/// Incremental update for one choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    /// Choice index.
    pub index: u32,

    /// Content to append.
    pub delta: ChunkDelta,

    /// Set only on the terminating chunk.
    pub finish_reason: Option<FinishReason>,
}

/// Delta payload of a streaming chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkDelta {
    /// Role, present on the first chunk only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<ChatRole>,

    /// Text to append.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    /// Tool call updates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ChunkToolCall>>,
}

/// Tool call fragment in a streaming chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkToolCall {
    /// Position in the tool_calls array.
    pub index: u32,

    /// Call id, present when the call starts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Always `function` when present.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,

    /// Function name and argument fragment.
    pub function: ChunkFunction,
}

/// Function fragment in a streaming tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkFunction {
    /// Function name, present when the call starts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Argument fragment to append.
    pub arguments: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_accepts_flat_and_part_content() {
        let request: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "gpt-4",
            "messages": [
                {"role": "system", "content": "Be terse."},
                {"role": "user", "content": [{"type": "text", "text": "Hi"}]}
            ],
            "max_completion_tokens": 10
        }))
        .unwrap();

        assert_eq!(request.max_completion_tokens, Some(10));
        assert_eq!(request.messages[0].content.as_ref().unwrap().joined_text(), "Be terse.");
        assert_eq!(request.messages[1].content.as_ref().unwrap().joined_text(), "Hi");
    }

    #[test]
    fn stop_accepts_string_and_list() {
        let one: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "Hi"}],
            "stop": "END"
        }))
        .unwrap();
        assert_eq!(one.stop.unwrap().to_vec(), vec!["END"]);

        let many: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "Hi"}],
            "stop": ["END", "\n\n"]
        }))
        .unwrap();
        assert_eq!(many.stop.unwrap().to_vec(), vec!["END", "\n\n"]);
    }

    #[test]
    fn chunk_serializes_finish_reason_null_until_terminal() {
        let chunk = ChatCompletionChunk {
            id: "resp_1".to_string(),
            object: "chat.completion.chunk".to_string(),
            created: 1_700_000_000,
            model: "gpt-4".to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    role: None,
                    content: Some("Hel".to_string()),
                    tool_calls: None,
                },
                finish_reason: None,
            }],
            usage: None,
        };

        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["object"], "chat.completion.chunk");
        assert_eq!(json["choices"][0]["delta"]["content"], "Hel");
        assert!(json["choices"][0]["finish_reason"].is_null());
        assert!(json.get("usage").is_none());
    }

    #[test]
    fn tool_role_message_deserializes() {
        let message: ChatMessage = serde_json::from_value(json!({
            "role": "tool",
            "content": "42",
            "tool_call_id": "call_9"
        }))
        .unwrap();

        assert_eq!(message.role, ChatRole::Tool);
        assert_eq!(message.tool_call_id.as_deref(), Some("call_9"));
    }
}
