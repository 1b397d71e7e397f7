//! Wire types for the Anthropic Messages dialect.
//!
//! Requests in this dialect carry content either as a flat string or as an
//! array of typed blocks, a separate top-level `system` field, and tool
//! declarations with an `input_schema`. Responses always use block arrays.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body for the `/v1/messages` shape.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnthropicChatRequest {
    /// The model to answer with.
    pub model: String,

    /// Conversation turns, alternating user and assistant.
    pub messages: Vec<AnthropicMessage>,

    /// Maximum number of tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,

    /// System prompt, kept separate from the messages array.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// Randomness control, 0.0 to 1.0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Nucleus sampling cutoff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    /// Only sample from the top K tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    /// Sequences that stop generation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    /// Whether to stream the response as Server-Sent Events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,

    /// Request metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AnthropicMetadata>,

    /// Tools the model may call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<AnthropicTool>>,
}

/// A single conversation turn.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnthropicMessage {
    /// Sender of this turn.
    pub role: AnthropicRole,

    /// Flat string or typed block list.
    pub content: AnthropicMessageContent,
}

/// Message sender role.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnthropicRole {
    /// End-user input.
    User,
    /// Model output.
    Assistant,
}

/// Content of a turn: either a bare string or an array of blocks.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum AnthropicMessageContent {
    /// Plain text shorthand.
    Text(String),
    /// Typed content blocks.
    Blocks(Vec<AnthropicContent>),
}

impl AnthropicMessageContent {
    /// Iterate the text of every text block (a flat string counts as one).
    pub fn text_parts(&self) -> Vec<&str> {
        match self {
            AnthropicMessageContent::Text(text) => vec![text.as_str()],
            AnthropicMessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    AnthropicContent::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }
}

/// A typed content block.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicContent {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },

    /// Image content. The source is forwarded opaquely.
    Image {
        /// Image source object, passed through untouched.
        source: Value,
    },

    /// Tool invocation requested by the assistant.
    ToolUse {
        /// Identifier correlating this call with its result.
        id: String,
        /// Name of the tool.
        name: String,
        /// Tool arguments.
        input: Value,
    },

    /// Result of a tool invocation.
    ToolResult {
        /// The `tool_use` id this result answers.
        tool_use_id: String,
        /// Result payload.
        content: AnthropicToolResultContent,
        /// Whether the tool failed.
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

/// Payload of a tool result: a bare string or nested text blocks.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum AnthropicToolResultContent {
    /// Single string payload.
    Text(String),
    /// Structured payload blocks.
    Blocks(Vec<AnthropicToolResultBlock>),
}

/// One block inside a structured tool result.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicToolResultBlock {
    /// Text payload.
    Text {
        /// The text content.
        text: String,
    },
}

/// Request metadata.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnthropicMetadata {
    /// Opaque end-user identifier for abuse tracking.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Tool declaration: name, description, and a JSON Schema for the input.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnthropicTool {
    /// Tool name.
    pub name: String,

    /// What the tool does.
    #[serde(default)]
    pub description: String,

    /// JSON Schema describing the tool input.
    pub input_schema: Value,
}

/// Response body for the `/v1/messages` shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicChatResponse {
    /// Response identifier, preserved from the upstream.
    pub id: String,

    /// Always `message`.
    pub r#type: String,

    /// Always `assistant`.
    pub role: AnthropicRole,

    /// Response content blocks.
    pub content: Vec<AnthropicContent>,

    /// Model that produced the response.
    pub model: String,

    /// Why generation stopped.
    pub stop_reason: Option<AnthropicStopReason>,

    /// Stop sequence that fired, if any.
    pub stop_sequence: Option<String>,

    /// Token accounting.
    pub usage: AnthropicUsage,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum AnthropicStopReason {
    /// Natural end of the assistant turn.
    EndTurn,
    /// Token limit reached; output may be truncated.
    MaxTokens,
    /// A configured stop sequence fired.
    StopSequence,
    /// The model invoked a tool.
    ToolUse,
}

impl fmt::Display for AnthropicStopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnthropicStopReason::EndTurn => write!(f, "end_turn"),
            AnthropicStopReason::MaxTokens => write!(f, "max_tokens"),
            AnthropicStopReason::StopSequence => write!(f, "stop_sequence"),
            AnthropicStopReason::ToolUse => write!(f, "tool_use"),
        }
    }
}

/// Token accounting in the Anthropic shape.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AnthropicUsage {
    /// Tokens in the prompt.
    pub input_tokens: u64,

    /// Tokens in the completion.
    pub output_tokens: u64,
}

/// Error envelope in the Anthropic shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicErrorResponse {
    /// Always `error`.
    pub r#type: String,

    /// Error details.
    pub error: AnthropicErrorDetails,
}

/// Error details in the Anthropic shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicErrorDetails {
    /// Machine-readable error type.
    #[serde(rename = "type")]
    pub error_type: String,

    /// Human-readable message.
    pub message: String,
}

impl AnthropicErrorResponse {
    /// Build an error envelope.
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            r#type: "error".to_string(),
            error: AnthropicErrorDetails {
                error_type: error_type.into(),
                message: message.into(),
            },
        }
    }
}

/// Streaming event types for Anthropic SSE responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicStreamEvent {
    /// Start of a message.
    MessageStart {
        /// Initial message metadata.
        message: AnthropicStreamMessageStart,
    },

    /// A content block begins.
    ContentBlockStart {
        /// Index of the content block.
        index: u32,
        /// The block being opened.
        content_block: AnthropicContent,
    },

    /// Incremental content for an open block.
    ContentBlockDelta {
        /// Index of the content block.
        index: u32,
        /// The delta payload.
        delta: AnthropicContentDelta,
    },

    /// A content block is complete.
    ContentBlockStop {
        /// Index of the content block.
        index: u32,
    },

    /// End of the message stream, carrying final accounting.
    MessageStop {
        /// Why generation stopped.
        #[serde(skip_serializing_if = "Option::is_none")]
        stop_reason: Option<AnthropicStopReason>,
        /// Final token accounting.
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<AnthropicUsage>,
    },

    /// Keep-alive.
    Ping,

    /// Error event.
    Error {
        /// The error that occurred.
        error: AnthropicErrorDetails,
    },
}

/// Initial message metadata for streaming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicStreamMessageStart {
    /// Message identifier.
    pub id: String,

    /// Always `message`.
    pub r#type: String,

    /// Always `assistant`.
    pub role: AnthropicRole,

    /// Initially empty content array.
    pub content: Vec<AnthropicContent>,

    /// Model producing the stream.
    pub model: String,

    /// Usage known at stream start.
    pub usage: AnthropicUsage,
}

/// Delta payload for an open content block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicContentDelta {
    /// Additional text.
    TextDelta {
        /// Text to append.
        text: String,
    },

    /// Partial JSON for a tool input.
    InputJsonDelta {
        /// JSON fragment to append.
        partial_json: String,
    },
}
