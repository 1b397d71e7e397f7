//! Request dialect detection.
//!
//! A pure function over the decoded request body. The path a request came
//! in on is not authoritative; only the body shape decides. The chosen
//! dialect is immutable for the rest of the request and drives both the
//! decoder and the response encoder.

use std::fmt;

use serde_json::Value;

/// The wire format of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Anthropic Messages shape.
    Claude,
    /// OpenAI Chat Completions shape.
    OpenAi,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Claude => write!(f, "claude"),
            Dialect::OpenAi => write!(f, "openai"),
        }
    }
}

/// Decide the dialect of a decoded request body.
///
/// Decision order:
///
/// 1. Any Claude indicator wins outright.
/// 2. Otherwise OpenAI indicators are consulted; strong ones
///    (`max_completion_tokens`, function-shaped tools, `response_format`)
///    are sufficient alone, the rest require a `messages` array.
/// 3. An unrecognizable body defaults to Claude, logged at warn level.
pub fn detect(body: &Value) -> Dialect {
    if has_claude_indicator(body) {
        return Dialect::Claude;
    }

    if has_openai_indicator(body) {
        return Dialect::OpenAi;
    }

    log::warn!("request body matched neither dialect, defaulting to claude");
    Dialect::Claude
}

fn has_claude_indicator(body: &Value) -> bool {
    if body.get("anthropic-version").is_some() || body.get("anthropic_version").is_some() {
        return true;
    }

    if body.get("system").is_some_and(Value::is_string) {
        return true;
    }

    // max_tokens without max_completion_tokens leans Claude.
    if body.get("max_tokens").is_some() && body.get("max_completion_tokens").is_none() {
        return true;
    }

    if let Some(tools) = body.get("tools").and_then(Value::as_array)
        && tools.iter().any(|tool| tool.get("input_schema").is_some())
    {
        return true;
    }

    if let Some(messages) = body.get("messages").and_then(Value::as_array) {
        let has_typed_blocks = messages.iter().any(|message| {
            message
                .get("content")
                .and_then(Value::as_array)
                .is_some_and(|blocks| {
                    blocks.iter().any(|block| {
                        matches!(
                            block.get("type").and_then(Value::as_str),
                            Some("text") | Some("image") | Some("tool_use") | Some("tool_result")
                        )
                    })
                })
        });

        if has_typed_blocks {
            return true;
        }
    }

    false
}

fn has_openai_indicator(body: &Value) -> bool {
    // Strong indicators are decisive without a messages array.
    if body.get("max_completion_tokens").is_some() {
        return true;
    }

    if let Some(tools) = body.get("tools").and_then(Value::as_array)
        && tools.iter().any(|tool| {
            tool.get("type").and_then(Value::as_str) == Some("function")
                && tool.get("function").is_some_and(|f| f.get("parameters").is_some())
        })
    {
        return true;
    }

    if let Some(format) = body.get("response_format")
        && matches!(
            format.get("type").and_then(Value::as_str),
            Some("text") | Some("json_object")
        )
    {
        return true;
    }

    // Weak indicators require a messages array.
    let Some(messages) = body.get("messages").and_then(Value::as_array) else {
        return false;
    };

    messages
        .iter()
        .any(|message| message.get("role").and_then(Value::as_str) == Some("tool"))
}
