//! Request validation and sanitization.
//!
//! Shape-checks the decoded body against the dialect's schema, strips
//! control characters from every text field, and rejects injection
//! patterns outright. The original decoded body is never mutated; a
//! normalized copy with unknown properties dropped is returned instead.

use std::{borrow::Cow, sync::LazyLock};

use regex::Regex;
use serde_json::Value;

use crate::{
    error::{GatewayError, Result},
    messages::{
        anthropic::{AnthropicChatRequest, AnthropicContent, AnthropicMessageContent, AnthropicToolResultContent},
        openai::{ChatCompletionRequest, ChatMessageContent},
    },
};

/// Upper bound on a single text field.
pub const MAX_TEXT_BYTES: usize = 8 * 1024 * 1024;

/// Upper bound on the requested completion size.
pub const MAX_OUTPUT_TOKENS: u64 = 131_072;

/// Upper bound on conversation turns.
pub const MAX_TURNS: usize = 100;

const MAX_MODEL_LEN: usize = 100;
const MAX_STOP_SEQUENCES: usize = 4;
const MAX_STOP_SEQUENCE_LEN: usize = 20;

static MODEL_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("valid regex"));

static TEMPLATE_DELIMITERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{[^}]*\}\}").expect("valid regex"));

static SCRIPT_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<script\b").expect("valid regex"));

static JAVASCRIPT_SCHEME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)javascript:").expect("valid regex"));

static DATA_URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)data:[^;,\s]*;base64").expect("valid regex"));

static EVENT_HANDLER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bon\w+\s*=").expect("valid regex"));

/// Validate and normalize a Claude-dialect request.
pub fn validate_claude(body: &Value) -> Result<AnthropicChatRequest> {
    reject_prompt_conflict(body)?;

    let mut request: AnthropicChatRequest = serde_json::from_value(body.clone())
        .map_err(|e| GatewayError::Validation(format!("malformed messages request: {e}")))?;

    check_model(&request.model)?;
    check_turn_count(request.messages.len())?;

    if let Some(max_tokens) = request.max_tokens {
        check_token_limit("max_tokens", max_tokens)?;
    }

    check_temperature(request.temperature)?;
    check_top_p(request.top_p)?;
    check_top_k(request.top_k)?;

    if let Some(stop) = &request.stop_sequences {
        check_stop_sequences(stop)?;
    }

    if let Some(system) = request.system.take() {
        request.system = Some(clean_text(system)?);
    }

    for message in &mut request.messages {
        match &mut message.content {
            AnthropicMessageContent::Text(text) => {
                *text = clean_text(std::mem::take(text))?;
            }
            AnthropicMessageContent::Blocks(blocks) => {
                for block in blocks {
                    clean_claude_block(block)?;
                }
            }
        }
    }

    if let Some(tools) = &request.tools {
        for tool in tools {
            if tool.name.is_empty() {
                return Err(GatewayError::Validation("tool name must not be empty".into()));
            }
        }
    }

    Ok(request)
}

/// Validate and normalize an OpenAI-dialect request.
pub fn validate_openai(body: &Value) -> Result<ChatCompletionRequest> {
    reject_prompt_conflict(body)?;

    let mut request: ChatCompletionRequest = serde_json::from_value(body.clone())
        .map_err(|e| GatewayError::Validation(format!("malformed chat completions request: {e}")))?;

    check_model(&request.model)?;
    check_turn_count(request.messages.len())?;

    if let Some(max_tokens) = request.max_tokens {
        check_token_limit("max_tokens", max_tokens)?;
    }

    if let Some(max_completion_tokens) = request.max_completion_tokens {
        check_token_limit("max_completion_tokens", max_completion_tokens)?;
    }

    check_temperature(request.temperature)?;
    check_top_p(request.top_p)?;

    if let Some(stop) = &request.stop {
        check_stop_sequences(&stop.to_vec())?;
    }

    for message in &mut request.messages {
        if let Some(content) = &mut message.content {
            match content {
                ChatMessageContent::Text(text) => {
                    *text = clean_text(std::mem::take(text))?;
                }
                ChatMessageContent::Parts(parts) => {
                    for part in parts {
                        if let Some(text) = part.text.take() {
                            part.text = Some(clean_text(text)?);
                        }
                    }
                }
            }
        }
    }

    if let Some(tools) = &request.tools {
        for tool in tools {
            if tool.function.name.is_empty() {
                return Err(GatewayError::Validation("tool name must not be empty".into()));
            }
        }
    }

    Ok(request)
}

fn clean_claude_block(block: &mut AnthropicContent) -> Result<()> {
    match block {
        AnthropicContent::Text { text } => {
            *text = clean_text(std::mem::take(text))?;
        }
        AnthropicContent::ToolResult { content, .. } => match content {
            AnthropicToolResultContent::Text(text) => {
                *text = clean_text(std::mem::take(text))?;
            }
            AnthropicToolResultContent::Blocks(blocks) => {
                for block in blocks {
                    let crate::messages::anthropic::AnthropicToolResultBlock::Text { text } = block;
                    *text = clean_text(std::mem::take(text))?;
                }
            }
        },
        // Image sources are opaque; tool_use inputs are structured JSON.
        AnthropicContent::Image { .. } | AnthropicContent::ToolUse { .. } => {}
    }

    Ok(())
}

/// Strip control characters and reject injection patterns.
fn clean_text(text: String) -> Result<String> {
    if text.len() > MAX_TEXT_BYTES {
        return Err(GatewayError::Validation(format!(
            "text content exceeds {MAX_TEXT_BYTES} bytes"
        )));
    }

    let sanitized = strip_control_chars(&text);
    scan_for_injection(&sanitized)?;

    Ok(sanitized.into_owned())
}

/// Remove U+0000…U+0008, U+000B, U+000C, U+000E…U+001F and U+007F,
/// keeping tab, newline and carriage return.
fn strip_control_chars(text: &str) -> Cow<'_, str> {
    if !text.chars().any(is_stripped_control) {
        return Cow::Borrowed(text);
    }

    Cow::Owned(text.chars().filter(|c| !is_stripped_control(*c)).collect())
}

fn is_stripped_control(c: char) -> bool {
    matches!(c, '\u{0000}'..='\u{0008}' | '\u{000B}' | '\u{000C}' | '\u{000E}'..='\u{001F}' | '\u{007F}')
}

fn scan_for_injection(text: &str) -> Result<()> {
    let pattern = if TEMPLATE_DELIMITERS.is_match(text) {
        Some("template delimiters")
    } else if SCRIPT_TAG.is_match(text) {
        Some("script tag")
    } else if JAVASCRIPT_SCHEME.is_match(text) {
        Some("javascript url scheme")
    } else if DATA_URL.is_match(text) {
        Some("base64 data url")
    } else if EVENT_HANDLER.is_match(text) {
        Some("html event handler")
    } else {
        None
    };

    match pattern {
        Some(name) => Err(GatewayError::Security(format!(
            "text content contains a disallowed pattern: {name}"
        ))),
        None => Ok(()),
    }
}

fn reject_prompt_conflict(body: &Value) -> Result<()> {
    if body.get("prompt").is_some() && body.get("messages").is_some() {
        return Err(GatewayError::Validation(
            "request must not carry both 'prompt' and 'messages'".into(),
        ));
    }

    Ok(())
}

fn check_model(model: &str) -> Result<()> {
    if model.is_empty() {
        return Err(GatewayError::Validation("model must not be empty".into()));
    }

    if model.len() > MAX_MODEL_LEN {
        return Err(GatewayError::Validation(format!(
            "model exceeds {MAX_MODEL_LEN} characters"
        )));
    }

    if !MODEL_ID.is_match(model) {
        return Err(GatewayError::Validation(
            "model may only contain letters, digits, dots, underscores and dashes".into(),
        ));
    }

    Ok(())
}

fn check_turn_count(turns: usize) -> Result<()> {
    if turns == 0 {
        return Err(GatewayError::Validation("messages must not be empty".into()));
    }

    if turns > MAX_TURNS {
        return Err(GatewayError::Validation(format!(
            "conversation exceeds {MAX_TURNS} turns"
        )));
    }

    Ok(())
}

fn check_token_limit(field: &str, value: u64) -> Result<()> {
    if value == 0 || value > MAX_OUTPUT_TOKENS {
        return Err(GatewayError::Validation(format!(
            "{field} must be between 1 and {MAX_OUTPUT_TOKENS}"
        )));
    }

    Ok(())
}

fn check_temperature(temperature: Option<f64>) -> Result<()> {
    if let Some(t) = temperature
        && !(0.0..=2.0).contains(&t)
    {
        return Err(GatewayError::Validation("temperature must be between 0 and 2".into()));
    }

    Ok(())
}

fn check_top_p(top_p: Option<f64>) -> Result<()> {
    if let Some(p) = top_p
        && !(0.0..=1.0).contains(&p)
    {
        return Err(GatewayError::Validation("top_p must be between 0 and 1".into()));
    }

    Ok(())
}

fn check_top_k(top_k: Option<u32>) -> Result<()> {
    if let Some(k) = top_k
        && !(1..=100).contains(&k)
    {
        return Err(GatewayError::Validation("top_k must be between 1 and 100".into()));
    }

    Ok(())
}

fn check_stop_sequences(sequences: &[String]) -> Result<()> {
    if sequences.len() > MAX_STOP_SEQUENCES {
        return Err(GatewayError::Validation(format!(
            "at most {MAX_STOP_SEQUENCES} stop sequences are allowed"
        )));
    }

    for sequence in sequences {
        if sequence.len() > MAX_STOP_SEQUENCE_LEN {
            return Err(GatewayError::Validation(format!(
                "stop sequences may be at most {MAX_STOP_SEQUENCE_LEN} characters"
            )));
        }

        if sequence.chars().any(|c| c.is_control()) {
            return Err(GatewayError::Validation(
                "stop sequences must not contain control characters".into(),
            ));
        }
    }

    Ok(())
}
