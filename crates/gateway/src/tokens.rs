//! Input token estimation.
//!
//! Counts are estimates for reasoning analysis, fallback usage accounting
//! and audit records; the upstream's own usage numbers are authoritative
//! for anything client-visible.

use std::sync::LazyLock;

use tiktoken_rs::CoreBPE;

use crate::messages::unified::{InputContent, InputItem};

/// Tokenizers take a moment to build, so the encoder is created once and
/// shared. Loading failure degrades to a bytes-per-token approximation.
static BPE: LazyLock<Option<CoreBPE>> = LazyLock::new(|| match tiktoken_rs::o200k_base() {
    Ok(bpe) => Some(bpe),
    Err(e) => {
        log::warn!("failed to load tokenizer, falling back to approximation: {e}");
        None
    }
});

/// Estimate the token count of a single text.
pub fn estimate_text(text: &str) -> u64 {
    match BPE.as_ref() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len() as u64,
        None => text.len().div_ceil(4) as u64,
    }
}

/// Estimate the input tokens of a normalized request.
///
/// Every message carries a small framing overhead on top of its text.
pub fn estimate_input(instructions: Option<&str>, input: &[InputItem]) -> u64 {
    const TOKENS_PER_ITEM: u64 = 3;

    let mut total = instructions.map(estimate_text).unwrap_or(0);

    for item in input {
        total += TOKENS_PER_ITEM;

        match item {
            InputItem::Message { content, .. } => {
                for part in content {
                    match part {
                        InputContent::InputText { text } | InputContent::OutputText { text } => {
                            total += estimate_text(text);
                        }
                        InputContent::InputImage { .. } => total += 85,
                    }
                }
            }
            InputItem::FunctionCall { name, arguments, .. } => {
                total += estimate_text(name) + estimate_text(arguments);
            }
            InputItem::FunctionCallOutput { output, .. } => {
                total += estimate_text(output);
            }
        }
    }

    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_estimates_zero() {
        assert_eq!(estimate_text(""), 0);
    }

    #[test]
    fn longer_text_estimates_more_tokens() {
        let short = estimate_text("Hello");
        let long = estimate_text("Hello there, this is a considerably longer piece of text to count.");

        assert!(short >= 1);
        assert!(long > short);
    }

    #[test]
    fn request_estimate_includes_framing_overhead() {
        let input = vec![InputItem::Message {
            role: "user".to_string(),
            content: vec![InputContent::InputText {
                text: "Hi".to_string(),
            }],
        }];

        let estimate = estimate_input(None, &input);
        assert!(estimate >= 4, "expected framing overhead, got {estimate}");
    }
}
