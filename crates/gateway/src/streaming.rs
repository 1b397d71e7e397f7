//! Streaming response translation.
//!
//! Adapters consume the finite, non-restartable upstream event sequence
//! and produce each dialect's wire events. Reasoning deltas are consumed
//! but never forwarded. A stream that ends without an explicit completion
//! marker is treated as truncated.

pub mod anthropic;
pub mod openai;

use crate::messages::unified::{ResponsesResponse, ResponsesUsage};

/// Client-visible output tokens under the configured usage policy.
pub(crate) fn visible_output_tokens(usage: &ResponsesUsage, include_reasoning: bool) -> u64 {
    if include_reasoning {
        usage.output_tokens
    } else {
        usage.visible_output_tokens()
    }
}

/// Whether a terminal response envelope reports a tool call.
pub(crate) fn envelope_has_tool_call(response: &ResponsesResponse) -> bool {
    response.has_tool_call()
}
