//! Response mapping from the AWS Bedrock Converse API.

use aws_sdk_bedrockruntime::{
    operation::converse::ConverseOutput,
    types::{self, ContentBlock, StopReason, ToolResultContentBlock},
};
use aws_smithy_types::{Document, Number};
use serde_json::Value;

use crate::messages::unified::{
    IncompleteDetails, OutputContent, OutputItem, ResponseStatus, ResponsesResponse, ResponsesUsage,
};

/// Map a Converse reply onto the unified response shape.
pub(super) fn to_unified(output: ConverseOutput, model: &str) -> ResponsesResponse {
    let mut items = Vec::new();
    let mut text_parts: Vec<OutputContent> = Vec::new();

    if let Some(types::ConverseOutput::Message(message)) = output.output {
        for block in message.content {
            match block {
                ContentBlock::Text(text) => {
                    text_parts.push(OutputContent::OutputText { text });
                }
                ContentBlock::ToolUse(tool_use) => {
                    let arguments = serde_json::to_string(&document_to_serde(&tool_use.input))
                        .unwrap_or_else(|_| "{}".to_string());

                    items.push(OutputItem::FunctionCall {
                        id: None,
                        call_id: tool_use.tool_use_id,
                        name: tool_use.name,
                        arguments,
                    });
                }
                ContentBlock::ToolResult(result) => {
                    items.push(OutputItem::FunctionCallOutput {
                        call_id: result.tool_use_id.clone(),
                        output: tool_result_text(&result),
                    });
                }
                other => {
                    log::warn!("ignoring unexpected content block in backend response: {other:?}");
                }
            }
        }
    }

    if !text_parts.is_empty() {
        items.insert(
            0,
            OutputItem::Message {
                id: None,
                role: "assistant".to_string(),
                content: text_parts,
            },
        );
    }

    let truncated = matches!(output.stop_reason, StopReason::MaxTokens);

    let usage = output
        .usage
        .map(|usage| ResponsesUsage {
            input_tokens: usage.input_tokens.max(0) as u64,
            output_tokens: usage.output_tokens.max(0) as u64,
            output_tokens_details: Default::default(),
            total_tokens: usage.total_tokens.max(0) as u64,
        })
        .unwrap_or_default();

    ResponsesResponse {
        id: format!("resp_bedrock_{}", uuid::Uuid::new_v4().simple()),
        model: model.to_string(),
        status: if truncated {
            ResponseStatus::Incomplete
        } else {
            ResponseStatus::Completed
        },
        output: items,
        usage,
        incomplete_details: truncated.then(|| IncompleteDetails {
            reason: "max_output_tokens".to_string(),
        }),
    }
}

fn tool_result_text(result: &types::ToolResultBlock) -> String {
    let mut pieces = Vec::new();

    for item in result.content() {
        match item {
            ToolResultContentBlock::Text(text) => pieces.push(text.clone()),
            ToolResultContentBlock::Json(doc) => {
                pieces.push(serde_json::to_string(&document_to_serde(doc)).unwrap_or_default());
            }
            other => {
                log::debug!("ignoring non-text tool result content: {other:?}");
            }
        }
    }

    pieces.join("\n")
}

pub(super) fn document_to_serde(doc: &Document) -> Value {
    use serde_json::Number as JsonNumber;

    match doc {
        Document::Null => Value::Null,
        Document::Bool(b) => Value::Bool(*b),
        Document::Number(n) => match n {
            Number::PosInt(u) => Value::Number(JsonNumber::from(*u)),
            Number::NegInt(i) => Value::Number(JsonNumber::from(*i)),
            Number::Float(f) => JsonNumber::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        },
        Document::String(s) => Value::String(s.clone()),
        Document::Array(items) => Value::Array(items.iter().map(document_to_serde).collect()),
        Document::Object(entries) => Value::Object(
            entries
                .iter()
                .map(|(key, value)| (key.clone(), document_to_serde(value)))
                .collect(),
        ),
    }
}
