//! Request mapping onto the AWS Bedrock Converse API.

use aws_sdk_bedrockruntime::types::{
    ContentBlock, ConversationRole, InferenceConfiguration, Message as BedrockMessage, SystemContentBlock, Tool,
    ToolConfiguration, ToolInputSchema, ToolResultBlock, ToolResultContentBlock, ToolSpecification, ToolUseBlock,
};
use aws_smithy_types::{Document, Number};
use serde_json::Value;

use crate::{
    error::{GatewayError, Result},
    messages::unified::{InputContent, InputItem, ResponsesRequest},
};

/// Converse call parameters built from a unified request.
pub(super) struct ConversePayload {
    pub messages: Vec<BedrockMessage>,
    pub system: Option<Vec<SystemContentBlock>>,
    pub inference_config: Option<InferenceConfiguration>,
    pub tool_config: Option<ToolConfiguration>,
}

/// Map a unified request onto Converse call parameters.
///
/// Consecutive items with the same role are batched into one message;
/// Converse requires strict user/assistant alternation.
pub(super) fn build_payload(request: ResponsesRequest) -> Result<ConversePayload> {
    let system = request
        .instructions
        .map(|instructions| vec![SystemContentBlock::Text(instructions)]);

    let inference_config = build_inference_config(
        request.max_output_tokens,
        request.temperature,
        request.top_p,
        request.stop,
    );

    let tool_config = if request.tools.is_empty() {
        None
    } else {
        Some(build_tool_config(request.tools)?)
    };

    let mut messages = Vec::new();
    let mut current_role: Option<ConversationRole> = None;
    let mut current_blocks: Vec<ContentBlock> = Vec::new();

    for item in request.input {
        let (role, blocks) = item_to_blocks(item)?;

        if blocks.is_empty() {
            continue;
        }

        if current_role.as_ref().is_some_and(|prev| *prev != role) {
            flush_message(&mut messages, &mut current_role, &mut current_blocks)?;
        }

        current_role = Some(role);
        current_blocks.extend(blocks);
    }

    flush_message(&mut messages, &mut current_role, &mut current_blocks)?;

    Ok(ConversePayload {
        messages,
        system,
        inference_config,
        tool_config,
    })
}

fn flush_message(
    messages: &mut Vec<BedrockMessage>,
    role: &mut Option<ConversationRole>,
    blocks: &mut Vec<ContentBlock>,
) -> Result<()> {
    let Some(role) = role.take() else {
        return Ok(());
    };

    if blocks.is_empty() {
        return Ok(());
    }

    let message = BedrockMessage::builder()
        .role(role)
        .set_content(Some(std::mem::take(blocks)))
        .build()
        .map_err(|e| GatewayError::Transformation(format!("failed to build conversation message: {e}")))?;

    messages.push(message);

    Ok(())
}

fn item_to_blocks(item: InputItem) -> Result<(ConversationRole, Vec<ContentBlock>)> {
    match item {
        InputItem::Message { role, content } => {
            let conversation_role = if role == "assistant" {
                ConversationRole::Assistant
            } else {
                ConversationRole::User
            };

            let blocks = content
                .into_iter()
                .filter_map(|part| match part {
                    InputContent::InputText { text } | InputContent::OutputText { text } => {
                        Some(ContentBlock::Text(text))
                    }
                    InputContent::InputImage { .. } => {
                        log::warn!("dropping image content, not forwarded to this backend");
                        None
                    }
                })
                .collect();

            Ok((conversation_role, blocks))
        }
        InputItem::FunctionCall { call_id, name, arguments } => {
            let input: Value = serde_json::from_str(&arguments).unwrap_or(Value::Null);

            let tool_use = ToolUseBlock::builder()
                .tool_use_id(call_id)
                .name(name)
                .input(serde_to_document(input))
                .build()
                .map_err(|e| GatewayError::Transformation(format!("failed to build tool use block: {e}")))?;

            Ok((ConversationRole::Assistant, vec![ContentBlock::ToolUse(tool_use)]))
        }
        InputItem::FunctionCallOutput { call_id, output } => {
            let result = ToolResultBlock::builder()
                .tool_use_id(call_id)
                .content(ToolResultContentBlock::Text(output))
                .build()
                .map_err(|e| GatewayError::Transformation(format!("failed to build tool result block: {e}")))?;

            Ok((ConversationRole::User, vec![ContentBlock::ToolResult(result)]))
        }
    }
}

fn build_inference_config(
    max_tokens: Option<u64>,
    temperature: Option<f64>,
    top_p: Option<f64>,
    stop: Option<Vec<String>>,
) -> Option<InferenceConfiguration> {
    let mut builder = InferenceConfiguration::builder();
    let mut has_config = false;

    if let Some(max_tokens) = max_tokens {
        builder = builder.max_tokens(max_tokens.min(i32::MAX as u64) as i32);
        has_config = true;
    }

    if let Some(temperature) = temperature {
        builder = builder.temperature(temperature as f32);
        has_config = true;
    }

    if let Some(top_p) = top_p {
        builder = builder.top_p(top_p as f32);
        has_config = true;
    }

    if let Some(stop) = stop {
        builder = builder.set_stop_sequences(Some(stop));
        has_config = true;
    }

    has_config.then(|| builder.build())
}

fn build_tool_config(tools: Vec<crate::messages::unified::ResponsesTool>) -> Result<ToolConfiguration> {
    let mut specs = Vec::with_capacity(tools.len());

    for tool in tools {
        let spec = ToolSpecification::builder()
            .name(tool.name)
            .description(tool.description)
            .input_schema(ToolInputSchema::Json(serde_to_document(tool.parameters)))
            .build()
            .map_err(|e| GatewayError::Transformation(format!("failed to build tool specification: {e}")))?;

        specs.push(Tool::ToolSpec(spec));
    }

    ToolConfiguration::builder()
        .set_tools(Some(specs))
        .build()
        .map_err(|e| GatewayError::Transformation(format!("failed to build tool configuration: {e}")))
}

pub(super) fn serde_to_document(value: Value) -> Document {
    match value {
        Value::Null => Document::Null,
        Value::Bool(b) => Document::Bool(b),
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                Document::Number(Number::PosInt(u))
            } else if let Some(i) = n.as_i64() {
                Document::Number(Number::NegInt(i))
            } else {
                Document::Number(Number::Float(n.as_f64().unwrap_or(0.0)))
            }
        }
        Value::String(s) => Document::String(s),
        Value::Array(items) => Document::Array(items.into_iter().map(serde_to_document).collect()),
        Value::Object(entries) => Document::Object(
            entries
                .into_iter()
                .map(|(key, value)| (key, serde_to_document(value)))
                .collect(),
        ),
    }
}
