//! Upstream event stream to OpenAI `chat.completion.chunk` events.
//!
//! The `finish_reason` appears only on the terminating chunk; the
//! `data: [DONE]` sentinel is appended by the wire encoder.

use crate::messages::{
    openai::{ChatCompletionChunk, ChatRole, ChatUsage, ChunkChoice, ChunkDelta, ChunkFunction, ChunkToolCall, FinishReason},
    unified::{OutputItem, ResponsesResponse, ResponsesStreamEvent},
    unified::to_openai::unix_now,
};

use super::visible_output_tokens;

/// Stateful translator for one OpenAI-dialect stream.
pub struct OpenAiStreamAdapter {
    stream_id: String,
    model: String,
    created: u64,
    include_reasoning_in_output: bool,
    role_sent: bool,
    saw_tool_call: bool,
    next_tool_index: u32,
    finished: bool,
}

impl OpenAiStreamAdapter {
    /// Build an adapter for one response stream.
    pub fn new(stream_id: String, model: String, include_reasoning_in_output: bool) -> Self {
        Self {
            stream_id,
            model,
            created: unix_now(),
            include_reasoning_in_output,
            role_sent: false,
            saw_tool_call: false,
            next_tool_index: 0,
            finished: false,
        }
    }

    /// Translate one upstream event into zero or more chunks.
    pub fn on_event(&mut self, event: ResponsesStreamEvent) -> Vec<ChatCompletionChunk> {
        match event {
            ResponsesStreamEvent::OutputTextDelta { delta } => {
                let role = self.role_once();
                vec![self.chunk(
                    ChunkDelta {
                        role,
                        content: Some(delta),
                        tool_calls: None,
                    },
                    None,
                    None,
                )]
            }

            // Deliberation is consumed, never forwarded.
            ResponsesStreamEvent::ReasoningTextDelta { .. } | ResponsesStreamEvent::ReasoningSummaryDelta { .. } => {
                Vec::new()
            }

            ResponsesStreamEvent::OutputItemDone { item } => {
                let OutputItem::FunctionCall { call_id, name, arguments, .. } = item else {
                    return Vec::new();
                };

                self.saw_tool_call = true;
                let index = self.next_tool_index;
                self.next_tool_index += 1;
                let role = self.role_once();

                vec![self.chunk(
                    ChunkDelta {
                        role,
                        content: None,
                        tool_calls: Some(vec![ChunkToolCall {
                            index,
                            id: Some(call_id),
                            call_type: Some("function".to_string()),
                            function: ChunkFunction {
                                name: Some(name),
                                arguments,
                            },
                        }]),
                    },
                    None,
                    None,
                )]
            }

            ResponsesStreamEvent::Completed { response } | ResponsesStreamEvent::Incomplete { response } => {
                self.finished = true;
                vec![self.terminal_chunk(Some(&response))]
            }

            ResponsesStreamEvent::Failed { response } => {
                log::error!("upstream reported a failed response: {response}");
                Vec::new()
            }

            ResponsesStreamEvent::Unknown => Vec::new(),
        }
    }

    /// Terminal chunk owed when the upstream closed without a completion
    /// marker; the stream is treated as truncated.
    pub fn finish(&mut self) -> Vec<ChatCompletionChunk> {
        if self.finished {
            return Vec::new();
        }

        self.finished = true;
        vec![self.terminal_chunk(None)]
    }

    fn terminal_chunk(&mut self, response: Option<&ResponsesResponse>) -> ChatCompletionChunk {
        let finish_reason = match response {
            Some(response) if self.saw_tool_call || super::envelope_has_tool_call(response) => FinishReason::ToolCalls,
            Some(response) if response.is_truncated() => FinishReason::Length,
            Some(_) => FinishReason::Stop,
            None if self.saw_tool_call => FinishReason::ToolCalls,
            None => FinishReason::Length,
        };

        let usage = response.map(|response| {
            let completion = visible_output_tokens(&response.usage, self.include_reasoning_in_output);
            ChatUsage {
                prompt_tokens: response.usage.input_tokens,
                completion_tokens: completion,
                total_tokens: response.usage.input_tokens + completion,
            }
        });

        self.chunk(ChunkDelta::default(), Some(finish_reason), usage)
    }

    fn chunk(
        &self,
        delta: ChunkDelta,
        finish_reason: Option<FinishReason>,
        usage: Option<ChatUsage>,
    ) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.stream_id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage,
        }
    }

    fn role_once(&mut self) -> Option<ChatRole> {
        if self.role_sent {
            None
        } else {
            self.role_sent = true;
            Some(ChatRole::Assistant)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn adapter() -> OpenAiStreamAdapter {
        OpenAiStreamAdapter::new("resp_1".to_string(), "gpt-4".to_string(), false)
    }

    fn text_delta(text: &str) -> ResponsesStreamEvent {
        ResponsesStreamEvent::OutputTextDelta { delta: text.to_string() }
    }

    fn completed() -> ResponsesStreamEvent {
        ResponsesStreamEvent::Completed {
            response: serde_json::from_value(json!({
                "id": "resp_1",
                "model": "gpt-5",
                "status": "completed",
                "usage": {
                    "input_tokens": 3,
                    "output_tokens": 9,
                    "output_tokens_details": {"reasoning_tokens": 2},
                    "total_tokens": 12
                }
            }))
            .unwrap(),
        }
    }

    #[test]
    fn reasoning_deltas_produce_no_chunks_and_text_streams_through() {
        let mut adapter = adapter();
        let mut chunks = Vec::new();

        chunks.extend(adapter.on_event(ResponsesStreamEvent::ReasoningTextDelta {
            delta: "hmm".to_string(),
        }));
        chunks.extend(adapter.on_event(ResponsesStreamEvent::ReasoningTextDelta {
            delta: "hmm more".to_string(),
        }));
        chunks.extend(adapter.on_event(text_delta("Hel")));
        chunks.extend(adapter.on_event(text_delta("lo")));
        chunks.extend(adapter.on_event(completed()));

        assert_eq!(chunks.len(), 3, "two content chunks plus the terminal chunk");

        assert_eq!(chunks[0].choices[0].delta.content.as_deref(), Some("Hel"));
        assert_eq!(chunks[0].choices[0].delta.role, Some(ChatRole::Assistant));
        assert!(chunks[0].choices[0].finish_reason.is_none());

        assert_eq!(chunks[1].choices[0].delta.content.as_deref(), Some("lo"));
        assert_eq!(chunks[1].choices[0].delta.role, None);

        let terminal = &chunks[2];
        assert_eq!(terminal.choices[0].finish_reason, Some(FinishReason::Stop));
        assert!(terminal.choices[0].delta.content.is_none());

        let usage = terminal.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 3);
        assert_eq!(usage.completion_tokens, 7, "reasoning tokens stay hidden");
        assert_eq!(usage.total_tokens, 10);
    }

    #[test]
    fn tool_calls_emit_one_chunk_per_call() {
        let mut adapter = adapter();

        let chunks = adapter.on_event(ResponsesStreamEvent::OutputItemDone {
            item: serde_json::from_value(json!({
                "type": "function_call",
                "call_id": "call_7",
                "name": "search",
                "arguments": "{\"q\":\"rust\"}"
            }))
            .unwrap(),
        });

        assert_eq!(chunks.len(), 1);
        let calls = chunks[0].choices[0].delta.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id.as_deref(), Some("call_7"));
        assert_eq!(calls[0].function.name.as_deref(), Some("search"));

        let terminal = adapter.on_event(completed());
        assert_eq!(terminal[0].choices[0].finish_reason, Some(FinishReason::ToolCalls));
    }

    #[test]
    fn missing_completion_marker_maps_to_length() {
        let mut adapter = adapter();

        let _ = adapter.on_event(text_delta("partial"));
        let chunks = adapter.finish();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].choices[0].finish_reason, Some(FinishReason::Length));
        assert!(adapter.finish().is_empty(), "finish is idempotent");
    }
}
