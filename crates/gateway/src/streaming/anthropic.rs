//! Upstream event stream to Anthropic wire events.
//!
//! Event order on the wire: `message_start`, one `content_block_start`
//! per block, `content_block_delta`s, `content_block_stop`, and a final
//! `message_stop` carrying the stop reason and usage.

use crate::messages::{
    anthropic::{
        AnthropicContent, AnthropicContentDelta, AnthropicRole, AnthropicStopReason, AnthropicStreamEvent,
        AnthropicStreamMessageStart, AnthropicUsage,
    },
    unified::{OutputItem, ResponsesResponse, ResponsesStreamEvent},
    unified::to_anthropic::parse_arguments,
};

use super::visible_output_tokens;

/// Stateful translator for one Claude-dialect stream.
pub struct AnthropicStreamAdapter {
    stream_id: String,
    model: String,
    include_reasoning_in_output: bool,
    started: bool,
    text_block_open: bool,
    next_block_index: u32,
    saw_tool_call: bool,
    finished: bool,
}

impl AnthropicStreamAdapter {
    /// Build an adapter for one response stream.
    pub fn new(stream_id: String, model: String, include_reasoning_in_output: bool) -> Self {
        Self {
            stream_id,
            model,
            include_reasoning_in_output,
            started: false,
            text_block_open: false,
            next_block_index: 0,
            saw_tool_call: false,
            finished: false,
        }
    }

    /// Translate one upstream event into zero or more wire events.
    pub fn on_event(&mut self, event: ResponsesStreamEvent) -> Vec<AnthropicStreamEvent> {
        let mut out = Vec::new();

        match event {
            ResponsesStreamEvent::OutputTextDelta { delta } => {
                self.ensure_started(&mut out);

                if !self.text_block_open {
                    out.push(AnthropicStreamEvent::ContentBlockStart {
                        index: self.next_block_index,
                        content_block: AnthropicContent::Text { text: String::new() },
                    });
                    self.text_block_open = true;
                }

                out.push(AnthropicStreamEvent::ContentBlockDelta {
                    index: self.next_block_index,
                    delta: AnthropicContentDelta::TextDelta { text: delta },
                });
            }

            // Deliberation is consumed, never forwarded; the client sees a
            // keep-alive in its place.
            ResponsesStreamEvent::ReasoningTextDelta { .. } | ResponsesStreamEvent::ReasoningSummaryDelta { .. } => {
                self.ensure_started(&mut out);
                out.push(AnthropicStreamEvent::Ping);
            }

            ResponsesStreamEvent::OutputItemDone { item } => {
                if let OutputItem::FunctionCall { call_id, name, arguments, .. } = item {
                    self.ensure_started(&mut out);
                    self.close_text_block(&mut out);
                    self.saw_tool_call = true;

                    let index = self.next_block_index;
                    out.push(AnthropicStreamEvent::ContentBlockStart {
                        index,
                        content_block: AnthropicContent::ToolUse {
                            id: call_id,
                            name,
                            input: serde_json::json!({}),
                        },
                    });
                    out.push(AnthropicStreamEvent::ContentBlockDelta {
                        index,
                        delta: AnthropicContentDelta::InputJsonDelta {
                            partial_json: serde_json::to_string(&parse_arguments(&arguments))
                                .unwrap_or_else(|_| "{}".to_string()),
                        },
                    });
                    out.push(AnthropicStreamEvent::ContentBlockStop { index });
                    self.next_block_index += 1;
                }
            }

            ResponsesStreamEvent::Completed { response } | ResponsesStreamEvent::Incomplete { response } => {
                self.ensure_started(&mut out);
                self.close_text_block(&mut out);
                self.finished = true;

                out.push(self.message_stop(&response));
            }

            ResponsesStreamEvent::Failed { response } => {
                log::error!("upstream reported a failed response: {response}");
            }

            ResponsesStreamEvent::Unknown => {
                self.ensure_started(&mut out);
                out.push(AnthropicStreamEvent::Ping);
            }
        }

        out
    }

    /// Wire events owed when the upstream closed without a completion
    /// marker; the stream is treated as truncated.
    pub fn finish(&mut self) -> Vec<AnthropicStreamEvent> {
        if self.finished {
            return Vec::new();
        }

        let mut out = Vec::new();
        self.ensure_started(&mut out);
        self.close_text_block(&mut out);
        self.finished = true;

        out.push(AnthropicStreamEvent::MessageStop {
            stop_reason: Some(if self.saw_tool_call {
                AnthropicStopReason::ToolUse
            } else {
                AnthropicStopReason::MaxTokens
            }),
            usage: None,
        });

        out
    }

    fn message_stop(&self, response: &ResponsesResponse) -> AnthropicStreamEvent {
        let stop_reason = if self.saw_tool_call || super::envelope_has_tool_call(response) {
            AnthropicStopReason::ToolUse
        } else if response.is_truncated() {
            AnthropicStopReason::MaxTokens
        } else {
            AnthropicStopReason::EndTurn
        };

        AnthropicStreamEvent::MessageStop {
            stop_reason: Some(stop_reason),
            usage: Some(AnthropicUsage {
                input_tokens: response.usage.input_tokens,
                output_tokens: visible_output_tokens(&response.usage, self.include_reasoning_in_output),
            }),
        }
    }

    fn ensure_started(&mut self, out: &mut Vec<AnthropicStreamEvent>) {
        if self.started {
            return;
        }

        self.started = true;
        out.push(AnthropicStreamEvent::MessageStart {
            message: AnthropicStreamMessageStart {
                id: self.stream_id.clone(),
                r#type: "message".to_string(),
                role: AnthropicRole::Assistant,
                content: Vec::new(),
                model: self.model.clone(),
                usage: AnthropicUsage::default(),
            },
        });
    }

    fn close_text_block(&mut self, out: &mut Vec<AnthropicStreamEvent>) {
        if self.text_block_open {
            out.push(AnthropicStreamEvent::ContentBlockStop {
                index: self.next_block_index,
            });
            self.text_block_open = false;
            self.next_block_index += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn adapter() -> AnthropicStreamAdapter {
        AnthropicStreamAdapter::new("msg_test".to_string(), "claude-3-5-sonnet".to_string(), false)
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

    fn kinds(events: &[AnthropicStreamEvent]) -> Vec<&'static str> {
        events
            .iter()
            .map(|event| match event {
                AnthropicStreamEvent::MessageStart { .. } => "message_start",
                AnthropicStreamEvent::ContentBlockStart { .. } => "content_block_start",
                AnthropicStreamEvent::ContentBlockDelta { .. } => "content_block_delta",
                AnthropicStreamEvent::ContentBlockStop { .. } => "content_block_stop",
                AnthropicStreamEvent::MessageStop { .. } => "message_stop",
                AnthropicStreamEvent::Ping => "ping",
                AnthropicStreamEvent::Error { .. } => "error",
            })
            .collect()
    }

    #[test]
    fn text_stream_produces_the_specified_event_order() {
        let mut adapter = adapter();
        let mut events = Vec::new();

        events.extend(adapter.on_event(ResponsesStreamEvent::ReasoningTextDelta {
            delta: "thinking".to_string(),
        }));
        events.extend(adapter.on_event(text_delta("Hel")));
        events.extend(adapter.on_event(text_delta("lo")));
        events.extend(adapter.on_event(completed()));

        assert_eq!(
            kinds(&events),
            vec![
                "message_start",
                "ping",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_stop",
            ]
        );

        let AnthropicStreamEvent::MessageStop { stop_reason, usage } = events.last().unwrap() else {
            unreachable!("expected message stop");
        };
        assert_eq!(*stop_reason, Some(AnthropicStopReason::EndTurn));

        let usage = usage.unwrap();
        assert_eq!(usage.input_tokens, 3);
        assert_eq!(usage.output_tokens, 7, "reasoning tokens stay hidden");
    }

    #[test]
    fn reasoning_deltas_surface_only_as_pings() {
        let mut adapter = adapter();

        let events = adapter.on_event(ResponsesStreamEvent::ReasoningSummaryDelta {
            delta: "mulling".to_string(),
        });
        assert_eq!(kinds(&events), vec!["message_start", "ping"]);

        let events = adapter.on_event(ResponsesStreamEvent::ReasoningTextDelta {
            delta: "mulling more".to_string(),
        });
        assert_eq!(kinds(&events), vec!["ping"]);

        let events = adapter.on_event(ResponsesStreamEvent::Unknown);
        assert_eq!(kinds(&events), vec!["ping"]);
    }

    #[test]
    fn tool_calls_stream_as_their_own_blocks() {
        let mut adapter = adapter();
        let mut events = Vec::new();

        events.extend(adapter.on_event(text_delta("Checking.")));
        events.extend(adapter.on_event(ResponsesStreamEvent::OutputItemDone {
            item: serde_json::from_value(json!({
                "type": "function_call",
                "call_id": "tool_123",
                "name": "get_weather",
                "arguments": "{\"location\":\"Paris\"}"
            }))
            .unwrap(),
        }));
        events.extend(adapter.on_event(completed()));

        assert_eq!(
            kinds(&events),
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_stop",
            ]
        );

        let AnthropicStreamEvent::ContentBlockStart { content_block, index } = &events[4] else {
            unreachable!("expected tool block start");
        };
        assert_eq!(*index, 1);
        let AnthropicContent::ToolUse { id, .. } = content_block else {
            unreachable!("expected tool use block");
        };
        assert_eq!(id, "tool_123");

        let AnthropicStreamEvent::MessageStop { stop_reason, .. } = events.last().unwrap() else {
            unreachable!("expected message stop");
        };
        assert_eq!(*stop_reason, Some(AnthropicStopReason::ToolUse));
    }

    #[test]
    fn missing_completion_marker_is_truncation() {
        let mut adapter = adapter();

        let _ = adapter.on_event(text_delta("partial"));
        let events = adapter.finish();

        let AnthropicStreamEvent::MessageStop { stop_reason, .. } = events.last().unwrap() else {
            unreachable!("expected message stop");
        };
        assert_eq!(*stop_reason, Some(AnthropicStopReason::MaxTokens));

        assert!(adapter.finish().is_empty(), "finish is idempotent");
    }
}
