//! Streaming SSE rewriter: a bounded state machine that never buffers the
//! full response and forwards each translated event as soon as it is
//! complete (spec §4.7, §9 "SSE rewriter as a streaming transducer").

use super::anthropic as a;
use super::openai as o;
use super::response::{finish_reason_to_stop_reason, stop_reason_to_finish_reason};
use std::collections::HashMap;

/// One parsed `event:`/`data:` frame off the wire, independent of dialect.
#[derive(Debug, Clone)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Accumulates raw bytes across network reads and yields complete frames,
/// so translators never have to reason about partial lines.
#[derive(Debug, Default)]
pub struct SseFrameReader {
    buf: String,
}

impl SseFrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.push_str(&String::from_utf8_lossy(chunk));
        let mut frames = Vec::new();

        while let Some(pos) = self.buf.find("\n\n") {
            let raw = self.buf[..pos].to_string();
            self.buf.drain(..pos + 2);

            let mut event = None;
            let mut data_lines = Vec::new();
            for line in raw.lines() {
                if let Some(rest) = line.strip_prefix("event:") {
                    event = Some(rest.trim().to_string());
                } else if let Some(rest) = line.strip_prefix("data:") {
                    data_lines.push(rest.trim().to_string());
                }
            }
            if data_lines.is_empty() {
                continue;
            }
            frames.push(SseFrame {
                event,
                data: data_lines.join("\n"),
            });
        }

        frames
    }
}

pub fn format_frame(event: Option<&str>, data: &str) -> String {
    match event {
        Some(e) => format!("event: {e}\ndata: {data}\n\n"),
        None => format!("data: {data}\n\n"),
    }
}

pub const DONE_SENTINEL: &str = "data: [DONE]\n\n";

/// Translates an Anthropic SSE stream into OpenAI `chat.completion.chunk` events.
#[derive(Debug, Default)]
pub struct AnthropicToOpenAiTranslator {
    message_id: String,
    model: String,
    tool_block_index: HashMap<u32, u32>, // content_block index -> OpenAI tool_calls array index
    next_tool_index: u32,
    usage: Option<(u64, u64)>,
    terminated: bool,
}

impl AnthropicToOpenAiTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Returns `(input_tokens, output_tokens)` observed so far, if any.
    pub fn usage(&self) -> Option<(u64, u64)> {
        self.usage
    }

    pub fn on_frame(&mut self, frame: &SseFrame) -> Vec<String> {
        let event: a::StreamEvent = match serde_json::from_str(&frame.data) {
            Ok(e) => e,
            Err(_) => {
                self.terminated = true;
                let envelope = o::ErrorEnvelope::new("upstream sent a malformed event", "api_error");
                let body = serde_json::to_string(&envelope).unwrap_or_default();
                return vec![format_frame(None, &body), DONE_SENTINEL.to_string()];
            }
        };

        match event {
            a::StreamEvent::MessageStart { message } => {
                self.message_id = message.id.clone();
                self.model = message.model.clone();
                self.usage = Some((message.usage.input_tokens, message.usage.output_tokens));
                vec![self.chunk_frame(Some("assistant".to_string()), None, None, None)]
            }
            a::StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                a::ContentBlock::ToolUse { id, name, .. } => {
                    let tool_index = self.next_tool_index;
                    self.next_tool_index += 1;
                    self.tool_block_index.insert(index, tool_index);
                    let delta = o::ToolCallDelta {
                        index: tool_index,
                        id: Some(id),
                        kind: Some("function".to_string()),
                        function: Some(o::FunctionCallDelta {
                            name: Some(name),
                            arguments: Some(String::new()),
                        }),
                    };
                    vec![self.chunk_frame(None, None, Some(vec![delta]), None)]
                }
                _ => Vec::new(),
            },
            a::StreamEvent::ContentBlockDelta { index, delta } => match delta {
                a::ContentDelta::TextDelta { text } => {
                    vec![self.chunk_frame(None, Some(text), None, None)]
                }
                a::ContentDelta::InputJsonDelta { partial_json } => {
                    let Some(&tool_index) = self.tool_block_index.get(&index) else {
                        return Vec::new();
                    };
                    let delta = o::ToolCallDelta {
                        index: tool_index,
                        id: None,
                        kind: None,
                        function: Some(o::FunctionCallDelta {
                            name: None,
                            arguments: Some(partial_json),
                        }),
                    };
                    vec![self.chunk_frame(None, None, Some(vec![delta]), None)]
                }
            },
            a::StreamEvent::ContentBlockStop { .. } => Vec::new(),
            a::StreamEvent::MessageDelta { delta, usage } => {
                if let Some(u) = usage {
                    self.usage = Some((u.input_tokens, u.output_tokens));
                }
                let finish_reason = delta
                    .stop_reason
                    .as_deref()
                    .map(stop_reason_to_finish_reason)
                    .unwrap_or("stop");
                vec![self.chunk_frame(None, None, None, Some(finish_reason.to_string()))]
            }
            a::StreamEvent::MessageStop => {
                self.terminated = true;
                vec![DONE_SENTINEL.to_string()]
            }
            a::StreamEvent::Ping => Vec::new(),
            a::StreamEvent::Error { error } => {
                self.terminated = true;
                let envelope = o::ErrorEnvelope::new(error.message, error.kind);
                let body = serde_json::to_string(&envelope).unwrap_or_default();
                vec![format_frame(None, &body), DONE_SENTINEL.to_string()]
            }
        }
    }

    fn chunk_frame(
        &self,
        role: Option<String>,
        content: Option<String>,
        tool_calls: Option<Vec<o::ToolCallDelta>>,
        finish_reason: Option<String>,
    ) -> String {
        let chunk = o::ChatCompletionChunk {
            id: self.message_id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: 0,
            model: self.model.clone(),
            choices: vec![o::ChunkChoice {
                index: 0,
                delta: o::Delta {
                    role,
                    content,
                    tool_calls,
                },
                finish_reason,
            }],
            usage: None,
        };
        format_frame(None, &serde_json::to_string(&chunk).unwrap_or_default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    None,
    Text(u32),
    Tool(u32),
}

/// Translates an OpenAI SSE stream into Anthropic `message_*`/`content_block_*` events.
#[derive(Debug)]
pub struct OpenAiToAnthropicTranslator {
    message_id: String,
    model: String,
    started: bool,
    open_block: OpenBlock,
    next_block_index: u32,
    tool_index_by_delta: HashMap<u32, u32>,
    finish_reason: Option<String>,
    usage: Option<(u64, u64)>,
    terminated: bool,
}

impl Default for OpenAiToAnthropicTranslator {
    fn default() -> Self {
        Self {
            message_id: String::new(),
            model: String::new(),
            started: false,
            open_block: OpenBlock::None,
            next_block_index: 0,
            tool_index_by_delta: HashMap::new(),
            finish_reason: None,
            usage: None,
            terminated: false,
        }
    }
}

impl OpenAiToAnthropicTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn usage(&self) -> Option<(u64, u64)> {
        self.usage
    }

    pub fn on_frame(&mut self, frame: &SseFrame) -> Vec<String> {
        if frame.data.trim() == "[DONE]" {
            return self.finish();
        }

        let chunk: o::ChatCompletionChunk = match serde_json::from_str(&frame.data) {
            Ok(c) => c,
            Err(_) => {
                self.terminated = true;
                let envelope = a::ErrorEnvelope::new("upstream sent a malformed event", "api_error");
                let body = serde_json::to_string(&envelope).unwrap_or_default();
                return vec![
                    format_frame(Some("error"), &body),
                ];
            }
        };

        let mut out = Vec::new();
        if !self.started {
            self.message_id = chunk.id.clone();
            self.model = chunk.model.clone();
            self.started = true;
            out.push(self.message_start_frame());
        }

        if let Some(usage) = &chunk.usage {
            self.usage = Some((usage.prompt_tokens, usage.completion_tokens));
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return out;
        };

        if let Some(text) = choice.delta.content {
            if !matches!(self.open_block, OpenBlock::Text(_)) {
                if let OpenBlock::Tool(idx) = self.open_block {
                    out.push(self.block_stop_frame(idx));
                }
                let idx = self.next_block_index;
                self.next_block_index += 1;
                self.open_block = OpenBlock::Text(idx);
                out.push(self.block_start_frame(idx, a::ContentBlock::Text { text: String::new() }));
            }
            if let OpenBlock::Text(idx) = self.open_block {
                out.push(self.text_delta_frame(idx, &text));
            }
        }

        for tool_delta in choice.delta.tool_calls.into_iter().flatten() {
            if let Some(id) = &tool_delta.id {
                if let OpenBlock::Text(idx) = self.open_block {
                    out.push(self.block_stop_frame(idx));
                }
                let idx = self.next_block_index;
                self.next_block_index += 1;
                self.tool_index_by_delta.insert(tool_delta.index, idx);
                self.open_block = OpenBlock::Tool(idx);
                out.push(self.block_start_frame(
                    idx,
                    a::ContentBlock::ToolUse {
                        id: id.clone(),
                        name: tool_delta
                            .function
                            .as_ref()
                            .and_then(|f| f.name.clone())
                            .unwrap_or_default(),
                        input: serde_json::json!({}),
                    },
                ));
            }
            if let Some(args) = tool_delta.function.as_ref().and_then(|f| f.arguments.clone()) {
                if let Some(&idx) = self.tool_index_by_delta.get(&tool_delta.index) {
                    out.push(self.json_delta_frame(idx, &args));
                }
            }
        }

        if let Some(reason) = choice.finish_reason {
            self.finish_reason = Some(reason);
        }

        out
    }

    fn finish(&mut self) -> Vec<String> {
        self.terminated = true;
        let mut out = Vec::new();
        match self.open_block {
            OpenBlock::Text(idx) | OpenBlock::Tool(idx) => out.push(self.block_stop_frame(idx)),
            OpenBlock::None => {}
        }
        let stop_reason = self
            .finish_reason
            .as_deref()
            .map(finish_reason_to_stop_reason)
            .unwrap_or("end_turn")
            .to_string();
        let usage = self.usage.map(|(i, o)| a::Usage {
            input_tokens: i,
            output_tokens: o,
        });
        let event = a::StreamEvent::MessageDelta {
            delta: a::MessageDeltaPayload {
                stop_reason: Some(stop_reason),
                stop_sequence: None,
            },
            usage,
        };
        out.push(format_frame(
            Some("message_delta"),
            &serde_json::to_string(&event).unwrap_or_default(),
        ));
        out.push(format_frame(Some("message_stop"), "{\"type\":\"message_stop\"}"));
        out
    }

    fn message_start_frame(&self) -> String {
        let event = a::StreamEvent::MessageStart {
            message: a::MessageStartPayload {
                id: self.message_id.clone(),
                kind: "message".to_string(),
                role: "assistant".to_string(),
                content: Vec::new(),
                model: self.model.clone(),
                stop_reason: None,
                usage: a::Usage::default(),
            },
        };
        format_frame(
            Some("message_start"),
            &serde_json::to_string(&event).unwrap_or_default(),
        )
    }

    fn block_start_frame(&self, index: u32, content_block: a::ContentBlock) -> String {
        let event = a::StreamEvent::ContentBlockStart {
            index,
            content_block,
        };
        format_frame(
            Some("content_block_start"),
            &serde_json::to_string(&event).unwrap_or_default(),
        )
    }

    fn text_delta_frame(&self, index: u32, text: &str) -> String {
        let event = a::StreamEvent::ContentBlockDelta {
            index,
            delta: a::ContentDelta::TextDelta {
                text: text.to_string(),
            },
        };
        format_frame(
            Some("content_block_delta"),
            &serde_json::to_string(&event).unwrap_or_default(),
        )
    }

    fn json_delta_frame(&self, index: u32, partial_json: &str) -> String {
        let event = a::StreamEvent::ContentBlockDelta {
            index,
            delta: a::ContentDelta::InputJsonDelta {
                partial_json: partial_json.to_string(),
            },
        };
        format_frame(
            Some("content_block_delta"),
            &serde_json::to_string(&event).unwrap_or_default(),
        )
    }

    fn block_stop_frame(&self, index: u32) -> String {
        let event = a::StreamEvent::ContentBlockStop { index };
        format_frame(
            Some("content_block_stop"),
            &serde_json::to_string(&event).unwrap_or_default(),
        )
    }
}
