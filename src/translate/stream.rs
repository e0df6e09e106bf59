//! Re-synthesis of Messages API stream events from chat-completion deltas.
//!
//! [`StreamTranslator`] owns a [`StreamState`] and turns each backend chunk
//! into zero or more [`MessageEvent`]s. Invariants kept at all times:
//!
//! - at most one content block is open;
//! - block indices start at 0 and grow by exactly one per close;
//! - every opened block is closed exactly once, error paths included.

use crate::api::types::{
    BlockDelta, ContentBlock, MessageDeltaBody, MessageEvent, MessagesResponse, StopReason, Usage,
};
use crate::llm::{ChatCompletion, ChatCompletionChunk, ChatUsage};
use serde_json::{json, Value};
use std::fmt::Display;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenBlock {
    None,
    Text,
    ToolUse,
}

/// Per-request translation state
#[derive(Debug)]
pub struct StreamState {
    /// Index the next opened block gets
    pub content_block_index: usize,
    pub open_block: OpenBlock,
    /// Raw argument fragments of the open tool block
    pub tool_arg_buffer: String,
    /// Closed blocks; `blocks[i]` was closed with index `i`
    pub blocks: Vec<ContentBlock>,
    current: Option<ContentBlock>,
    /// Upstream (index, id) of the call feeding the open tool block
    current_call: (Option<u32>, Option<String>),
    /// Last successful opportunistic parse of `tool_arg_buffer`
    preview_input: Option<Value>,
}

impl StreamState {
    fn new() -> Self {
        Self {
            content_block_index: 0,
            open_block: OpenBlock::None,
            tool_arg_buffer: String::new(),
            blocks: Vec::new(),
            current: None,
            current_call: (None, None),
            preview_input: None,
        }
    }

    /// Parse of the argument buffer at block close.
    ///
    /// Falls back to the last partial parse, then to an empty object.
    fn try_finalize(&mut self) -> Value {
        let raw = std::mem::take(&mut self.tool_arg_buffer);
        let preview = self.preview_input.take();

        if raw.trim().is_empty() {
            return json!({});
        }

        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Tool arguments did not parse at block close: {}", e);
                preview.unwrap_or_else(|| json!({}))
            }
        }
    }
}

pub struct StreamTranslator {
    message_id: String,
    model: String,
    state: StreamState,
    used_tool: bool,
    usage: Usage,
    started: bool,
    finished: bool,
}

impl StreamTranslator {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            message_id: new_message_id(),
            model: model.into(),
            state: StreamState::new(),
            used_tool: false,
            usage: Usage::default(),
            started: false,
            finished: false,
        }
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Emit `message_start`. Called implicitly by every other entry point.
    pub fn start(&mut self) -> Vec<MessageEvent> {
        let mut events = Vec::new();
        self.ensure_started(&mut events);
        events
    }

    /// Feed one backend chunk.
    pub fn push_chunk(&mut self, chunk: &ChatCompletionChunk) -> Vec<MessageEvent> {
        let mut events = Vec::new();
        self.ensure_started(&mut events);

        if let Some(usage) = chunk.usage {
            self.record_usage(usage);
        }

        for choice in &chunk.choices {
            let delta = &choice.delta;

            if let Some(text) = delta.content.as_deref() {
                self.text_fragment(text, &mut events);
            }

            for call in delta.tool_calls.iter().flatten() {
                let function = call.function.as_ref();
                self.tool_fragment(
                    call.index,
                    call.id.as_deref(),
                    function.and_then(|f| f.name.as_deref()),
                    function.and_then(|f| f.arguments.as_deref()),
                    &mut events,
                );
            }

            if let Some(function) = &delta.function_call {
                self.tool_fragment(
                    None,
                    None,
                    function.name.as_deref(),
                    function.arguments.as_deref(),
                    &mut events,
                );
            }
        }

        events
    }

    /// Feed a plain text fragment.
    pub fn push_text(&mut self, fragment: &str) -> Vec<MessageEvent> {
        let mut events = Vec::new();
        self.ensure_started(&mut events);
        self.text_fragment(fragment, &mut events);
        events
    }

    /// Surface an upstream failure as ordinary text output. The caller still
    /// finishes the stream normally afterwards.
    pub fn push_error(&mut self, error: &dyn Display) -> Vec<MessageEvent> {
        tracing::warn!("Upstream error mid-stream: {}", error);
        let mut events = Vec::new();
        self.ensure_started(&mut events);
        self.text_fragment(&format!("Error: {}", error), &mut events);
        events
    }

    /// Replay a complete (non-streaming) response as stream events, finish included.
    pub fn push_completion(&mut self, completion: &ChatCompletion) -> Vec<MessageEvent> {
        let mut events = Vec::new();
        self.ensure_started(&mut events);

        if let Some(usage) = completion.usage {
            self.record_usage(usage);
        }

        if let Some(choice) = completion.choices.first() {
            if let Some(text) = choice.message.content.as_deref() {
                self.text_fragment(text, &mut events);
            }
            for (i, call) in choice.message.tool_calls.iter().flatten().enumerate() {
                self.tool_fragment(
                    Some(i as u32),
                    Some(call.id.as_str()),
                    Some(call.function.name.as_str()),
                    Some(call.function.arguments.as_str()),
                    &mut events,
                );
            }
        }

        events.extend(self.finish());
        events
    }

    /// Close the open block and emit `message_delta` + `message_stop`.
    /// Calling it again is a no-op.
    pub fn finish(&mut self) -> Vec<MessageEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        self.ensure_started(&mut events);
        self.close_open_block(&mut events);

        let stop_reason = if self.used_tool {
            StopReason::ToolUse
        } else {
            StopReason::EndTurn
        };

        events.push(MessageEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason,
                stop_sequence: None,
                content: self.state.blocks.clone(),
            },
            usage: self.usage,
        });
        events.push(MessageEvent::MessageStop);
        self.finished = true;

        tracing::debug!(
            "Stream {} finished: {} blocks, stop_reason={:?}",
            self.message_id,
            self.state.blocks.len(),
            stop_reason
        );
        events
    }

    fn ensure_started(&mut self, events: &mut Vec<MessageEvent>) {
        if self.started {
            return;
        }
        self.started = true;
        events.push(MessageEvent::MessageStart {
            message: MessagesResponse::new(self.message_id.clone(), self.model.clone()),
        });
    }

    fn record_usage(&mut self, usage: ChatUsage) {
        self.usage = Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        };
    }

    fn text_fragment(&mut self, fragment: &str, events: &mut Vec<MessageEvent>) {
        if fragment.is_empty() {
            return;
        }

        if self.state.open_block == OpenBlock::ToolUse {
            self.close_open_block(events);
        }
        if self.state.open_block == OpenBlock::None {
            self.state.current = Some(ContentBlock::text(""));
            self.state.open_block = OpenBlock::Text;
            events.push(MessageEvent::ContentBlockStart {
                index: self.state.content_block_index,
                content_block: ContentBlock::text(""),
            });
        }

        if let Some(ContentBlock::Text { text }) = self.state.current.as_mut() {
            text.push_str(fragment);
        }
        events.push(MessageEvent::ContentBlockDelta {
            index: self.state.content_block_index,
            delta: BlockDelta::TextDelta {
                text: fragment.to_string(),
            },
        });
    }

    fn tool_fragment(
        &mut self,
        call_index: Option<u32>,
        call_id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
        events: &mut Vec<MessageEvent>,
    ) {
        // Some backends repeat `"id": ""` on continuation fragments.
        let call_id = call_id.filter(|id| !id.is_empty());

        let starts_new_call = match self.state.open_block {
            OpenBlock::ToolUse => {
                let (open_index, open_id) = &self.state.current_call;
                let new_id = call_id.is_some() && call_id != open_id.as_deref();
                let new_index = call_index.is_some() && call_index != *open_index;
                new_id || new_index
            }
            _ => true,
        };

        if starts_new_call {
            self.close_open_block(events);
            self.open_tool_block(call_index, call_id, name.unwrap_or_default(), events);
        } else if let Some(name) = name {
            // Continuation of a name split over several fragments
            if let Some(ContentBlock::ToolUse { name: current, .. }) = self.state.current.as_mut() {
                current.push_str(name);
            }
        }

        let Some(arguments) = arguments.filter(|a| !a.is_empty()) else {
            return;
        };

        self.state.tool_arg_buffer.push_str(arguments);
        events.push(MessageEvent::ContentBlockDelta {
            index: self.state.content_block_index,
            delta: BlockDelta::InputJsonDelta {
                partial_json: arguments.to_string(),
            },
        });

        // Preview only; the value recorded at close comes from try_finalize.
        if let Ok(value) = serde_json::from_str::<Value>(&self.state.tool_arg_buffer) {
            if let Some(ContentBlock::ToolUse { input, .. }) = self.state.current.as_mut() {
                *input = value.clone();
            }
            self.state.preview_input = Some(value);
        }
    }

    fn open_tool_block(
        &mut self,
        call_index: Option<u32>,
        call_id: Option<&str>,
        name: &str,
        events: &mut Vec<MessageEvent>,
    ) {
        let id = call_id
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(new_tool_id);

        let block = ContentBlock::ToolUse {
            id,
            name: name.to_string(),
            input: json!({}),
        };

        self.state.tool_arg_buffer.clear();
        self.state.preview_input = None;
        self.state.current_call = (call_index, call_id.map(str::to_string));
        self.state.current = Some(block.clone());
        self.state.open_block = OpenBlock::ToolUse;
        self.used_tool = true;

        events.push(MessageEvent::ContentBlockStart {
            index: self.state.content_block_index,
            content_block: block,
        });
    }

    fn close_open_block(&mut self, events: &mut Vec<MessageEvent>) {
        if self.state.open_block == OpenBlock::None {
            return;
        }

        let mut block = self.state.current.take().unwrap_or_else(|| ContentBlock::text(""));
        if let ContentBlock::ToolUse { input, .. } = &mut block {
            *input = self.state.try_finalize();
        }

        let index = self.state.content_block_index;
        self.state.blocks.push(block);
        self.state.open_block = OpenBlock::None;
        self.state.current_call = (None, None);
        self.state.content_block_index += 1;

        events.push(MessageEvent::ContentBlockStop { index });
    }
}

/// Map a complete chat-completion response to a Messages API response.
pub fn translate_completion(completion: &ChatCompletion, model: &str) -> MessagesResponse {
    let id = if completion.id.is_empty() {
        new_message_id()
    } else {
        format!("msg_{}", completion.id)
    };
    let mut response = MessagesResponse::new(id, model);

    if let Some(usage) = completion.usage {
        response.usage = Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        };
    }

    let Some(choice) = completion.choices.first() else {
        response.content.push(ContentBlock::text(""));
        response.stop_reason = Some(StopReason::EndTurn);
        return response;
    };

    let text = choice.message.content.clone().unwrap_or_default();
    let calls = choice.message.tool_calls.as_deref().unwrap_or_default();

    if calls.is_empty() {
        response.content.push(ContentBlock::Text { text });
        response.stop_reason = Some(StopReason::EndTurn);
        return response;
    }

    if !text.is_empty() {
        response.content.push(ContentBlock::Text { text });
    }
    for call in calls {
        let input = serde_json::from_str::<Value>(&call.function.arguments).unwrap_or_else(|_| json!({}));
        response.content.push(ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.function.name.clone(),
            input,
        });
    }
    response.stop_reason = Some(StopReason::ToolUse);
    response
}

fn new_message_id() -> String {
    format!("msg_{}", Uuid::new_v4().simple())
}

fn new_tool_id() -> String {
    format!("toolu_{}", Uuid::new_v4().simple())
}
