use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use super::ChunkWriter;
use super::sse::{DONE, format_openai_error};
use crate::dispatch::inspect::status_for_error_type;
use crate::error::{GatewayError, Result};
use crate::models::claude::{
    ClaudeErrorBody, ClaudeResponse, ClaudeStreamEvent, ClaudeUsage, ContentBlock, Delta,
    ErrorInfo,
};
use crate::transform::map_stop_reason;
use crate::transform::openai_claude::{THINK_CLOSE, THINK_OPEN, chat_id, chat_usage};

/// Claude Messages SSE to OpenAI `chat.completion.chunk` frames.
///
/// Claude numbers content blocks across text, thinking and tool use, while
/// OpenAI numbers tool calls on their own; `tool_indices` keeps that mapping.
#[derive(Debug)]
pub struct ClaudeToOpenAiStream {
    writer: ChunkWriter,
    prompt_usage: ClaudeUsage,
    role_emitted: bool,
    finish_emitted: bool,
    done: bool,
    thinking_blocks: BTreeSet<u32>,
    tool_indices: BTreeMap<u32, u32>,
}

impl ClaudeToOpenAiStream {
    pub fn new(client_model: impl Into<String>) -> Self {
        Self {
            writer: ChunkWriter::new(client_model),
            prompt_usage: ClaudeUsage::default(),
            role_emitted: false,
            finish_emitted: false,
            done: false,
            thinking_blocks: BTreeSet::new(),
            tool_indices: BTreeMap::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    fn ensure_role(&mut self, out: &mut Vec<String>) {
        if !self.role_emitted {
            self.role_emitted = true;
            out.push(self.writer.role());
        }
    }

    pub fn on_event(&mut self, event: &ClaudeStreamEvent) -> Vec<String> {
        let mut out = Vec::new();
        if self.done {
            return out;
        }

        match event {
            ClaudeStreamEvent::MessageStart { message } => {
                self.writer.set_id(chat_id(&message.id));
                self.prompt_usage = message.usage;
                self.ensure_role(&mut out);
            }
            ClaudeStreamEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                self.ensure_role(&mut out);
                match content_block {
                    ContentBlock::Thinking { thinking, .. } => {
                        self.thinking_blocks.insert(*index);
                        out.push(self.writer.content(&format!("{}{}", THINK_OPEN, thinking)));
                    }
                    ContentBlock::Text { text } if !text.is_empty() => {
                        out.push(self.writer.content(text));
                    }
                    ContentBlock::ToolUse { id, name, .. } => {
                        let tool_index = self.tool_indices.len() as u32;
                        self.tool_indices.insert(*index, tool_index);
                        out.push(self.writer.tool_start(tool_index, id, name));
                    }
                    _ => {}
                }
            }
            ClaudeStreamEvent::ContentBlockDelta { index, delta } => match delta {
                Delta::TextDelta { text } | Delta::ThinkingDelta { thinking: text } => {
                    if !text.is_empty() {
                        out.push(self.writer.content(text));
                    }
                }
                Delta::InputJsonDelta { partial_json } => {
                    if let Some(&tool_index) = self.tool_indices.get(index)
                        && !partial_json.is_empty()
                    {
                        out.push(self.writer.tool_arguments(tool_index, partial_json));
                    }
                }
                Delta::SignatureDelta { .. } | Delta::Unknown => {}
            },
            ClaudeStreamEvent::ContentBlockStop { index } => {
                if self.thinking_blocks.remove(index) {
                    out.push(self.writer.content(THINK_CLOSE));
                }
            }
            ClaudeStreamEvent::MessageDelta { delta, usage } => {
                let mut total = self.prompt_usage;
                if let Some(usage) = usage {
                    merge_usage(&mut total, usage);
                }
                out.push(self.writer.finish(
                    map_stop_reason(delta.stop_reason.as_deref()),
                    Some(chat_usage(&total)),
                ));
                self.finish_emitted = true;
            }
            ClaudeStreamEvent::MessageStop => {
                if !self.finish_emitted {
                    out.push(self.writer.finish("stop", None));
                    self.finish_emitted = true;
                }
                out.push(DONE.to_string());
                self.done = true;
            }
            ClaudeStreamEvent::Error { error } => {
                out.push(format_openai_error(&error.error_type, &error.message));
                self.done = true;
            }
            ClaudeStreamEvent::Ping | ClaudeStreamEvent::Unknown => {}
        }
        out
    }
}

/// `message_delta` usage is cumulative; input counters only when present
pub(crate) fn merge_usage(total: &mut ClaudeUsage, delta: &ClaudeUsage) {
    total.output_tokens = delta.output_tokens;
    if delta.input_tokens > 0 {
        total.input_tokens = delta.input_tokens;
    }
    if delta.cache_creation_input_tokens.is_some() {
        total.cache_creation_input_tokens = delta.cache_creation_input_tokens;
    }
    if delta.cache_read_input_tokens.is_some() {
        total.cache_read_input_tokens = delta.cache_read_input_tokens;
    }
}

/// Rebuilds a whole Messages API response from its stream events
#[derive(Debug, Default)]
pub struct ClaudeMessageAccumulator {
    message: Option<ClaudeResponse>,
    blocks: BTreeMap<u32, ContentBlock>,
    /// Partial tool input JSON, parsed when the block stops
    tool_inputs: BTreeMap<u32, String>,
    stop_reason: Option<String>,
    stop_sequence: Option<String>,
    usage: ClaudeUsage,
    error: Option<ErrorInfo>,
    stopped: bool,
}

impl ClaudeMessageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, event: &ClaudeStreamEvent) {
        match event {
            ClaudeStreamEvent::MessageStart { message } => {
                self.usage = message.usage;
                self.message = Some(message.clone());
            }
            ClaudeStreamEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                if matches!(content_block, ContentBlock::ToolUse { .. }) {
                    self.tool_inputs.insert(*index, String::new());
                }
                self.blocks.insert(*index, content_block.clone());
            }
            ClaudeStreamEvent::ContentBlockDelta { index, delta } => {
                match (self.blocks.get_mut(index), delta) {
                    (Some(ContentBlock::Text { text }), Delta::TextDelta { text: more }) => {
                        text.push_str(more)
                    }
                    (
                        Some(ContentBlock::Thinking { thinking, .. }),
                        Delta::ThinkingDelta { thinking: more },
                    ) => thinking.push_str(more),
                    (
                        Some(ContentBlock::Thinking { signature, .. }),
                        Delta::SignatureDelta { signature: more },
                    ) => signature.get_or_insert_with(String::new).push_str(more),
                    (_, Delta::InputJsonDelta { partial_json }) => self
                        .tool_inputs
                        .entry(*index)
                        .or_default()
                        .push_str(partial_json),
                    _ => {}
                }
            }
            ClaudeStreamEvent::ContentBlockStop { index } => self.close_tool_input(*index),
            ClaudeStreamEvent::MessageDelta { delta, usage } => {
                self.stop_reason = delta.stop_reason.clone();
                self.stop_sequence = delta.stop_sequence.clone();
                if let Some(usage) = usage {
                    merge_usage(&mut self.usage, usage);
                }
            }
            ClaudeStreamEvent::MessageStop => self.stopped = true,
            ClaudeStreamEvent::Error { error } => self.error = Some(error.clone()),
            ClaudeStreamEvent::Ping | ClaudeStreamEvent::Unknown => {}
        }
    }

    fn close_tool_input(&mut self, index: u32) {
        let Some(buffer) = self.tool_inputs.remove(&index) else {
            return;
        };
        if let Some(ContentBlock::ToolUse { name, input, .. }) = self.blocks.get_mut(&index) {
            *input = if buffer.trim().is_empty() {
                json!({})
            } else {
                serde_json::from_str(&buffer).unwrap_or_else(|e| {
                    warn!(tool = %name, error = %e, "Tool input is not valid JSON, kept as text");
                    Value::String(buffer)
                })
            };
        }
    }

    pub fn finish(mut self) -> Result<ClaudeResponse> {
        if let Some(error) = self.error.take() {
            let body = serde_json::to_string(&ClaudeErrorBody::new(
                error.error_type.clone(),
                error.message.clone(),
            ))?;
            return Err(GatewayError::Upstream {
                status: status_for_error_type(&error.error_type),
                body,
            });
        }
        if !self.stopped {
            return Err(GatewayError::TruncatedStream(
                "Claude stream ended before message_stop".to_string(),
            ));
        }

        let pending: Vec<u32> = self.tool_inputs.keys().copied().collect();
        for index in pending {
            self.close_tool_input(index);
        }

        let mut message = self.message.unwrap_or_default();
        message.content = self.blocks.into_values().collect();
        message.stop_reason = self.stop_reason.or(message.stop_reason);
        message.stop_sequence = self.stop_sequence.or(message.stop_sequence);
        message.usage = self.usage;
        Ok(message)
    }
}
