use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use super::ChunkWriter;
use super::sse::{DONE, format_openai_error};
use crate::dispatch::inspect::status_for_error_type;
use crate::error::{GatewayError, Result};
use crate::models::codex::{
    OutputContent, OutputItem, ReasoningSummary, ResponseObject, ResponsesStreamEvent,
};
use crate::models::openai::OpenAiErrorBody;
use crate::transform::openai_claude::{THINK_CLOSE, THINK_OPEN};
use crate::transform::openai_codex::{chat_id, chat_usage, finish_reason};

/// Responses API SSE to OpenAI `chat.completion.chunk` frames
#[derive(Debug)]
pub struct CodexToOpenAiStream {
    writer: ChunkWriter,
    role_emitted: bool,
    reasoning_open: bool,
    done: bool,
    /// output_index of each function call -> OpenAI tool call index
    tool_indices: BTreeMap<u32, u32>,
    /// Function calls whose arguments already went out
    streamed_arguments: BTreeSet<u32>,
}

impl CodexToOpenAiStream {
    pub fn new(client_model: impl Into<String>) -> Self {
        Self {
            writer: ChunkWriter::new(client_model),
            role_emitted: false,
            reasoning_open: false,
            done: false,
            tool_indices: BTreeMap::new(),
            streamed_arguments: BTreeSet::new(),
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

    fn close_reasoning(&mut self, out: &mut Vec<String>) {
        if self.reasoning_open {
            self.reasoning_open = false;
            out.push(self.writer.content(THINK_CLOSE));
        }
    }

    fn start_call(&mut self, output_index: u32, call_id: &str, name: &str, arguments: &str, out: &mut Vec<String>) {
        let tool_index = self.tool_indices.len() as u32;
        self.tool_indices.insert(output_index, tool_index);
        out.push(self.writer.tool_start(tool_index, call_id, name));
        if !arguments.is_empty() {
            self.streamed_arguments.insert(output_index);
            out.push(self.writer.tool_arguments(tool_index, arguments));
        }
    }

    pub fn on_event(&mut self, event: &ResponsesStreamEvent) -> Vec<String> {
        let mut out = Vec::new();
        if self.done {
            return out;
        }

        match event {
            ResponsesStreamEvent::Created { response } => {
                self.writer.set_id(chat_id(&response.id));
                self.ensure_role(&mut out);
            }
            ResponsesStreamEvent::OutputItemAdded {
                output_index,
                item:
                    OutputItem::FunctionCall {
                        call_id,
                        name,
                        arguments,
                        ..
                    },
            } => {
                self.ensure_role(&mut out);
                self.close_reasoning(&mut out);
                self.start_call(*output_index, call_id, name, arguments, &mut out);
            }
            ResponsesStreamEvent::OutputTextDelta { delta, .. } => {
                self.ensure_role(&mut out);
                self.close_reasoning(&mut out);
                if !delta.is_empty() {
                    out.push(self.writer.content(delta));
                }
            }
            ResponsesStreamEvent::ReasoningSummaryDelta { delta, .. } if !delta.is_empty() => {
                self.ensure_role(&mut out);
                if self.reasoning_open {
                    out.push(self.writer.content(delta));
                } else {
                    self.reasoning_open = true;
                    out.push(self.writer.content(&format!("{}{}", THINK_OPEN, delta)));
                }
            }
            ResponsesStreamEvent::FunctionCallArgumentsDelta {
                output_index,
                delta,
            } => {
                if let Some(&tool_index) = self.tool_indices.get(output_index)
                    && !delta.is_empty()
                {
                    self.streamed_arguments.insert(*output_index);
                    out.push(self.writer.tool_arguments(tool_index, delta));
                }
            }
            ResponsesStreamEvent::OutputItemDone {
                output_index,
                item:
                    OutputItem::FunctionCall {
                        call_id,
                        name,
                        arguments,
                        ..
                    },
            } => match self.tool_indices.get(output_index).copied() {
                None => {
                    self.ensure_role(&mut out);
                    self.close_reasoning(&mut out);
                    self.start_call(*output_index, call_id, name, arguments, &mut out);
                }
                Some(tool_index) => {
                    if !self.streamed_arguments.contains(output_index) && !arguments.is_empty() {
                        self.streamed_arguments.insert(*output_index);
                        out.push(self.writer.tool_arguments(tool_index, arguments));
                    }
                }
            },
            ResponsesStreamEvent::Completed { response }
            | ResponsesStreamEvent::Incomplete { response } => {
                self.ensure_role(&mut out);
                self.close_reasoning(&mut out);
                let reason = finish_reason(response, !self.tool_indices.is_empty());
                out.push(self.writer.finish(reason, response.usage.as_ref().map(chat_usage)));
                out.push(DONE.to_string());
                self.done = true;
            }
            ResponsesStreamEvent::Failed { response } => {
                let (code, message) = failure_fields(response);
                out.push(format_openai_error(&code, &message));
                self.done = true;
            }
            ResponsesStreamEvent::Error { code, message } => {
                out.push(format_openai_error(
                    code.as_deref().unwrap_or("upstream_error"),
                    message.as_deref().unwrap_or("upstream stream error"),
                ));
                self.done = true;
            }
            _ => {}
        }
        out
    }
}

/// (code, message) of a `response.failed` payload
fn failure_fields(response: &ResponseObject) -> (String, String) {
    let error = response.error.as_ref();
    let code = error
        .and_then(|e| e.get("code"))
        .and_then(Value::as_str)
        .unwrap_or("server_error")
        .to_string();
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("response failed")
        .to_string();
    (code, message)
}

/// Rebuilds the final response object of a Responses API stream.
///
/// `response.completed` normally carries the full output; when it does not,
/// the output is assembled from the item and delta events.
#[derive(Debug, Default)]
pub struct CodexResponseAccumulator {
    response: Option<ResponseObject>,
    items: BTreeMap<u32, OutputItem>,
    text: BTreeMap<u32, String>,
    arguments: BTreeMap<u32, String>,
    reasoning: BTreeMap<u32, String>,
    error: Option<(String, String)>,
    finished: bool,
}

impl CodexResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, event: &ResponsesStreamEvent) {
        match event {
            ResponsesStreamEvent::Created { response } => {
                if self.response.is_none() {
                    self.response = Some(response.clone());
                }
            }
            ResponsesStreamEvent::OutputItemAdded { output_index, item } => {
                self.items.entry(*output_index).or_insert_with(|| item.clone());
            }
            ResponsesStreamEvent::OutputTextDelta {
                output_index,
                delta,
            } => self.text.entry(*output_index).or_default().push_str(delta),
            ResponsesStreamEvent::FunctionCallArgumentsDelta {
                output_index,
                delta,
            } => self
                .arguments
                .entry(*output_index)
                .or_default()
                .push_str(delta),
            ResponsesStreamEvent::ReasoningSummaryDelta {
                output_index,
                delta,
            } if !delta.is_empty() => self
                .reasoning
                .entry(*output_index)
                .or_default()
                .push_str(delta),
            ResponsesStreamEvent::OutputItemDone { output_index, item } => {
                self.items.insert(*output_index, item.clone());
            }
            ResponsesStreamEvent::Completed { response }
            | ResponsesStreamEvent::Incomplete { response } => {
                self.response = Some(response.clone());
                self.finished = true;
            }
            ResponsesStreamEvent::Failed { response } => {
                self.error = Some(failure_fields(response));
            }
            ResponsesStreamEvent::Error { code, message } => {
                self.error = Some((
                    code.clone().unwrap_or_else(|| "upstream_error".to_string()),
                    message.clone().unwrap_or_default(),
                ));
            }
            _ => {}
        }
    }

    pub fn finish(mut self) -> Result<ResponseObject> {
        if let Some((code, message)) = self.error.take() {
            let body = serde_json::to_string(&OpenAiErrorBody::new(
                code.clone(),
                message,
                Some(Value::String(code.clone())),
            ))?;
            return Err(GatewayError::Upstream {
                status: status_for_error_type(&code),
                body,
            });
        }
        if !self.finished {
            return Err(GatewayError::TruncatedStream(
                "Codex stream ended before response.completed".to_string(),
            ));
        }

        let mut response = self.response.take().unwrap_or_default();
        if response.output.is_empty() {
            response.output = self.assemble_output();
        } else {
            self.restore_reasoning(&mut response.output);
        }
        Ok(response)
    }

    /// Final outputs often omit the summaries that were streamed
    fn restore_reasoning(&mut self, output: &mut Vec<OutputItem>) {
        for (index, text) in std::mem::take(&mut self.reasoning) {
            let position = (index as usize).min(output.len());
            match output.get_mut(position) {
                Some(OutputItem::Reasoning { summary }) => {
                    if summary.iter().all(|s| s.text.is_empty()) {
                        *summary = vec![ReasoningSummary { text }];
                    }
                }
                _ => output.insert(
                    position,
                    OutputItem::Reasoning {
                        summary: vec![ReasoningSummary { text }],
                    },
                ),
            }
        }
    }

    fn assemble_output(&mut self) -> Vec<OutputItem> {
        for index in self.text.keys() {
            self.items.entry(*index).or_insert(OutputItem::Message {
                id: None,
                content: Vec::new(),
            });
        }
        for index in self.reasoning.keys() {
            self.items
                .entry(*index)
                .or_insert(OutputItem::Reasoning { summary: Vec::new() });
        }

        let mut items = std::mem::take(&mut self.items);
        for (index, item) in items.iter_mut() {
            match item {
                OutputItem::Message { content, .. } if content.is_empty() => {
                    if let Some(text) = self.text.remove(index) {
                        content.push(OutputContent::OutputText { text });
                    }
                }
                OutputItem::FunctionCall { arguments, .. } if arguments.is_empty() => {
                    if let Some(args) = self.arguments.remove(index) {
                        *arguments = args;
                    }
                }
                OutputItem::Reasoning { summary } if summary.iter().all(|s| s.text.is_empty()) => {
                    if let Some(text) = self.reasoning.remove(index) {
                        *summary = vec![ReasoningSummary { text }];
                    }
                }
                _ => {}
            }
        }
        items.into_values().collect()
    }
}
