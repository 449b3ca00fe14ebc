pub mod claude;
pub mod codex;
pub mod sse;

pub use claude::{ClaudeMessageAccumulator, ClaudeToOpenAiStream};
pub use codex::{CodexResponseAccumulator, CodexToOpenAiStream};
pub use sse::{SseDecoder, SseEvent};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::credential::ProviderFamily;
use crate::dispatch::StreamLease;
use crate::error::{GatewayError, Result};
use crate::models::claude::ClaudeStreamEvent;
use crate::models::codex::ResponsesStreamEvent;
use crate::models::openai::{ChatCompletionChunk, ChatUsage, ChunkChoice, ChunkDelta, FunctionCallDelta, ToolCallDelta};
use crate::retry::TransportKind;
use crate::transform::{Adapter, Protocol, now_unix};
use crate::transport::ProviderStream;
use crate::usage::{UsageAccumulator, UsageSink, today};

/// One parsed upstream SSE event, tagged by dialect
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    Claude(ClaudeStreamEvent),
    Codex(ResponsesStreamEvent),
}

impl UpstreamEvent {
    /// Parse the data line of an SSE event; `[DONE]` and unreadable payloads yield `None`
    pub fn parse(family: ProviderFamily, event: &SseEvent) -> Option<Self> {
        if event.data.is_empty() || event.is_done() {
            return None;
        }
        let parsed = match family {
            ProviderFamily::Claude => serde_json::from_str(&event.data).map(UpstreamEvent::Claude),
            ProviderFamily::Codex => serde_json::from_str(&event.data).map(UpstreamEvent::Codex),
        };
        match parsed {
            Ok(event) => Some(event),
            Err(e) => {
                debug!(family = %family, error = %e, "Skipping unreadable upstream event");
                None
            }
        }
    }

    /// Whether the upstream considers the exchange finished after this event
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UpstreamEvent::Claude(ClaudeStreamEvent::MessageStop | ClaudeStreamEvent::Error { .. })
                | UpstreamEvent::Codex(
                    ResponsesStreamEvent::Completed { .. }
                        | ResponsesStreamEvent::Incomplete { .. }
                        | ResponsesStreamEvent::Failed { .. }
                        | ResponsesStreamEvent::Error { .. }
                )
        )
    }
}

/// Per-exchange stream translation state, one variant per conversion pair
#[derive(Debug)]
pub enum StreamTranslator {
    ClaudeToOpenAi(ClaudeToOpenAiStream),
    CodexToOpenAi(CodexToOpenAiStream),
}

impl StreamTranslator {
    /// Passthrough adapters have no translator
    pub fn for_adapter(adapter: Adapter, client_model: &str) -> Option<Self> {
        match adapter {
            Adapter::Passthrough(_) => None,
            Adapter::OpenAiToClaude => Some(StreamTranslator::ClaudeToOpenAi(
                ClaudeToOpenAiStream::new(client_model),
            )),
            Adapter::OpenAiToCodex => Some(StreamTranslator::CodexToOpenAi(
                CodexToOpenAiStream::new(client_model),
            )),
        }
    }

    /// Translate one upstream event into zero or more client frames
    pub fn on_event(&mut self, event: &UpstreamEvent) -> Vec<String> {
        match (self, event) {
            (StreamTranslator::ClaudeToOpenAi(state), UpstreamEvent::Claude(event)) => {
                state.on_event(event)
            }
            (StreamTranslator::CodexToOpenAi(state), UpstreamEvent::Codex(event)) => {
                state.on_event(event)
            }
            _ => Vec::new(),
        }
    }
}

/// Builds `chat.completion.chunk` frames for one exchange
#[derive(Debug, Clone)]
pub struct ChunkWriter {
    id: String,
    model: String,
    created: i64,
}

impl ChunkWriter {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            model: model.into(),
            created: now_unix(),
        }
    }

    pub fn set_id(&mut self, id: String) {
        self.id = id;
    }

    pub fn frame(&self, delta: ChunkDelta, finish_reason: Option<&str>, usage: Option<ChatUsage>) -> String {
        let chunk = ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: finish_reason.map(str::to_string),
            }],
            usage,
        };
        sse::format_data(&chunk)
    }

    pub fn role(&self) -> String {
        self.frame(
            ChunkDelta {
                role: Some("assistant".to_string()),
                content: Some(String::new()),
                tool_calls: None,
            },
            None,
            None,
        )
    }

    pub fn content(&self, text: &str) -> String {
        self.frame(
            ChunkDelta {
                content: Some(text.to_string()),
                ..Default::default()
            },
            None,
            None,
        )
    }

    pub fn tool_start(&self, index: u32, id: &str, name: &str) -> String {
        self.tool_delta(ToolCallDelta {
            index,
            id: Some(id.to_string()),
            kind: Some("function".to_string()),
            function: FunctionCallDelta {
                name: Some(name.to_string()),
                arguments: Some(String::new()),
            },
        })
    }

    pub fn tool_arguments(&self, index: u32, arguments: &str) -> String {
        self.tool_delta(ToolCallDelta {
            index,
            id: None,
            kind: None,
            function: FunctionCallDelta {
                name: None,
                arguments: Some(arguments.to_string()),
            },
        })
    }

    fn tool_delta(&self, delta: ToolCallDelta) -> String {
        self.frame(
            ChunkDelta {
                tool_calls: Some(vec![delta]),
                ..Default::default()
            },
            None,
            None,
        )
    }

    pub fn finish(&self, reason: &str, usage: Option<ChatUsage>) -> String {
        self.frame(ChunkDelta::default(), Some(reason), usage)
    }
}

/// Terminal error frame in the client's stream dialect
pub fn error_frame(protocol: Protocol, error_type: &str, message: &str) -> String {
    match protocol {
        Protocol::Claude => sse::format_claude_error(error_type, message),
        Protocol::OpenAi => sse::format_openai_error(error_type, message),
        Protocol::Codex => sse::format_event(
            "error",
            &json!({ "type": "error", "code": error_type, "message": message }),
        ),
    }
}

/// Decoding, translation and usage state of one live stream
struct StreamPipeline {
    family: ProviderFamily,
    decoder: SseDecoder,
    translator: Option<StreamTranslator>,
    usage: UsageAccumulator,
    terminal: bool,
}

impl StreamPipeline {
    fn handle(&mut self, events: Vec<SseEvent>) -> String {
        let mut out = String::new();
        for sse in &events {
            let Some(event) = UpstreamEvent::parse(self.family, sse) else {
                continue;
            };
            self.usage.observe(&event);
            self.terminal |= event.is_terminal();
            if let Some(translator) = self.translator.as_mut() {
                for frame in translator.on_event(&event) {
                    out.push_str(&frame);
                }
            }
        }
        out
    }
}

/// Everything the client stream needs beyond the upstream body
pub struct StreamContext {
    pub adapter: Adapter,
    pub client_model: String,
    pub upstream_model: String,
    pub lease: StreamLease,
    pub usage_sink: Arc<dyn UsageSink>,
}

/// Turn a live upstream body into the client's stream.
///
/// Passthrough streams forward upstream bytes untouched and only observe
/// them for usage. A transport failure or an upstream that ends without a
/// terminal event is reported against the credential and closed with an
/// error frame; it is never retried because part of the answer is already out.
/// Dropping the returned stream drops the upstream connection.
pub fn client_stream(
    upstream: ProviderStream,
    ctx: StreamContext,
) -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send {
    let family = ctx.adapter.target();
    let protocol = ctx.adapter.client_protocol();
    let mut pipeline = StreamPipeline {
        family,
        decoder: SseDecoder::new(),
        translator: StreamTranslator::for_adapter(ctx.adapter, &ctx.client_model),
        usage: UsageAccumulator::new(family, ctx.upstream_model.clone()),
        terminal: false,
    };
    let passthrough = pipeline.translator.is_none();
    let mut upstream = upstream;

    async_stream::stream! {
        let mut failure: Option<(TransportKind, String)> = None;

        while let Some(chunk) = upstream.next().await {
            match chunk {
                Ok(bytes) => {
                    let events = pipeline.decoder.feed(&bytes);
                    let out = pipeline.handle(events);
                    if passthrough {
                        yield Ok(bytes);
                    } else if !out.is_empty() {
                        yield Ok(Bytes::from(out));
                    }
                }
                Err(e) => {
                    failure = Some((e.kind, e.message));
                    break;
                }
            }
        }

        if failure.is_none() {
            if let Some(tail) = pipeline.decoder.finish() {
                let out = pipeline.handle(vec![tail]);
                if !passthrough && !out.is_empty() {
                    yield Ok(Bytes::from(out));
                }
            }
            if !pipeline.terminal {
                failure = Some((
                    TransportKind::Reset,
                    "upstream closed the stream before it completed".to_string(),
                ));
            }
        }

        if let Some((kind, message)) = failure {
            warn!(
                credential = %ctx.lease.credential_id(),
                family = %family,
                kind = %kind,
                error = %message,
                "Stream truncated after partial delivery"
            );
            ctx.lease.report_truncated(kind);
            yield Ok(Bytes::from(error_frame(protocol, "stream_truncated", &message)));
        } else {
            info!(credential = %ctx.lease.credential_id(), family = %family, "Stream completed");
        }

        ctx.usage_sink.record(pipeline.usage.record(today()));
    }
}

/// Accumulates a whole upstream stream into the non-streamed response shape
#[derive(Debug)]
pub enum Aggregator {
    Claude(ClaudeMessageAccumulator),
    Codex(CodexResponseAccumulator),
}

impl Aggregator {
    pub fn new(family: ProviderFamily) -> Self {
        match family {
            ProviderFamily::Claude => Aggregator::Claude(ClaudeMessageAccumulator::new()),
            ProviderFamily::Codex => Aggregator::Codex(CodexResponseAccumulator::new()),
        }
    }

    pub fn observe(&mut self, event: &UpstreamEvent) {
        match (self, event) {
            (Aggregator::Claude(acc), UpstreamEvent::Claude(event)) => acc.observe(event),
            (Aggregator::Codex(acc), UpstreamEvent::Codex(event)) => acc.observe(event),
            _ => {}
        }
    }

    /// Serialize the upstream-shaped response
    pub fn finish(self) -> Result<Bytes> {
        let body = match self {
            Aggregator::Claude(acc) => serde_json::to_vec(&acc.finish()?)?,
            Aggregator::Codex(acc) => serde_json::to_vec(&acc.finish()?)?,
        };
        Ok(Bytes::from(body))
    }
}

/// Read a whole upstream event stream and rebuild the non-streamed response body
pub async fn aggregate(family: ProviderFamily, mut body: ProviderStream) -> Result<Bytes> {
    let mut decoder = SseDecoder::new();
    let mut aggregator = Aggregator::new(family);

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| GatewayError::Transport {
            kind: e.kind,
            message: e.message,
        })?;
        for sse in decoder.feed(&chunk) {
            if let Some(event) = UpstreamEvent::parse(family, &sse) {
                aggregator.observe(&event);
            }
        }
    }
    if let Some(sse) = decoder.finish()
        && let Some(event) = UpstreamEvent::parse(family, &sse)
    {
        aggregator.observe(&event);
    }

    aggregator.finish()
}
