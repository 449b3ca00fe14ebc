#![allow(dead_code)]

use bytes::Bytes;
use futures::stream;
use model_gateway::streaming::{SseDecoder, StreamTranslator, UpstreamEvent};
use model_gateway::transform::Adapter;
use model_gateway::transport::ProviderStream;
use serde_json::Value;

pub const CLAUDE_TEXT_STREAM: &str = "event: message_start
data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_01\",\"type\":\"message\",\"role\":\"assistant\",\"model\":\"claude-sonnet-4-5\",\"content\":[],\"usage\":{\"input_tokens\":12,\"output_tokens\":1,\"cache_read_input_tokens\":4}}}

event: ping
data: {\"type\":\"ping\"}

event: content_block_start
data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"thinking\",\"thinking\":\"\"}}

event: content_block_delta
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"thinking_delta\",\"thinking\":\"Greeting.\"}}

event: content_block_stop
data: {\"type\":\"content_block_stop\",\"index\":0}

event: content_block_start
data: {\"type\":\"content_block_start\",\"index\":1,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}

event: content_block_delta
data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hello\"}}

event: content_block_delta
data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"text_delta\",\"text\":\" there\"}}

event: content_block_stop
data: {\"type\":\"content_block_stop\",\"index\":1}

event: message_delta
data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\",\"stop_sequence\":null},\"usage\":{\"output_tokens\":9}}

event: message_stop
data: {\"type\":\"message_stop\"}

";

pub const CLAUDE_TOOL_STREAM: &str = "event: message_start
data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_02\",\"model\":\"claude-sonnet-4-5\",\"content\":[],\"usage\":{\"input_tokens\":30,\"output_tokens\":1}}}

event: content_block_start
data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}

event: content_block_delta
data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Checking.\"}}

event: content_block_stop
data: {\"type\":\"content_block_stop\",\"index\":0}

event: content_block_start
data: {\"type\":\"content_block_start\",\"index\":1,\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_01\",\"name\":\"get_weather\",\"input\":{}}}

event: content_block_delta
data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"city\\\": \"}}

event: content_block_delta
data: {\"type\":\"content_block_delta\",\"index\":1,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"\\\"Paris\\\"}\"}}

event: content_block_stop
data: {\"type\":\"content_block_stop\",\"index\":1}

event: message_delta
data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"tool_use\"},\"usage\":{\"output_tokens\":21}}

event: message_stop
data: {\"type\":\"message_stop\"}

";

pub const CODEX_TEXT_STREAM: &str = "event: response.created
data: {\"type\":\"response.created\",\"response\":{\"id\":\"resp_01\",\"model\":\"gpt-5-codex\",\"status\":\"in_progress\",\"output\":[]}}

event: response.reasoning_summary_text.delta
data: {\"type\":\"response.reasoning_summary_text.delta\",\"output_index\":0,\"delta\":\"Plan it.\"}

event: response.output_item.added
data: {\"type\":\"response.output_item.added\",\"output_index\":1,\"item\":{\"type\":\"message\",\"id\":\"msg_1\",\"content\":[]}}

event: response.output_text.delta
data: {\"type\":\"response.output_text.delta\",\"output_index\":1,\"delta\":\"fn main\"}

event: response.output_text.delta
data: {\"type\":\"response.output_text.delta\",\"output_index\":1,\"delta\":\"() {}\"}

event: response.output_item.done
data: {\"type\":\"response.output_item.done\",\"output_index\":1,\"item\":{\"type\":\"message\",\"id\":\"msg_1\",\"content\":[{\"type\":\"output_text\",\"text\":\"fn main() {}\"}]}}

event: response.completed
data: {\"type\":\"response.completed\",\"response\":{\"id\":\"resp_01\",\"model\":\"gpt-5-codex\",\"status\":\"completed\",\"output\":[{\"type\":\"message\",\"id\":\"msg_1\",\"content\":[{\"type\":\"output_text\",\"text\":\"fn main() {}\"}]}],\"usage\":{\"input_tokens\":100,\"output_tokens\":20,\"total_tokens\":120,\"input_tokens_details\":{\"cached_tokens\":60}}}}

";

pub const CODEX_TOOL_STREAM: &str = "event: response.created
data: {\"type\":\"response.created\",\"response\":{\"id\":\"resp_02\",\"status\":\"in_progress\"}}

event: response.output_item.added
data: {\"type\":\"response.output_item.added\",\"output_index\":0,\"item\":{\"type\":\"function_call\",\"id\":\"fc_1\",\"call_id\":\"call_abc\",\"name\":\"read_file\",\"arguments\":\"\"}}

event: response.function_call_arguments.delta
data: {\"type\":\"response.function_call_arguments.delta\",\"output_index\":0,\"delta\":\"{\\\"path\\\":\"}

event: response.function_call_arguments.delta
data: {\"type\":\"response.function_call_arguments.delta\",\"output_index\":0,\"delta\":\"\\\"src/lib.rs\\\"}\"}

event: response.output_item.done
data: {\"type\":\"response.output_item.done\",\"output_index\":0,\"item\":{\"type\":\"function_call\",\"id\":\"fc_1\",\"call_id\":\"call_abc\",\"name\":\"read_file\",\"arguments\":\"{\\\"path\\\":\\\"src/lib.rs\\\"}\"}}

event: response.completed
data: {\"type\":\"response.completed\",\"response\":{\"id\":\"resp_02\",\"status\":\"completed\",\"output\":[{\"type\":\"function_call\",\"id\":\"fc_1\",\"call_id\":\"call_abc\",\"name\":\"read_file\",\"arguments\":\"{\\\"path\\\":\\\"src/lib.rs\\\"}\"}],\"usage\":{\"input_tokens\":50,\"output_tokens\":10,\"total_tokens\":60}}}

";

/// Run a full upstream SSE text through the translator for `adapter`
pub fn translate_stream(adapter: Adapter, client_model: &str, sse: &str) -> Vec<String> {
    let family = adapter.target();
    let mut translator = StreamTranslator::for_adapter(adapter, client_model).expect("translated adapter");
    let mut decoder = SseDecoder::new();
    let mut events = decoder.feed(sse.as_bytes());
    events.extend(decoder.finish());

    events
        .iter()
        .filter_map(|sse| UpstreamEvent::parse(family, sse))
        .flat_map(|event| translator.on_event(&event))
        .collect()
}

/// JSON payloads of `data:` frames, `[DONE]` excluded
pub fn data_frames(frames: &[String]) -> Vec<Value> {
    frames
        .iter()
        .flat_map(|frame| frame.lines())
        .filter_map(|line| line.strip_prefix("data: "))
        .filter(|data| *data != "[DONE]")
        .map(|data| serde_json::from_str(data).expect("frame is JSON"))
        .collect()
}

/// Concatenated `delta.content` of all chunks
pub fn streamed_content(chunks: &[Value]) -> String {
    chunks
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["content"].as_str())
        .collect()
}

/// Concatenated arguments of the tool call at `index`
pub fn streamed_arguments(chunks: &[Value], index: u64) -> String {
    chunks
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["tool_calls"].as_array())
        .flatten()
        .filter(|call| call["index"].as_u64() == Some(index))
        .filter_map(|call| call["function"]["arguments"].as_str())
        .collect()
}

/// Upstream body split into chunks of `size` bytes, cutting events mid-line
pub fn chunked(sse: &'static str, size: usize) -> ProviderStream {
    let chunks: Vec<_> = sse
        .as_bytes()
        .chunks(size)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    Box::pin(stream::iter(chunks))
}
