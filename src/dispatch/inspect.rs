use serde_json::Value;

use crate::credential::ProviderFamily;
use crate::models::claude::ClaudeStreamEvent;
use crate::models::codex::ResponsesStreamEvent;
use crate::models::openai::OpenAiErrorBody;
use crate::streaming::{SseDecoder, UpstreamEvent};

/// HTTP status equivalent of an error type carried inside a stream
pub fn status_for_error_type(kind: &str) -> u16 {
    match kind {
        "rate_limit_error" | "rate_limit_exceeded" | "insufficient_quota" | "usage_limit_reached" => 429,
        "overloaded_error" | "server_is_overloaded" => 529,
        "authentication_error" | "invalid_api_key" => 401,
        "permission_error" => 403,
        "invalid_request_error" => 400,
        "not_found_error" | "model_not_found" => 404,
        "request_too_large" => 413,
        _ => 500,
    }
}

/// Look for an error event in the first chunk of a 2xx event stream.
///
/// Some upstreams accept the request, then report rate limits or overload as
/// the first event. Returns the equivalent status and an error body.
pub fn first_chunk_error(family: ProviderFamily, chunk: &[u8]) -> Option<(u16, String)> {
    let mut decoder = SseDecoder::new();
    let mut events = decoder.feed(chunk);
    events.extend(decoder.finish());

    events.iter().find_map(|sse| {
        match UpstreamEvent::parse(family, sse)? {
            UpstreamEvent::Claude(ClaudeStreamEvent::Error { error }) => {
                Some((status_for_error_type(&error.error_type), sse.data.clone()))
            }
            UpstreamEvent::Codex(ResponsesStreamEvent::Error { code, message }) => {
                let code = code.unwrap_or_else(|| "server_error".to_string());
                Some(codex_error(&code, message.as_deref().unwrap_or("upstream stream error")))
            }
            UpstreamEvent::Codex(ResponsesStreamEvent::Failed { response }) => {
                let error = response.error.unwrap_or(Value::Null);
                let code = error.get("code").and_then(Value::as_str).unwrap_or("server_error");
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("response failed");
                Some(codex_error(code, message))
            }
            _ => None,
        }
    })
}

fn codex_error(code: &str, message: &str) -> (u16, String) {
    let body = OpenAiErrorBody::new(code, message, Some(Value::String(code.to_string())));
    (
        status_for_error_type(code),
        serde_json::to_string(&body).unwrap_or_default(),
    )
}
