mod common;

use common::*;
use model_gateway::config::BridgeConfig;
use model_gateway::credential::ProviderFamily;
use model_gateway::transform::{Adapter, ModelMapper, TranslateContext};
use serde_json::{Value, json};

fn translate(adapter: Adapter, body: Value) -> Value {
    let mapper = ModelMapper::default();
    let bridge = BridgeConfig {
        target: adapter.target(),
        ..Default::default()
    };
    let ctx = TranslateContext {
        mapper: &mapper,
        bridge: &bridge,
        cache_control_limit: 4,
    };
    let translated = adapter
        .translate_request(&serde_json::to_vec(&body).unwrap(), &ctx)
        .unwrap();
    serde_json::from_slice(&translated.body).unwrap()
}

fn weather_conversation(model: &str) -> Value {
    json!({
        "model": model,
        "tool_choice": {"type": "function", "function": {"name": "get_weather"}},
        "parallel_tool_calls": false,
        "tools": [{
            "type": "function",
            "function": {
                "name": "get_weather",
                "description": "Current weather",
                "parameters": {"type": "object", "properties": {"city": {"type": "string"}}, "required": ["city"]}
            }
        }],
        "messages": [
            {"role": "user", "content": "Weather in Paris?"},
            {"role": "assistant", "content": null, "tool_calls": [{
                "id": "call_1",
                "type": "function",
                "function": {"name": "get_weather", "arguments": "{\"city\":\"Paris\"}"}
            }]},
            {"role": "tool", "tool_call_id": "call_1", "content": "18C and sunny"}
        ]
    })
}

#[test]
fn test_tools_to_claude() {
    let body = translate(Adapter::OpenAiToClaude, weather_conversation("claude-sonnet-4-5"));

    assert_eq!(body["tools"][0]["name"], "get_weather");
    assert_eq!(body["tools"][0]["input_schema"]["required"], json!(["city"]));
    assert_eq!(
        body["tool_choice"],
        json!({"type": "tool", "name": "get_weather", "disable_parallel_tool_use": true})
    );

    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(
        messages[1]["content"],
        json!([{"type": "tool_use", "id": "call_1", "name": "get_weather", "input": {"city": "Paris"}}])
    );
    assert_eq!(messages[2]["role"], "user");
    assert_eq!(messages[2]["content"][0]["type"], "tool_result");
    assert_eq!(messages[2]["content"][0]["tool_use_id"], "call_1");
    assert_eq!(messages[2]["content"][0]["content"], "18C and sunny");
}

#[test]
fn test_tools_to_codex() {
    let body = translate(Adapter::OpenAiToCodex, weather_conversation("gpt-5-codex"));

    assert_eq!(body["tools"][0]["type"], "function");
    assert_eq!(body["tools"][0]["name"], "get_weather");
    assert_eq!(body["tool_choice"], json!({"type": "function", "name": "get_weather"}));
    assert_eq!(body["parallel_tool_calls"], false);

    let input = body["input"].as_array().unwrap();
    assert_eq!(input[1]["type"], "function_call");
    assert_eq!(input[1]["call_id"], "call_1");
    assert_eq!(input[1]["arguments"], "{\"city\":\"Paris\"}");
    assert_eq!(
        input[2],
        json!({"type": "function_call_output", "call_id": "call_1", "output": "18C and sunny"})
    );
}

#[test]
fn test_invalid_tool_arguments_rejected_for_claude() {
    let mapper = ModelMapper::default();
    let bridge = BridgeConfig::default();
    let ctx = TranslateContext {
        mapper: &mapper,
        bridge: &bridge,
        cache_control_limit: 4,
    };
    let mut body = weather_conversation("claude-sonnet-4-5");
    body["messages"][1]["tool_calls"][0]["function"]["arguments"] = json!("{not json");

    let err = Adapter::OpenAiToClaude
        .translate_request(&serde_json::to_vec(&body).unwrap(), &ctx)
        .unwrap_err();
    assert!(err.to_string().contains("invalid JSON arguments"));
}

#[test]
fn test_claude_tool_stream() {
    let frames = translate_stream(Adapter::OpenAiToClaude, "claude-sonnet-4-5", CLAUDE_TOOL_STREAM);
    let chunks = data_frames(&frames);

    let start = chunks
        .iter()
        .find(|c| c["choices"][0]["delta"]["tool_calls"][0]["id"].is_string())
        .unwrap();
    let call = &start["choices"][0]["delta"]["tool_calls"][0];
    // the text block is Claude index 0, the tool call is still OpenAI index 0
    assert_eq!(call["index"], 0);
    assert_eq!(call["id"], "toolu_01");
    assert_eq!(call["function"]["name"], "get_weather");

    let arguments = streamed_arguments(&chunks, 0);
    assert_eq!(serde_json::from_str::<Value>(&arguments).unwrap(), json!({"city": "Paris"}));
    assert_eq!(streamed_content(&chunks), "Checking.");

    let last = chunks.last().unwrap();
    assert_eq!(last["choices"][0]["finish_reason"], "tool_calls");
}

#[test]
fn test_codex_tool_stream_does_not_repeat_arguments() {
    let frames = translate_stream(Adapter::OpenAiToCodex, "gpt-5-codex", CODEX_TOOL_STREAM);
    let chunks = data_frames(&frames);

    let starts: Vec<&Value> = chunks
        .iter()
        .filter(|c| c["choices"][0]["delta"]["tool_calls"][0]["id"].is_string())
        .collect();
    assert_eq!(starts.len(), 1);
    assert_eq!(starts[0]["choices"][0]["delta"]["tool_calls"][0]["id"], "call_abc");

    // deltas already carried the arguments; output_item.done adds nothing
    assert_eq!(streamed_arguments(&chunks, 0), "{\"path\":\"src/lib.rs\"}");
    assert_eq!(chunks.last().unwrap()["choices"][0]["finish_reason"], "tool_calls");
}

#[test]
fn test_codex_tool_call_announced_only_at_done() {
    let sse = "event: response.created
data: {\"type\":\"response.created\",\"response\":{\"id\":\"resp_3\"}}

event: response.output_item.done
data: {\"type\":\"response.output_item.done\",\"output_index\":0,\"item\":{\"type\":\"function_call\",\"call_id\":\"call_z\",\"name\":\"ls\",\"arguments\":\"{}\"}}

event: response.completed
data: {\"type\":\"response.completed\",\"response\":{\"id\":\"resp_3\",\"status\":\"completed\"}}

";
    let chunks = data_frames(&translate_stream(Adapter::OpenAiToCodex, "m", sse));
    assert_eq!(streamed_arguments(&chunks, 0), "{}");
    assert!(
        chunks
            .iter()
            .any(|c| c["choices"][0]["delta"]["tool_calls"][0]["function"]["name"] == "ls")
    );
}

#[tokio::test]
async fn test_aggregated_tool_call_matches_stream() {
    let body = model_gateway::streaming::aggregate(ProviderFamily::Claude, chunked(CLAUDE_TOOL_STREAM, 11))
        .await
        .unwrap();
    let chat: Value = serde_json::from_slice(
        &Adapter::OpenAiToClaude
            .translate_response(&body, "claude-sonnet-4-5")
            .unwrap(),
    )
    .unwrap();

    let call = &chat["choices"][0]["message"]["tool_calls"][0];
    assert_eq!(call["id"], "toolu_01");
    assert_eq!(
        serde_json::from_str::<Value>(call["function"]["arguments"].as_str().unwrap()).unwrap(),
        json!({"city": "Paris"})
    );
    assert_eq!(chat["choices"][0]["finish_reason"], "tool_calls");
}
