use model_gateway::config::BridgeConfig;
use model_gateway::credential::ProviderFamily;
use model_gateway::transform::{Adapter, ModelConversionRule, ModelMapper, Protocol, TranslateContext};
use serde_json::{Value, json};

fn rule(source: &str, target: &str, family: Option<ProviderFamily>) -> ModelConversionRule {
    ModelConversionRule {
        source: source.to_string(),
        target: target.to_string(),
        family,
        enabled: true,
    }
}

fn translate(adapter: Adapter, mapper: &ModelMapper, bridge: &BridgeConfig, body: Value) -> (Value, bool) {
    let ctx = TranslateContext {
        mapper,
        bridge,
        cache_control_limit: 4,
    };
    let raw = serde_json::to_vec(&body).unwrap();
    let translated = adapter.translate_request(&raw, &ctx).unwrap();
    (
        serde_json::from_slice(&translated.body).unwrap(),
        translated.upstream_stream,
    )
}

#[test]
fn test_chat_to_claude_basic() {
    let mapper = ModelMapper::default();
    let bridge = BridgeConfig::default();
    let (body, stream) = translate(
        Adapter::OpenAiToClaude,
        &mapper,
        &bridge,
        json!({
            "model": "claude-sonnet-4-5",
            "stream": true,
            "max_tokens": 512,
            "temperature": 0.3,
            "stop": "END",
            "messages": [
                {"role": "system", "content": "Be brief."},
                {"role": "developer", "content": "Answer in English."},
                {"role": "user", "content": "Hello"}
            ]
        }),
    );

    assert!(stream);
    assert_eq!(body["model"], "claude-sonnet-4-5");
    assert_eq!(body["system"], "Be brief.\n\nAnswer in English.");
    assert_eq!(body["max_tokens"], 512);
    assert_eq!(body["stop_sequences"], json!(["END"]));
    assert_eq!(body["messages"], json!([{"role": "user", "content": "Hello"}]));
    assert!(body.get("thinking").is_none());
}

#[test]
fn test_chat_to_claude_merges_same_role_turns() {
    let mapper = ModelMapper::default();
    let bridge = BridgeConfig::default();
    let (body, _) = translate(
        Adapter::OpenAiToClaude,
        &mapper,
        &bridge,
        json!({
            "model": "claude-sonnet-4-5",
            "messages": [
                {"role": "user", "content": "first"},
                {"role": "user", "content": "second"}
            ]
        }),
    );

    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(
        messages[0]["content"],
        json!([{"type": "text", "text": "first"}, {"type": "text", "text": "second"}])
    );
}

#[test]
fn test_thinking_suffix_enables_thinking() {
    let mapper = ModelMapper::default();
    let bridge = BridgeConfig {
        thinking_budget: 8000,
        ..Default::default()
    };
    let (body, _) = translate(
        Adapter::OpenAiToClaude,
        &mapper,
        &bridge,
        json!({
            "model": "claude-opus-4-thinking",
            "max_tokens": 4000,
            "temperature": 0.2,
            "messages": [{"role": "user", "content": "Think hard"}]
        }),
    );

    assert_eq!(body["model"], "claude-opus-4");
    assert_eq!(body["thinking"], json!({"type": "enabled", "budget_tokens": 8000}));
    assert_eq!(body["temperature"], 1.0);
    // max_tokens must exceed the thinking budget
    assert!(body["max_tokens"].as_u64().unwrap() > 8000);
}

#[test]
fn test_bridge_default_model_for_foreign_model() {
    let mapper = ModelMapper::new(vec![], Some("claude-sonnet-4-5".to_string()));
    let bridge = BridgeConfig::default();
    let (body, _) = translate(
        Adapter::OpenAiToClaude,
        &mapper,
        &bridge,
        json!({"model": "gpt-4o", "messages": [{"role": "user", "content": "hi"}]}),
    );
    assert_eq!(body["model"], "claude-sonnet-4-5");
}

#[test]
fn test_chat_to_codex_always_streams() {
    let mapper = ModelMapper::new(vec![rule("gpt-4o", "gpt-5-codex", Some(ProviderFamily::Codex))], None);
    let bridge = BridgeConfig {
        target: ProviderFamily::Codex,
        instructions: Some("You are a coding agent.".to_string()),
        ..Default::default()
    };
    let (body, stream) = translate(
        Adapter::OpenAiToCodex,
        &mapper,
        &bridge,
        json!({
            "model": "gpt-4o",
            "stream": false,
            "max_tokens": 100,
            "messages": [
                {"role": "system", "content": "Prefer Rust."},
                {"role": "user", "content": "Write a parser"}
            ]
        }),
    );

    assert!(stream);
    assert_eq!(body["model"], "gpt-5-codex");
    assert_eq!(body["stream"], true);
    assert_eq!(body["store"], false);
    assert_eq!(body["instructions"], "You are a coding agent.\n\nPrefer Rust.");
    assert!(body.get("max_output_tokens").is_none());
    assert_eq!(
        body["input"],
        json!([{"type": "message", "role": "user", "content": [{"type": "input_text", "text": "Write a parser"}]}])
    );
}

#[test]
fn test_passthrough_is_byte_identical_without_changes() {
    let mapper = ModelMapper::default();
    let bridge = BridgeConfig::default();
    let ctx = TranslateContext {
        mapper: &mapper,
        bridge: &bridge,
        cache_control_limit: 4,
    };
    let raw = br#"{"model":"claude-haiku-4-5",  "max_tokens":10,"messages":[{"role":"user","content":"x"}]}"#;
    let translated = Adapter::Passthrough(ProviderFamily::Claude)
        .translate_request(raw, &ctx)
        .unwrap();
    assert_eq!(&translated.body[..], &raw[..]);
    assert!(!translated.upstream_stream);
}

#[test]
fn test_passthrough_model_conversion_scoped_by_family() {
    let mapper = ModelMapper::new(
        vec![
            rule("claude-3-opus", "claude-opus-4-1", Some(ProviderFamily::Claude)),
            rule("gpt-5", "gpt-5-codex", Some(ProviderFamily::Codex)),
        ],
        None,
    );
    let bridge = BridgeConfig::default();

    let (claude, _) = translate(
        Adapter::Passthrough(ProviderFamily::Claude),
        &mapper,
        &bridge,
        json!({"model": "claude-3-opus", "max_tokens": 10, "messages": []}),
    );
    assert_eq!(claude["model"], "claude-opus-4-1");

    // a rule scoped to the other family does not apply
    let (codex, _) = translate(
        Adapter::Passthrough(ProviderFamily::Codex),
        &mapper,
        &bridge,
        json!({"model": "claude-3-opus", "input": []}),
    );
    assert_eq!(codex["model"], "claude-3-opus");
}

#[test]
fn test_converted_model_upstream_requested_model_to_client() {
    let mapper = ModelMapper::new(
        vec![rule("gpt-4", "claude-sonnet-4-5", Some(ProviderFamily::Claude))],
        None,
    );
    let bridge = BridgeConfig::default();
    let ctx = TranslateContext {
        mapper: &mapper,
        bridge: &bridge,
        cache_control_limit: 4,
    };
    let body = json!({"model": "gpt-4", "messages": [{"role": "user", "content": "hi"}]});
    let translated = Adapter::OpenAiToClaude
        .translate_request(&serde_json::to_vec(&body).unwrap(), &ctx)
        .unwrap();
    assert_eq!(translated.client_model, "gpt-4");
    assert_eq!(translated.upstream_model, "claude-sonnet-4-5");
    let upstream: Value = serde_json::from_slice(&translated.body).unwrap();
    assert_eq!(upstream["model"], "claude-sonnet-4-5");

    let reply = json!({
        "id": "msg_9",
        "model": "claude-sonnet-4-5",
        "content": [{"type": "text", "text": "hello"}],
        "stop_reason": "end_turn",
        "usage": {"input_tokens": 3, "output_tokens": 1}
    });
    let chat: Value = serde_json::from_slice(
        &Adapter::OpenAiToClaude
            .translate_response(&serde_json::to_vec(&reply).unwrap(), &translated.client_model)
            .unwrap(),
    )
    .unwrap();
    assert_eq!(chat["model"], "gpt-4");
    assert_eq!(chat["choices"][0]["message"]["content"], "hello");
}

#[test]
fn test_passthrough_limits_cache_control() {
    let mapper = ModelMapper::default();
    let bridge = BridgeConfig::default();
    let marker = json!({"type": "ephemeral"});
    let block = |text: &str| json!({"type": "text", "text": text, "cache_control": marker});
    let (body, _) = translate(
        Adapter::Passthrough(ProviderFamily::Claude),
        &mapper,
        &bridge,
        json!({
            "model": "claude-sonnet-4-5",
            "max_tokens": 10,
            "system": [block("s1"), block("s2")],
            "messages": [{"role": "user", "content": [block("a"), block("b"), block("c")]}]
        }),
    );

    let content = body["messages"][0]["content"].as_array().unwrap();
    assert!(body["system"][0].get("cache_control").is_some());
    assert!(body["system"][1].get("cache_control").is_some());
    assert!(content[1].get("cache_control").is_some());
    assert!(content[2].get("cache_control").is_none());
}

#[test]
fn test_adapter_selection() {
    assert_eq!(
        Adapter::select(Protocol::Claude, ProviderFamily::Codex),
        Adapter::Passthrough(ProviderFamily::Claude)
    );
    assert_eq!(
        Adapter::select(Protocol::Codex, ProviderFamily::Claude),
        Adapter::Passthrough(ProviderFamily::Codex)
    );
    assert_eq!(Adapter::select(Protocol::OpenAi, ProviderFamily::Codex), Adapter::OpenAiToCodex);
    assert_eq!(Adapter::OpenAiToClaude.client_protocol(), Protocol::OpenAi);
}
