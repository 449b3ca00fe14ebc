use bytes::Bytes;
use serde_json::{Value, json};

use super::openai_claude::{THINK_CLOSE, THINK_OPEN};
use super::{TranslateContext, TranslatedRequest, now_unix};
use crate::credential::ProviderFamily;
use crate::error::{GatewayError, Result};
use crate::models::codex::{
    InputContent, InputItem, OutputContent, OutputItem, ResponseObject, ResponsesRequest,
    ResponsesTool, ResponsesUsage,
};
use crate::models::openai::{
    ChatCompletionRequest, ChatCompletionResponse, ChatContent, ChatMessage, ChatTool, ChatUsage,
    Choice, ContentPart, ToolCall,
};
use crate::transform::validation::validate_chat_request;

pub fn translate_request(body: &[u8], ctx: &TranslateContext<'_>) -> Result<TranslatedRequest> {
    let req: ChatCompletionRequest = serde_json::from_slice(body)
        .map_err(|e| GatewayError::UnsupportedRequestShape(format!("Invalid chat request: {}", e)))?;
    validate_chat_request(&req)?;

    let client_model = req.model.clone();
    let client_stream = req.stream;
    let codex = to_codex_request(req, ctx);
    let upstream_model = codex.model.clone();

    // the upstream only answers in stream mode; non-stream clients get the aggregate
    Ok(TranslatedRequest {
        body: Bytes::from(serde_json::to_vec(&codex)?),
        client_model,
        upstream_model,
        client_stream,
        upstream_stream: true,
        beta_features: Vec::new(),
    })
}

/// Map an OpenAI chat request onto the Responses API
pub fn to_codex_request(req: ChatCompletionRequest, ctx: &TranslateContext<'_>) -> ResponsesRequest {
    let model = ctx.mapper.bridge(&req.model, ProviderFamily::Codex);

    let mut instructions: Vec<String> = ctx.bridge.instructions.iter().cloned().collect();
    let mut input = Vec::new();

    for msg in &req.messages {
        match msg.role.as_str() {
            "system" | "developer" => {
                let text = msg.text_content();
                if !text.is_empty() {
                    instructions.push(text);
                }
            }
            "user" => {
                let content = user_content(msg);
                if !content.is_empty() {
                    input.push(InputItem::Message {
                        role: "user".to_string(),
                        content,
                    });
                }
            }
            "assistant" => {
                let text = msg.text_content();
                if !text.is_empty() {
                    input.push(InputItem::Message {
                        role: "assistant".to_string(),
                        content: vec![InputContent::OutputText { text }],
                    });
                }
                for call in msg.tool_calls.iter().flatten() {
                    input.push(InputItem::FunctionCall {
                        call_id: call.id.clone(),
                        name: call.function.name.clone(),
                        arguments: call.function.arguments.clone(),
                    });
                }
            }
            "tool" => input.push(InputItem::FunctionCallOutput {
                call_id: msg.tool_call_id.clone().unwrap_or_default(),
                output: msg.text_content(),
            }),
            _ => {}
        }
    }

    ResponsesRequest {
        model,
        instructions: (!instructions.is_empty()).then(|| instructions.join("\n\n")),
        input,
        tools: req.tools.iter().flatten().map(to_codex_tool).collect(),
        tool_choice: req.tool_choice.as_ref().and_then(to_codex_tool_choice),
        parallel_tool_calls: req.parallel_tool_calls,
        reasoning: req
            .reasoning_effort
            .map(|effort| json!({ "effort": effort, "summary": "auto" })),
        max_output_tokens: None,
        store: false,
        stream: true,
    }
}

fn user_content(msg: &ChatMessage) -> Vec<InputContent> {
    match &msg.content {
        None => Vec::new(),
        Some(ChatContent::Text(text)) => vec![InputContent::InputText { text: text.clone() }],
        Some(ChatContent::Parts(parts)) => parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(InputContent::InputText { text: text.clone() }),
                ContentPart::ImageUrl { image_url } => Some(InputContent::InputImage {
                    image_url: image_url.url.clone(),
                }),
                ContentPart::Unknown => None,
            })
            .collect(),
    }
}

fn to_codex_tool(tool: &ChatTool) -> ResponsesTool {
    ResponsesTool {
        kind: "function".to_string(),
        name: tool.function.name.clone(),
        description: tool.function.description.clone(),
        parameters: tool
            .function
            .parameters
            .clone()
            .unwrap_or_else(|| json!({ "type": "object", "properties": {} })),
        strict: None,
    }
}

fn to_codex_tool_choice(choice: &Value) -> Option<Value> {
    match choice {
        Value::String(s) if matches!(s.as_str(), "auto" | "none" | "required") => Some(choice.clone()),
        Value::Object(obj) => {
            let name = obj.get("function")?.get("name")?.as_str()?;
            Some(json!({ "type": "function", "name": name }))
        }
        _ => None,
    }
}

/// Render a final Responses API object as a `chat.completion`
pub fn translate_response(response: ResponseObject, client_model: &str) -> ChatCompletionResponse {
    let mut content = String::new();
    let mut tool_calls = Vec::new();
    // same placement as the stream: summaries open a think block that text or a call closes
    let mut thinking = false;

    for item in &response.output {
        match item {
            OutputItem::Reasoning { summary } => {
                for part in summary.iter().filter(|s| !s.text.is_empty()) {
                    if !thinking {
                        content.push_str(THINK_OPEN);
                        thinking = true;
                    }
                    content.push_str(&part.text);
                }
            }
            OutputItem::Message { content: parts, .. } => {
                if std::mem::take(&mut thinking) {
                    content.push_str(THINK_CLOSE);
                }
                for part in parts {
                    match part {
                        OutputContent::OutputText { text } => content.push_str(text),
                        OutputContent::Refusal { refusal } => content.push_str(refusal),
                        OutputContent::Unknown => {}
                    }
                }
            }
            OutputItem::FunctionCall {
                call_id,
                name,
                arguments,
                ..
            } => {
                if std::mem::take(&mut thinking) {
                    content.push_str(THINK_CLOSE);
                }
                tool_calls.push(ToolCall::function(call_id.clone(), name.clone(), arguments.clone()));
            }
            OutputItem::Unknown => {}
        }
    }
    if thinking {
        content.push_str(THINK_CLOSE);
    }

    let finish_reason = finish_reason(&response, !tool_calls.is_empty());
    let message = ChatMessage {
        role: "assistant".to_string(),
        content: if content.is_empty() && !tool_calls.is_empty() {
            None
        } else {
            Some(ChatContent::Text(content))
        },
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        ..Default::default()
    };

    ChatCompletionResponse {
        id: chat_id(&response.id),
        object: "chat.completion".to_string(),
        created: response.created_at.unwrap_or_else(now_unix),
        model: client_model.to_string(),
        choices: vec![Choice {
            index: 0,
            message,
            finish_reason: Some(finish_reason.to_string()),
        }],
        usage: response.usage.as_ref().map(chat_usage),
    }
}

pub fn finish_reason(response: &ResponseObject, has_tool_calls: bool) -> &'static str {
    if has_tool_calls {
        return "tool_calls";
    }
    let incomplete_reason = response
        .incomplete_details
        .as_ref()
        .and_then(|d| d.reason.as_deref());
    match (response.status.as_deref(), incomplete_reason) {
        (Some("incomplete"), Some("content_filter")) => "content_filter",
        (Some("incomplete"), _) => "length",
        _ => "stop",
    }
}

pub fn chat_id(response_id: &str) -> String {
    if response_id.is_empty() {
        format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
    } else {
        format!("chatcmpl-{}", response_id)
    }
}

pub fn chat_usage(usage: &ResponsesUsage) -> ChatUsage {
    let cached = usage.cached_tokens();
    ChatUsage::new(
        usage.input_tokens,
        usage.output_tokens,
        (cached > 0).then_some(cached),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::transform::ModelMapper;

    fn translate(json: &str, bridge: &BridgeConfig) -> ResponsesRequest {
        let mapper = ModelMapper::default();
        let ctx = TranslateContext {
            mapper: &mapper,
            bridge,
            cache_control_limit: 4,
        };
        to_codex_request(serde_json::from_str(json).unwrap(), &ctx)
    }

    #[test]
    fn test_system_becomes_instructions() {
        let bridge = BridgeConfig {
            instructions: Some("You are Codex.".to_string()),
            ..BridgeConfig::default()
        };
        let codex = translate(
            r#"{"model":"gpt-5","messages":[{"role":"system","content":"Be terse."},{"role":"user","content":"hi"}]}"#,
            &bridge,
        );
        assert_eq!(codex.instructions.as_deref(), Some("You are Codex.\n\nBe terse."));
        assert_eq!(codex.input.len(), 1);
        assert!(codex.stream);
        assert!(!codex.store);
    }

    #[test]
    fn test_tool_history() {
        let codex = translate(
            r#"{"model":"gpt-5","messages":[
                {"role":"user","content":"ls"},
                {"role":"assistant","content":"","tool_calls":[{"id":"call_1","type":"function","function":{"name":"shell","arguments":"{\"cmd\":\"ls\"}"}}]},
                {"role":"tool","tool_call_id":"call_1","content":"a.txt"}
            ],"tools":[{"type":"function","function":{"name":"shell","parameters":{"type":"object"}}}],
            "tool_choice":{"type":"function","function":{"name":"shell"}}}"#,
            &BridgeConfig::default(),
        );
        assert_eq!(codex.input.len(), 3);
        assert!(matches!(&codex.input[1], InputItem::FunctionCall { call_id, .. } if call_id == "call_1"));
        assert!(matches!(&codex.input[2], InputItem::FunctionCallOutput { output, .. } if output == "a.txt"));
        assert_eq!(codex.tools[0].name, "shell");
        assert_eq!(codex.tool_choice, Some(json!({"type": "function", "name": "shell"})));
    }

    #[test]
    fn test_incomplete_maps_to_length() {
        let response: ResponseObject = serde_json::from_str(
            r#"{"id":"resp_1","status":"incomplete","incomplete_details":{"reason":"max_output_tokens"},
                "output":[{"type":"message","id":"m","role":"assistant","content":[{"type":"output_text","text":"partial"}]}],
                "usage":{"input_tokens":100,"input_tokens_details":{"cached_tokens":40},"output_tokens":5,"total_tokens":105}}"#,
        )
        .unwrap();
        let chat = translate_response(response, "gpt-4o");
        assert_eq!(chat.choices[0].finish_reason.as_deref(), Some("length"));
        assert_eq!(chat.choices[0].message.text_content(), "partial");
        let usage = chat.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 100);
        assert_eq!(usage.prompt_tokens_details.unwrap().cached_tokens, 40);
    }

    #[test]
    fn test_reasoning_summary_wrapped_in_think_tags() {
        let response: ResponseObject = serde_json::from_str(
            r#"{"id":"resp_2","status":"completed","output":[
                {"type":"reasoning","summary":[{"type":"summary_text","text":"Check "},{"type":"summary_text","text":"the file."}]},
                {"type":"function_call","call_id":"call_1","name":"read","arguments":"{}"},
                {"type":"reasoning","summary":[]}
            ]}"#,
        )
        .unwrap();
        let chat = translate_response(response, "gpt-4o");
        let message = &chat.choices[0].message;
        assert_eq!(message.text_content(), "<think>Check the file.</think>");
        assert_eq!(message.tool_calls.as_ref().unwrap().len(), 1);
        assert_eq!(chat.choices[0].finish_reason.as_deref(), Some("tool_calls"));
    }
}
