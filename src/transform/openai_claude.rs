use bytes::Bytes;
use serde_json::{Value, json};
use tracing::debug;

use super::{TranslateContext, TranslatedRequest, map_stop_reason, now_unix};
use crate::credential::ProviderFamily;
use crate::error::{GatewayError, Result};
use crate::models::claude::{
    ClaudeMessage, ClaudeRequest, ClaudeResponse, ClaudeTool, ContentBlock, ContentType,
    SystemPrompt, ThinkingConfig,
};
use crate::models::openai::{
    ChatCompletionRequest, ChatCompletionResponse, ChatContent, ChatMessage, ChatTool, ChatUsage,
    Choice, ContentPart, ToolCall,
};
use crate::transform::validation::validate_chat_request;

pub const THINKING_SUFFIX: &str = "-thinking";
pub const DEFAULT_MAX_TOKENS: u32 = 32000;
const THINKING_HEADROOM: u32 = 1024;

/// Sent upstream whenever the bridge turns thinking on
pub const THINKING_BETA_FEATURES: &[&str] = &[
    "interleaved-thinking-2025-05-14",
    "fine-grained-tool-streaming-2025-05-14",
];

pub const THINK_OPEN: &str = "<think>";
pub const THINK_CLOSE: &str = "</think>";

pub fn translate_request(body: &[u8], ctx: &TranslateContext<'_>) -> Result<TranslatedRequest> {
    let req: ChatCompletionRequest = serde_json::from_slice(body)
        .map_err(|e| GatewayError::UnsupportedRequestShape(format!("Invalid chat request: {}", e)))?;
    validate_chat_request(&req)?;

    let client_model = req.model.clone();
    let client_stream = req.stream;
    let claude = to_claude_request(req, ctx)?;
    let upstream_model = claude.model.clone();
    let beta_features = if claude.thinking.is_some() {
        THINKING_BETA_FEATURES.to_vec()
    } else {
        Vec::new()
    };

    Ok(TranslatedRequest {
        body: Bytes::from(serde_json::to_vec(&claude)?),
        client_model,
        upstream_model,
        client_stream,
        upstream_stream: client_stream,
        beta_features,
    })
}

/// Map an OpenAI chat request onto the Messages API
pub fn to_claude_request(req: ChatCompletionRequest, ctx: &TranslateContext<'_>) -> Result<ClaudeRequest> {
    let thinking = req.model.ends_with(THINKING_SUFFIX);
    let base_model = req.model.strip_suffix(THINKING_SUFFIX).unwrap_or(&req.model);
    let model = ctx.mapper.bridge(base_model, ProviderFamily::Claude);

    let system_text: Vec<String> = req
        .messages
        .iter()
        .filter(|m| m.role == "system" || m.role == "developer")
        .map(ChatMessage::text_content)
        .filter(|t| !t.is_empty())
        .collect();
    let system = (!system_text.is_empty()).then(|| SystemPrompt::Text(system_text.join("\n\n")));

    let mut messages: Vec<ClaudeMessage> = Vec::new();
    for msg in &req.messages {
        let (role, blocks) = match msg.role.as_str() {
            "system" | "developer" => continue,
            "user" => ("user", user_blocks(msg)),
            "assistant" => ("assistant", assistant_blocks(msg)?),
            "tool" => ("user", vec![tool_result_block(msg)]),
            other => {
                return Err(GatewayError::UnsupportedRequestShape(format!(
                    "Unsupported message role '{}'",
                    other
                )));
            }
        };
        if blocks.is_empty() {
            continue;
        }
        push_merged(&mut messages, role, blocks);
    }

    let mut max_tokens = req
        .max_completion_tokens
        .or(req.max_tokens)
        .unwrap_or(DEFAULT_MAX_TOKENS);
    let budget = ctx.bridge.thinking_budget;
    let (temperature, top_p, thinking) = if thinking {
        debug!(model = %model, budget, "Thinking mode enabled");
        if max_tokens <= budget {
            max_tokens = budget + THINKING_HEADROOM;
        }
        (Some(1.0), None, Some(ThinkingConfig::enabled(budget)))
    } else {
        (req.temperature, req.top_p, None)
    };

    let tools = req
        .tools
        .as_ref()
        .filter(|t| !t.is_empty())
        .map(|tools| tools.iter().map(to_claude_tool).collect());
    let tool_choice = req
        .tool_choice
        .as_ref()
        .and_then(|choice| to_claude_tool_choice(choice, req.parallel_tool_calls));

    Ok(ClaudeRequest {
        model,
        messages,
        system,
        max_tokens,
        temperature,
        top_p,
        top_k: None,
        stop_sequences: req.stop.map(|s| s.into_vec()),
        stream: req.stream,
        tools,
        tool_choice,
        thinking,
        metadata: req.user.map(|user| json!({ "user_id": user })),
    })
}

/// Claude requires alternating roles, so adjacent same-role turns are merged
fn push_merged(messages: &mut Vec<ClaudeMessage>, role: &str, blocks: Vec<ContentBlock>) {
    if let Some(last) = messages.last_mut()
        && last.role == role
    {
        let existing = match std::mem::replace(&mut last.content, ContentType::Blocks(Vec::new())) {
            ContentType::Text(text) => vec![ContentBlock::text(text)],
            ContentType::Blocks(blocks) => blocks,
        };
        last.content = ContentType::Blocks(existing.into_iter().chain(blocks).collect());
        return;
    }

    let content = match blocks.as_slice() {
        [ContentBlock::Text { text }] => ContentType::Text(text.clone()),
        _ => ContentType::Blocks(blocks),
    };
    messages.push(ClaudeMessage {
        role: role.to_string(),
        content,
    });
}

fn user_blocks(msg: &ChatMessage) -> Vec<ContentBlock> {
    match &msg.content {
        None => Vec::new(),
        Some(ChatContent::Text(text)) => vec![ContentBlock::text(text.clone())],
        Some(ChatContent::Parts(parts)) => parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(ContentBlock::text(text.clone())),
                ContentPart::ImageUrl { image_url } => Some(ContentBlock::Image {
                    source: image_source(&image_url.url),
                }),
                ContentPart::Unknown => None,
            })
            .collect(),
    }
}

/// `data:<media>;base64,<data>` URLs become inline images, others stay URLs
fn image_source(url: &str) -> Value {
    if let Some(rest) = url.strip_prefix("data:")
        && let Some((meta, data)) = rest.split_once(',')
        && let Some(media_type) = meta.strip_suffix(";base64")
    {
        return json!({ "type": "base64", "media_type": media_type, "data": data });
    }
    json!({ "type": "url", "url": url })
}

fn assistant_blocks(msg: &ChatMessage) -> Result<Vec<ContentBlock>> {
    let mut blocks = Vec::new();
    let text = msg.text_content();
    if !text.is_empty() {
        blocks.push(ContentBlock::text(text));
    }
    for call in msg.tool_calls.iter().flatten() {
        let input = if call.function.arguments.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(&call.function.arguments).map_err(|e| {
                GatewayError::UnsupportedRequestShape(format!(
                    "Tool call '{}' has invalid JSON arguments: {}",
                    call.id, e
                ))
            })?
        };
        blocks.push(ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.function.name.clone(),
            input,
        });
    }
    Ok(blocks)
}

fn tool_result_block(msg: &ChatMessage) -> ContentBlock {
    ContentBlock::ToolResult {
        tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
        content: Some(Value::String(msg.text_content())),
        is_error: None,
    }
}

fn to_claude_tool(tool: &ChatTool) -> ClaudeTool {
    ClaudeTool {
        name: tool.function.name.clone(),
        description: tool.function.description.clone(),
        input_schema: tool
            .function
            .parameters
            .clone()
            .unwrap_or_else(|| json!({ "type": "object", "properties": {} })),
    }
}

fn to_claude_tool_choice(choice: &Value, parallel: Option<bool>) -> Option<Value> {
    let mut mapped = match choice {
        Value::String(s) => match s.as_str() {
            "auto" => json!({ "type": "auto" }),
            "none" => json!({ "type": "none" }),
            "required" => json!({ "type": "any" }),
            _ => return None,
        },
        Value::Object(obj) => {
            let name = obj.get("function")?.get("name")?.as_str()?;
            json!({ "type": "tool", "name": name })
        }
        _ => return None,
    };
    if parallel == Some(false)
        && let Some(obj) = mapped.as_object_mut()
        && obj.get("type").and_then(Value::as_str) != Some("none")
    {
        obj.insert("disable_parallel_tool_use".to_string(), Value::Bool(true));
    }
    Some(mapped)
}

/// Render a Messages API response as a `chat.completion`
pub fn translate_response(response: ClaudeResponse, client_model: &str) -> ChatCompletionResponse {
    let mut content = String::new();
    let mut tool_calls = Vec::new();

    for block in &response.content {
        match block {
            ContentBlock::Thinking { thinking, .. } => {
                content.push_str(THINK_OPEN);
                content.push_str(thinking);
                content.push_str(THINK_CLOSE);
            }
            ContentBlock::Text { text } => content.push_str(text),
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall::function(id.clone(), name.clone(), input.to_string()));
            }
            _ => {}
        }
    }

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
        created: now_unix(),
        model: client_model.to_string(),
        choices: vec![Choice {
            index: 0,
            message,
            finish_reason: Some(map_stop_reason(response.stop_reason.as_deref()).to_string()),
        }],
        usage: Some(chat_usage(&response.usage)),
    }
}

pub fn chat_id(claude_id: &str) -> String {
    if claude_id.is_empty() {
        format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
    } else {
        format!("chatcmpl-{}", claude_id)
    }
}

/// Prompt tokens include both cache counters, reads reported as cached
pub fn chat_usage(usage: &crate::models::claude::ClaudeUsage) -> ChatUsage {
    let cache_read = usage.cache_read_input_tokens.unwrap_or(0);
    let prompt = usage.input_tokens + usage.cache_creation_input_tokens.unwrap_or(0) + cache_read;
    ChatUsage::new(
        prompt,
        usage.output_tokens,
        usage.cache_read_input_tokens,
    )
}
