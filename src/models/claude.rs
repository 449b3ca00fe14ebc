use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Claude Messages API Request
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClaudeRequest {
    /// Model identifier (e.g., "claude-sonnet-4-5")
    pub model: String,

    /// Conversation history with user/assistant turns
    pub messages: Vec<ClaudeMessage>,

    /// Optional system prompt (top-level field)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,

    /// Maximum tokens to generate (required upstream)
    pub max_tokens: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    /// Enable streaming
    #[serde(default)]
    pub stream: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ClaudeTool>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,

    /// Extended thinking, enabled for `-thinking` model aliases
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ClaudeMessage {
    /// "user" or "assistant"
    pub role: String,

    /// Either a string or array of content blocks
    pub content: ContentType,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ContentType {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: Value,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    Thinking {
        thinking: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    RedactedThinking {
        data: String,
    },
    #[serde(other)]
    Unknown,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ClaudeTool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ThinkingConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub budget_tokens: u32,
}

impl ThinkingConfig {
    pub fn enabled(budget_tokens: u32) -> Self {
        Self {
            kind: "enabled".to_string(),
            budget_tokens,
        }
    }
}

/// Non-streamed Messages API response; also the `message` of `message_start`
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct ClaudeResponse {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default = "message_type")]
    pub msg_type: String,
    #[serde(default = "assistant_role")]
    pub role: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub stop_sequence: Option<String>,
    #[serde(default)]
    pub usage: ClaudeUsage,
}

fn message_type() -> String {
    "message".to_string()
}

fn assistant_role() -> String {
    "assistant".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct ClaudeUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u64>,
}

/// Claude SSE Event Types
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClaudeStreamEvent {
    MessageStart {
        message: ClaudeResponse,
    },
    ContentBlockStart {
        index: u32,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: u32,
        delta: Delta,
    },
    ContentBlockStop {
        index: u32,
    },
    MessageDelta {
        delta: MessageDeltaData,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<ClaudeUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: ErrorInfo,
    },
    #[serde(other)]
    Unknown,
}

impl ClaudeStreamEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            ClaudeStreamEvent::MessageStart { .. } => "message_start",
            ClaudeStreamEvent::ContentBlockStart { .. } => "content_block_start",
            ClaudeStreamEvent::ContentBlockDelta { .. } => "content_block_delta",
            ClaudeStreamEvent::ContentBlockStop { .. } => "content_block_stop",
            ClaudeStreamEvent::MessageDelta { .. } => "message_delta",
            ClaudeStreamEvent::MessageStop => "message_stop",
            ClaudeStreamEvent::Ping => "ping",
            ClaudeStreamEvent::Error { .. } => "error",
            ClaudeStreamEvent::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Delta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    ThinkingDelta { thinking: String },
    SignatureDelta { signature: String },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct MessageDeltaData {
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub stop_sequence: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ErrorInfo {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

/// `{"type":"error","error":{...}}` envelope used by Claude for failures
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ClaudeErrorBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub error: ErrorInfo,
}

impl ClaudeErrorBody {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: "error".to_string(),
            error: ErrorInfo {
                error_type: error_type.into(),
                message: message.into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_with_system() {
        let json = r#"{
            "model": "claude-sonnet-4-5",
            "messages": [
                {"role": "user", "content": "Hello"}
            ],
            "system": "You are a helpful assistant",
            "max_tokens": 100,
            "stream": true
        }"#;

        let req: ClaudeRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.max_tokens, 100);
        assert!(req.stream);
        assert!(matches!(req.system, Some(SystemPrompt::Text(_))));
    }

    #[test]
    fn test_parse_content_blocks() {
        let json = r#"{
            "role": "assistant",
            "content": [
                {"type": "text", "text": "Let me check"},
                {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"city": "Paris"}},
                {"type": "server_tool_use", "id": "x"}
            ]
        }"#;

        let msg: ClaudeMessage = serde_json::from_str(json).unwrap();
        match &msg.content {
            ContentType::Blocks(blocks) => {
                assert_eq!(blocks.len(), 3);
                assert!(matches!(&blocks[1], ContentBlock::ToolUse { name, .. } if name == "get_weather"));
                assert_eq!(blocks[2], ContentBlock::Unknown);
            }
            _ => panic!("Expected ContentType::Blocks"),
        }
    }

    #[test]
    fn test_parse_stream_events() {
        let event: ClaudeStreamEvent = serde_json::from_str(
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"ci"}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            ClaudeStreamEvent::ContentBlockDelta {
                index: 1,
                delta: Delta::InputJsonDelta {
                    partial_json: "{\"ci".to_string()
                }
            }
        );

        let event: ClaudeStreamEvent = serde_json::from_str(
            r#"{"type":"message_start","message":{"id":"msg_1","type":"message","role":"assistant","model":"claude","content":[],"stop_reason":null,"usage":{"input_tokens":12,"output_tokens":1}}}"#,
        )
        .unwrap();
        assert_eq!(event.event_name(), "message_start");

        let event: ClaudeStreamEvent =
            serde_json::from_str(r#"{"type":"brand_new_event","x":1}"#).unwrap();
        assert_eq!(event, ClaudeStreamEvent::Unknown);
    }

    #[test]
    fn test_usage_missing_cache_fields() {
        let usage: ClaudeUsage =
            serde_json::from_str(r#"{"input_tokens": 5, "output_tokens": 7}"#).unwrap();
        assert_eq!(usage.cache_read_input_tokens, None);
        assert_eq!(usage.output_tokens, 7);
    }
}
