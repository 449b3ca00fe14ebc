pub mod cache_control;
pub mod openai_claude;
pub mod openai_codex;
pub mod validation;

use axum::http::{HeaderMap, HeaderValue};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::BridgeConfig;
use crate::credential::ProviderFamily;
use crate::error::{GatewayError, Result};
use crate::models::claude::ClaudeErrorBody;
use crate::models::openai::OpenAiErrorBody;

pub use validation::validate_chat_request;

/// Wire shape a client speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Claude,
    OpenAi,
    Codex,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Claude => "claude",
            Protocol::OpenAi => "openai",
            Protocol::Codex => "codex",
        }
    }
}

fn default_true() -> bool {
    true
}

/// Exact model-name rewrite, optionally scoped to one provider family
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelConversionRule {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub family: Option<ProviderFamily>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Applies model conversion rules, first enabled match wins
#[derive(Debug, Clone, Default)]
pub struct ModelMapper {
    rules: Vec<ModelConversionRule>,
    default_model: Option<String>,
}

impl ModelMapper {
    pub fn new(rules: Vec<ModelConversionRule>, default_model: Option<String>) -> Self {
        Self {
            rules,
            default_model,
        }
    }

    pub fn convert(&self, model: &str, family: ProviderFamily) -> Option<&str> {
        self.rules
            .iter()
            .filter(|r| r.enabled)
            .filter(|r| r.family.is_none_or(|f| f == family))
            .find(|r| r.source == model)
            .map(|r| r.target.as_str())
    }

    /// Model for a passthrough request: converted when a rule matches, else unchanged
    pub fn passthrough(&self, model: &str, family: ProviderFamily) -> String {
        match self.convert(model, family) {
            Some(target) => {
                info!(from = %model, to = %target, family = %family, "Model converted");
                target.to_string()
            }
            None => model.to_string(),
        }
    }

    /// Model for a cross-protocol request; a foreign model falls back to the default
    pub fn bridge(&self, model: &str, family: ProviderFamily) -> String {
        if let Some(target) = self.convert(model, family) {
            info!(from = %model, to = %target, family = %family, "Model converted");
            return target.to_string();
        }
        match &self.default_model {
            Some(default) if !belongs_to(model, family) => {
                debug!(from = %model, to = %default, "Foreign model replaced by default");
                default.clone()
            }
            _ => model.to_string(),
        }
    }
}

fn belongs_to(model: &str, family: ProviderFamily) -> bool {
    let lower = model.to_ascii_lowercase();
    match family {
        ProviderFamily::Claude => lower.starts_with("claude"),
        ProviderFamily::Codex => !lower.starts_with("claude"),
    }
}

/// Settings a translation needs from the current config snapshot
pub struct TranslateContext<'a> {
    pub mapper: &'a ModelMapper,
    pub bridge: &'a BridgeConfig,
    pub cache_control_limit: usize,
}

/// Request after translation, ready for dispatch
#[derive(Debug, Clone)]
pub struct TranslatedRequest {
    pub body: Bytes,
    /// Model as requested by the client
    pub client_model: String,
    pub upstream_model: String,
    /// Whether the client asked for a stream
    pub client_stream: bool,
    /// Whether the upstream request asks for a stream
    pub upstream_stream: bool,
    /// `anthropic-beta` features the translated body depends on
    pub beta_features: Vec<&'static str>,
}

impl TranslatedRequest {
    /// Client headers plus the beta features this translation needs
    pub fn upstream_headers(&self, client: &HeaderMap) -> HeaderMap {
        let mut headers = client.clone();
        if self.beta_features.is_empty() {
            return headers;
        }

        let mut features: Vec<String> = headers
            .get_all("anthropic-beta")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();
        for feature in &self.beta_features {
            if !features.iter().any(|f| f == feature) {
                features.push(feature.to_string());
            }
        }
        if let Ok(value) = HeaderValue::from_str(&features.join(",")) {
            headers.insert("anthropic-beta", value);
        }
        headers
    }
}

/// Translation matrix keyed by (client protocol, upstream family)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adapter {
    Passthrough(ProviderFamily),
    OpenAiToClaude,
    OpenAiToCodex,
}

impl Adapter {
    pub fn select(client: Protocol, bridge_target: ProviderFamily) -> Self {
        match (client, bridge_target) {
            (Protocol::Claude, _) => Adapter::Passthrough(ProviderFamily::Claude),
            (Protocol::Codex, _) => Adapter::Passthrough(ProviderFamily::Codex),
            (Protocol::OpenAi, ProviderFamily::Claude) => Adapter::OpenAiToClaude,
            (Protocol::OpenAi, ProviderFamily::Codex) => Adapter::OpenAiToCodex,
        }
    }

    pub fn target(&self) -> ProviderFamily {
        match self {
            Adapter::Passthrough(family) => *family,
            Adapter::OpenAiToClaude => ProviderFamily::Claude,
            Adapter::OpenAiToCodex => ProviderFamily::Codex,
        }
    }

    pub fn client_protocol(&self) -> Protocol {
        match self {
            Adapter::Passthrough(ProviderFamily::Claude) => Protocol::Claude,
            Adapter::Passthrough(ProviderFamily::Codex) => Protocol::Codex,
            Adapter::OpenAiToClaude | Adapter::OpenAiToCodex => Protocol::OpenAi,
        }
    }

    pub fn translate_request(&self, body: &[u8], ctx: &TranslateContext<'_>) -> Result<TranslatedRequest> {
        match self {
            Adapter::Passthrough(family) => passthrough_request(*family, body, ctx),
            Adapter::OpenAiToClaude => openai_claude::translate_request(body, ctx),
            Adapter::OpenAiToCodex => openai_codex::translate_request(body, ctx),
        }
    }

    /// Translate a whole (non-streamed) upstream success body into the client shape
    pub fn translate_response(&self, body: &[u8], client_model: &str) -> Result<Bytes> {
        match self {
            Adapter::Passthrough(_) => Ok(Bytes::copy_from_slice(body)),
            Adapter::OpenAiToClaude => {
                let response = serde_json::from_slice(body)?;
                let chat = openai_claude::translate_response(response, client_model);
                Ok(Bytes::from(serde_json::to_vec(&chat)?))
            }
            Adapter::OpenAiToCodex => {
                let response = serde_json::from_slice(body)?;
                let chat = openai_codex::translate_response(response, client_model);
                Ok(Bytes::from(serde_json::to_vec(&chat)?))
            }
        }
    }

    /// Re-shape an upstream error body for the client protocol
    pub fn translate_error(&self, status: u16, body: &[u8]) -> Bytes {
        match self {
            Adapter::Passthrough(_) => Bytes::copy_from_slice(body),
            Adapter::OpenAiToClaude | Adapter::OpenAiToCodex => {
                let (kind, message, code) = upstream_error_fields(status, body);
                let envelope = OpenAiErrorBody::new(kind, message, code);
                Bytes::from(serde_json::to_vec(&envelope).unwrap_or_default())
            }
        }
    }
}

/// Identity transform apart from model conversion and cache_control limiting
fn passthrough_request(
    family: ProviderFamily,
    body: &[u8],
    ctx: &TranslateContext<'_>,
) -> Result<TranslatedRequest> {
    let mut value: Value = serde_json::from_slice(body)?;
    let object = value.as_object_mut().ok_or_else(|| {
        GatewayError::UnsupportedRequestShape("request body must be a JSON object".to_string())
    })?;

    let client_model = object
        .get("model")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::UnsupportedRequestShape("missing 'model'".to_string()))?
        .to_string();
    let client_stream = object
        .get("stream")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let upstream_model = ctx.mapper.passthrough(&client_model, family);
    let converted = upstream_model != client_model;
    if converted {
        object.insert("model".to_string(), Value::String(upstream_model.clone()));
    }

    let stripped = match family {
        ProviderFamily::Claude => cache_control::limit(&mut value, ctx.cache_control_limit),
        ProviderFamily::Codex => 0,
    };

    // untouched bodies are forwarded byte for byte
    let body = if converted || stripped > 0 {
        Bytes::from(serde_json::to_vec(&value)?)
    } else {
        Bytes::copy_from_slice(body)
    };

    Ok(TranslatedRequest {
        body,
        client_model,
        upstream_model,
        client_stream,
        upstream_stream: client_stream,
        beta_features: Vec::new(),
    })
}

/// Pull (type, message, code) out of a Claude or OpenAI shaped error body
pub(crate) fn upstream_error_fields(status: u16, body: &[u8]) -> (String, String, Option<Value>) {
    if let Ok(claude) = serde_json::from_slice::<ClaudeErrorBody>(body) {
        return (claude.error.error_type, claude.error.message, None);
    }
    if let Ok(openai) = serde_json::from_slice::<OpenAiErrorBody>(body) {
        return (openai.error.error_type, openai.error.message, openai.error.code);
    }
    if let Ok(value) = serde_json::from_slice::<Value>(body)
        && let Some(error) = value.get("error")
    {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        let kind = error
            .get("type")
            .or_else(|| error.get("code"))
            .and_then(Value::as_str)
            .unwrap_or("upstream_error")
            .to_string();
        return (kind, message, error.get("code").cloned());
    }

    let text = String::from_utf8_lossy(body).trim().to_string();
    let message = if text.is_empty() {
        format!("upstream returned HTTP {}", status)
    } else {
        text
    };
    ("upstream_error".to_string(), message, Some(Value::from(status)))
}

/// Claude `stop_reason` as an OpenAI `finish_reason`
pub fn map_stop_reason(stop_reason: Option<&str>) -> &'static str {
    match stop_reason {
        Some("max_tokens") => "length",
        Some("tool_use") => "tool_calls",
        Some("refusal") => "content_filter",
        _ => "stop",
    }
}

pub(crate) fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
