use chrono::{Local, NaiveDate};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::credential::ProviderFamily;
use crate::metrics::GATEWAY_METRICS;
use crate::models::claude::{ClaudeStreamEvent, ClaudeUsage};
use crate::models::codex::{ResponsesStreamEvent, ResponsesUsage};
use crate::models::openai::ChatUsage;
use crate::streaming::UpstreamEvent;
use crate::streaming::claude::merge_usage;
use crate::transform::Protocol;

/// Normalized token counts for one completed exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageRecord {
    pub model: String,
    pub date: NaiveDate,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
}

impl UsageRecord {
    pub fn zero(model: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            model: model.into(),
            date,
            input_tokens: 0,
            output_tokens: 0,
            cache_creation_tokens: 0,
            cache_read_tokens: 0,
        }
    }

    pub fn from_claude(model: impl Into<String>, date: NaiveDate, usage: &ClaudeUsage) -> Self {
        Self {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cache_creation_tokens: usage.cache_creation_input_tokens.unwrap_or(0),
            cache_read_tokens: usage.cache_read_input_tokens.unwrap_or(0),
            ..Self::zero(model, date)
        }
    }

    /// Codex input counts include cached tokens; they are split out here
    pub fn from_codex(model: impl Into<String>, date: NaiveDate, usage: &ResponsesUsage) -> Self {
        let cached = usage.cached_tokens();
        Self {
            input_tokens: usage.input_tokens.saturating_sub(cached),
            output_tokens: usage.output_tokens,
            cache_read_tokens: cached,
            ..Self::zero(model, date)
        }
    }

    pub fn from_openai(model: impl Into<String>, date: NaiveDate, usage: &ChatUsage) -> Self {
        Self {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            cache_read_tokens: usage
                .prompt_tokens_details
                .map(|d| d.cached_tokens)
                .unwrap_or(0),
            ..Self::zero(model, date)
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens + self.cache_creation_tokens + self.cache_read_tokens
    }
}

/// Extract usage from a whole response body in its native protocol shape.
///
/// Never fails: an unreadable body or a missing usage section yields zeros.
pub fn extract(protocol: Protocol, fallback_model: &str, body: &[u8], date: NaiveDate) -> UsageRecord {
    let Ok(value) = serde_json::from_slice::<Value>(body) else {
        debug!(protocol = protocol.as_str(), "Usage extraction skipped, body is not JSON");
        return UsageRecord::zero(fallback_model, date);
    };

    let model = value
        .get("model")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .unwrap_or(fallback_model);
    let usage = value.get("usage").cloned().unwrap_or(Value::Null);

    match protocol {
        Protocol::Claude => match serde_json::from_value::<ClaudeUsage>(usage) {
            Ok(usage) => UsageRecord::from_claude(model, date, &usage),
            Err(_) => UsageRecord::zero(model, date),
        },
        Protocol::Codex => match serde_json::from_value::<ResponsesUsage>(usage) {
            Ok(usage) => UsageRecord::from_codex(model, date, &usage),
            Err(_) => UsageRecord::zero(model, date),
        },
        Protocol::OpenAi => match serde_json::from_value::<ChatUsage>(usage) {
            Ok(usage) => UsageRecord::from_openai(model, date, &usage),
            Err(_) => UsageRecord::zero(model, date),
        },
    }
}

/// Usage gathered from upstream stream events as they pass by
#[derive(Debug, Clone)]
pub struct UsageAccumulator {
    family: ProviderFamily,
    model: String,
    claude: ClaudeUsage,
    codex: Option<ResponsesUsage>,
}

impl UsageAccumulator {
    pub fn new(family: ProviderFamily, model: impl Into<String>) -> Self {
        Self {
            family,
            model: model.into(),
            claude: ClaudeUsage::default(),
            codex: None,
        }
    }

    pub fn observe(&mut self, event: &UpstreamEvent) {
        match event {
            UpstreamEvent::Claude(event) => self.observe_claude(event),
            UpstreamEvent::Codex(event) => self.observe_codex(event),
        }
    }

    fn observe_claude(&mut self, event: &ClaudeStreamEvent) {
        match event {
            ClaudeStreamEvent::MessageStart { message } => {
                if !message.model.is_empty() {
                    self.model = message.model.clone();
                }
                self.claude = message.usage;
            }
            ClaudeStreamEvent::MessageDelta {
                usage: Some(usage), ..
            } => merge_usage(&mut self.claude, usage),
            _ => {}
        }
    }

    fn observe_codex(&mut self, event: &ResponsesStreamEvent) {
        match event {
            ResponsesStreamEvent::Completed { response }
            | ResponsesStreamEvent::Incomplete { response }
            | ResponsesStreamEvent::Failed { response } => {
                if !response.model.is_empty() {
                    self.model = response.model.clone();
                }
                if response.usage.is_some() {
                    self.codex = response.usage;
                }
            }
            _ => {}
        }
    }

    pub fn record(&self, date: NaiveDate) -> UsageRecord {
        match self.family {
            ProviderFamily::Claude => UsageRecord::from_claude(&self.model, date, &self.claude),
            ProviderFamily::Codex => match &self.codex {
                Some(usage) => UsageRecord::from_codex(&self.model, date, usage),
                None => UsageRecord::zero(&self.model, date),
            },
        }
    }
}

/// Destination for usage records, fire-and-forget
pub trait UsageSink: Send + Sync {
    fn record(&self, record: UsageRecord);
}

/// Default sink: one structured log line per exchange
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingUsageSink;

impl UsageSink for TracingUsageSink {
    fn record(&self, record: UsageRecord) {
        GATEWAY_METRICS.record_usage();
        info!(
            model = %record.model,
            date = %record.date,
            input_tokens = record.input_tokens,
            output_tokens = record.output_tokens,
            cache_creation_tokens = record.cache_creation_tokens,
            cache_read_tokens = record.cache_read_tokens,
            "Usage recorded"
        );
    }
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}
