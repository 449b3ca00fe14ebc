//! Background credential checks.
//!
//! On startup every enabled credential receives one small real request, and
//! credentials with a daily activation time get the same request at that time
//! each day to open their billing window. Failed activations are retried until
//! the daily attempt limit is reached. Every ping goes through the shared
//! [`Transport`] and its outcome is reported to the registry like a regular
//! exchange.

use axum::http::HeaderMap;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeDelta};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::credential::{CredentialConfig, CredentialRegistry, Outcome, ProviderFamily};
use crate::dispatch::inspect::status_for_error_type;
use crate::error::{GatewayError, Result};
use crate::retry::{FailureCategory, TransportKind};
use crate::state::AppState;
use crate::streaming::aggregate;
use crate::transform::{Adapter, ModelMapper, Protocol, TranslateContext};
use crate::transport::{Transport, UpstreamRequest, collect_body};

pub const PING_PROMPT: &str = "Introduce yourself and your abilities in about fifty words.";
const PING_SYSTEM: &str = "You are a helpful assistant.";
const PING_MAX_TOKENS: u32 = 200;

/// A missed activation time still fires if the scheduler wakes up within this window
fn late_start_grace() -> TimeDelta {
    TimeDelta::minutes(5)
}

/// Build the ping for `family` through the chat bridge
pub fn ping_request(family: ProviderFamily, config: &GatewayConfig) -> Result<UpstreamRequest> {
    let chat = json!({
        "model": config.maintenance.model(family),
        "max_tokens": PING_MAX_TOKENS,
        "stream": false,
        "messages": [
            {"role": "system", "content": PING_SYSTEM},
            {"role": "user", "content": PING_PROMPT}
        ]
    });
    let mapper = ModelMapper::default();
    let ctx = TranslateContext {
        mapper: &mapper,
        bridge: &config.openai_bridge,
        cache_control_limit: config.optimization.cache_control_limit,
    };
    let translated = Adapter::select(Protocol::OpenAi, family).translate_request(&serde_json::to_vec(&chat)?, &ctx)?;

    Ok(UpstreamRequest {
        family,
        headers: translated.upstream_headers(&HeaderMap::new()),
        body: translated.body,
        stream: translated.upstream_stream,
    })
}

/// Judge an upstream reply the way the dispatcher would, plus an empty-answer check
async fn ping_outcome(
    transport: &dyn Transport,
    credential: Arc<CredentialConfig>,
    request: UpstreamRequest,
) -> Outcome {
    let family = request.family;
    let response = match transport.send(credential, request).await {
        Ok(response) => response,
        Err(e) => return Outcome::Failure(FailureCategory::Transport(e.kind)),
    };
    if !response.is_success() {
        return Outcome::Failure(FailureCategory::Status(response.status));
    }

    if response.is_event_stream() {
        return match aggregate(family, response.body).await {
            Ok(_) => Outcome::Success,
            Err(GatewayError::Upstream { status, .. }) => Outcome::Failure(FailureCategory::Status(status)),
            Err(GatewayError::Transport { kind, .. }) => Outcome::Failure(FailureCategory::Transport(kind)),
            Err(_) => Outcome::Failure(FailureCategory::Transport(TransportKind::Reset)),
        };
    }

    let body = match collect_body(response.body).await {
        Ok(body) => body,
        Err(e) => return Outcome::Failure(FailureCategory::Transport(e.kind)),
    };
    let value: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    if let Some(kind) = value
        .pointer("/error/type")
        .or_else(|| value.pointer("/error/code"))
        .and_then(Value::as_str)
    {
        return Outcome::Failure(FailureCategory::Status(status_for_error_type(kind)));
    }

    let answered = match family {
        ProviderFamily::Claude => value.get("content"),
        ProviderFamily::Codex => value.get("output"),
    }
    .and_then(Value::as_array)
    .is_some_and(|items| !items.is_empty());
    if answered {
        Outcome::Success
    } else {
        // 200 without an answer
        Outcome::Failure(FailureCategory::Status(502))
    }
}

/// Per-credential activation progress for the current day
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ActivationState {
    attempts: u32,
    last_attempt: Option<NaiveDateTime>,
    activated: bool,
}

/// Decides which credentials owe an activation ping; state resets every day
#[derive(Debug, Default)]
pub struct ActivationScheduler {
    day: Option<NaiveDate>,
    states: HashMap<(ProviderFamily, String), ActivationState>,
}

impl ActivationScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credentials due for a ping at `now`
    pub fn due(&mut self, config: &GatewayConfig, now: NaiveDateTime) -> Vec<(ProviderFamily, CredentialConfig)> {
        if self.day != Some(now.date()) {
            if self.day.is_some() {
                debug!(date = %now.date(), "Activation state reset for the new day");
            }
            self.day = Some(now.date());
            self.states.clear();
        }

        let policy = &config.maintenance;
        let mut due = Vec::new();
        for family in [ProviderFamily::Claude, ProviderFamily::Codex] {
            for credential in config.credentials(family).iter().filter(|c| c.enabled) {
                let Some(at) = credential.daily_activation() else {
                    continue;
                };
                let state = self.states.entry((family, credential.id.clone())).or_default();
                if state.activated || state.attempts >= policy.max_attempts {
                    continue;
                }

                let ready = match state.last_attempt {
                    None => {
                        let start = now.date().and_time(at);
                        now >= start && now < start + late_start_grace()
                    }
                    Some(last) => now - last >= policy.retry_interval(),
                };
                if ready {
                    due.push((family, credential.clone()));
                }
            }
        }
        due
    }

    pub fn record(&mut self, family: ProviderFamily, id: &str, now: NaiveDateTime, success: bool) {
        let state = self.states.entry((family, id.to_string())).or_default();
        state.attempts += 1;
        state.last_attempt = Some(now);
        state.activated = success;
    }

    pub fn attempts(&self, family: ProviderFamily, id: &str) -> u32 {
        self.states
            .get(&(family, id.to_string()))
            .map_or(0, |s| s.attempts)
    }
}

/// Counts from one startup check
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckSummary {
    pub healthy: Vec<String>,
    pub failed: Vec<String>,
}

/// Sends pings and reports their outcomes
pub struct Maintenance {
    registry: Arc<CredentialRegistry>,
    transport: Arc<dyn Transport>,
}

impl Maintenance {
    pub fn new(registry: Arc<CredentialRegistry>, transport: Arc<dyn Transport>) -> Self {
        Self { registry, transport }
    }

    async fn ping(
        &self,
        family: ProviderFamily,
        credential: CredentialConfig,
        config: &GatewayConfig,
        now: DateTime<Local>,
    ) -> Outcome {
        let id = credential.id.clone();
        let outcome = match ping_request(family, config) {
            Ok(request) => ping_outcome(self.transport.as_ref(), Arc::new(credential), request).await,
            Err(e) => {
                warn!(credential = %id, family = %family, "Could not build ping: {}", e);
                return Outcome::Failure(FailureCategory::Status(400));
            }
        };
        self.registry.report_outcome_at(family, &id, outcome, now);
        outcome
    }

    /// Ping every enabled credential once
    pub async fn startup_check(&self, config: &GatewayConfig) -> CheckSummary {
        info!("Startup health check started");
        let mut summary = CheckSummary::default();
        let mut first = true;

        for family in [ProviderFamily::Claude, ProviderFamily::Codex] {
            for credential in config.credentials(family).iter().filter(|c| c.enabled) {
                if !std::mem::take(&mut first) {
                    tokio::time::sleep(config.maintenance.pause()).await;
                }
                let name = credential.display_name().to_string();
                match self.ping(family, credential.clone(), config, Local::now()).await {
                    Outcome::Success => {
                        info!(credential = %credential.id, family = %family, "Credential healthy");
                        summary.healthy.push(name);
                    }
                    Outcome::Failure(category) => {
                        warn!(credential = %credential.id, family = %family, failure = %category, "Credential failed health check");
                        summary.failed.push(name);
                    }
                }
            }
        }

        if summary.failed.is_empty() {
            info!(healthy = summary.healthy.len(), "All credentials healthy");
        } else {
            warn!(
                healthy = summary.healthy.len(),
                failed = summary.failed.len(),
                failing = %summary.failed.join(", "),
                "Startup health check found failing credentials"
            );
        }
        summary
    }

    /// Ping every credential whose activation is due at `now`
    pub async fn activation_tick(
        &self,
        scheduler: &mut ActivationScheduler,
        config: &GatewayConfig,
        now: DateTime<Local>,
    ) -> Vec<(String, Outcome)> {
        let due = scheduler.due(config, now.naive_local());
        let mut results = Vec::with_capacity(due.len());

        for (i, (family, credential)) in due.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(config.maintenance.pause()).await;
            }
            let id = credential.id.clone();
            let attempt = scheduler.attempts(family, &id) + 1;
            info!(credential = %id, family = %family, attempt, "Sending billing activation");

            let outcome = self.ping(family, credential, config, now).await;
            scheduler.record(family, &id, now.naive_local(), outcome == Outcome::Success);
            match outcome {
                Outcome::Success => info!(credential = %id, family = %family, "Billing activation succeeded"),
                Outcome::Failure(category) if attempt >= config.maintenance.max_attempts => warn!(
                    credential = %id,
                    family = %family,
                    failure = %category,
                    "Billing activation gave up for today"
                ),
                Outcome::Failure(category) => warn!(
                    credential = %id,
                    family = %family,
                    failure = %category,
                    retry_in_secs = config.maintenance.retry_interval_secs,
                    "Billing activation failed"
                ),
            }
            results.push((id, outcome));
        }
        results
    }
}

/// Run the startup check, then the activation scheduler for the life of the process
pub fn spawn(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let maintenance = Maintenance::new(state.registry().clone(), state.transport().clone());
        let config = state.config();
        if config.maintenance.startup_check {
            maintenance.startup_check(&config).await;
        }

        let mut scheduler = ActivationScheduler::new();
        let mut ticker = tokio::time::interval(config.maintenance.tick());
        loop {
            ticker.tick().await;
            maintenance
                .activation_tick(&mut scheduler, &state.config(), Local::now())
                .await;
        }
    })
}
