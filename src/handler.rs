use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use chrono::Local;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::credential::ProviderFamily;
use crate::dispatch::{DispatchSuccess, ResponseBody};
use crate::error::{GatewayError, Result};
use crate::metrics::GATEWAY_METRICS;
use crate::models::claude::ClaudeErrorBody;
use crate::models::openai::OpenAiErrorBody;
use crate::retry::TransportKind;
use crate::state::AppState;
use crate::streaming::{StreamContext, aggregate, client_stream};
use crate::transform::{Adapter, Protocol, TranslateContext, TranslatedRequest};
use crate::transport::UpstreamRequest;
use crate::usage::{self, today};
use crate::validation::validate_client_auth;

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/messages", post(handle_messages))
        .route("/openai/responses", post(handle_responses))
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/health", get(handle_health))
        .with_state(state)
}

pub async fn handle_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    serve(state, Protocol::Claude, headers, body).await
}

pub async fn handle_responses(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    serve(state, Protocol::Codex, headers, body).await
}

pub async fn handle_chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    serve(state, Protocol::OpenAi, headers, body).await
}

/// Credential states per family plus the metrics snapshot
pub async fn handle_health(State(state): State<Arc<AppState>>) -> Response {
    let statuses = state.registry().statuses_at(Local::now());
    let metrics = GATEWAY_METRICS.snapshot();
    info!("{}", metrics);
    Json(json!({
        "status": "ok",
        "credentials": statuses,
        "metrics": metrics,
    }))
    .into_response()
}

async fn serve(state: Arc<AppState>, protocol: Protocol, headers: HeaderMap, body: Bytes) -> Response {
    let adapter = Adapter::select(protocol, state.config().openai_bridge.target);
    match relay(&state, adapter, &headers, &body).await {
        Ok(response) => response,
        Err(e) => {
            error!(protocol = protocol.as_str(), status = e.status_code().as_u16(), "Request failed: {}", e);
            error_response(adapter, &e)
        }
    }
}

async fn relay(state: &AppState, adapter: Adapter, headers: &HeaderMap, body: &[u8]) -> Result<Response> {
    validate_client_auth(headers)?;

    let config = state.config();
    let mapper = state.mapper();
    let ctx = TranslateContext {
        mapper: &mapper,
        bridge: &config.openai_bridge,
        cache_control_limit: config.optimization.cache_control_limit,
    };
    let translated = adapter.translate_request(body, &ctx)?;
    let family = adapter.target();
    info!(
        protocol = adapter.client_protocol().as_str(),
        family = %family,
        model = %translated.client_model,
        upstream_model = %translated.upstream_model,
        stream = translated.client_stream,
        "Dispatching request"
    );

    let request = UpstreamRequest {
        family,
        body: translated.body.clone(),
        headers: translated.upstream_headers(headers),
        stream: translated.upstream_stream,
    };
    let success = state.dispatcher().dispatch(request).await?;
    respond(state, adapter, translated, success).await
}

async fn respond(
    state: &AppState,
    adapter: Adapter,
    translated: TranslatedRequest,
    success: DispatchSuccess,
) -> Result<Response> {
    let family = adapter.target();
    let status = StatusCode::from_u16(success.status).unwrap_or(StatusCode::OK);

    let upstream_body = match success.body {
        ResponseBody::Complete(bytes) => bytes,
        ResponseBody::Streaming(stream) if translated.client_stream => {
            let ctx = StreamContext {
                adapter,
                client_model: translated.client_model,
                upstream_model: translated.upstream_model,
                lease: success.lease,
                usage_sink: state.usage_sink(),
            };
            return Ok(event_stream(client_stream(stream, ctx)));
        }
        ResponseBody::Streaming(stream) => match aggregate(family, stream).await {
            Ok(bytes) => bytes,
            Err(e) => {
                match &e {
                    GatewayError::Transport { kind, .. } => success.lease.report_truncated(*kind),
                    GatewayError::TruncatedStream(_) => {
                        success.lease.report_truncated(TransportKind::Reset)
                    }
                    _ => {}
                }
                warn!(credential = %success.credential_id, "Aggregating upstream stream failed: {}", e);
                return Err(e);
            }
        },
    };

    let record = usage::extract(
        upstream_protocol(family),
        &translated.upstream_model,
        &upstream_body,
        today(),
    );
    state.usage_sink().record(record);

    let body = adapter.translate_response(&upstream_body, &translated.client_model)?;
    Ok(json_body(status, body))
}

fn upstream_protocol(family: ProviderFamily) -> Protocol {
    match family {
        ProviderFamily::Claude => Protocol::Claude,
        ProviderFamily::Codex => Protocol::Codex,
    }
}

fn event_stream<S>(stream: S) -> Response
where
    S: futures::Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send + 'static,
{
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

fn json_body(status: StatusCode, body: Bytes) -> Response {
    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}

/// Render an error in the envelope of the client protocol.
///
/// Upstream error bodies are relayed (re-shaped for translated routes) with
/// the upstream status; everything else gets a gateway-generated envelope.
fn error_response(adapter: Adapter, err: &GatewayError) -> Response {
    let status = err.status_code();
    if let Some((upstream_status, body)) = err.upstream_body()
        && !body.trim().is_empty()
    {
        return json_body(status, adapter.translate_error(upstream_status, body.as_bytes()));
    }

    let body = match adapter.client_protocol() {
        Protocol::Claude => serde_json::to_vec(&ClaudeErrorBody::new(err.kind(), err.to_string())),
        Protocol::OpenAi | Protocol::Codex => {
            serde_json::to_vec(&OpenAiErrorBody::new(err.kind(), err.to_string(), None))
        }
    };
    json_body(status, Bytes::from(body.unwrap_or_default()))
}
