pub mod inspect;

use arc_swap::ArcSwap;
use axum::http::HeaderMap;
use bytes::Bytes;
use chrono::{DateTime, Local};
use futures::{StreamExt, stream};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::credential::{Candidate, CredentialRegistry, NoEligibleReason, Outcome};
use crate::error::{GatewayError, Result};
use crate::metrics::GATEWAY_METRICS;
use crate::retry::{FailureCategory, RetryAction, RetryPolicy, TransportKind};
use crate::transport::{ProviderStream, Transport, TransportError, UpstreamRequest, collect_body};

/// Wall clock used for eligibility and cooldown arithmetic
pub type Clock = Arc<dyn Fn() -> DateTime<Local> + Send + Sync>;

pub enum ResponseBody {
    Complete(Bytes),
    /// Live event stream, first chunk already inspected
    Streaming(ProviderStream),
}

/// Successful upstream exchange handed back to the handler
pub struct DispatchSuccess {
    pub credential_id: String,
    pub status: u16,
    pub headers: HeaderMap,
    pub body: ResponseBody,
    pub lease: StreamLease,
}

/// Keeps the serving credential reachable while its response is relayed.
///
/// A stream that breaks after delivery started is reported through here.
#[derive(Clone)]
pub struct StreamLease {
    registry: Arc<CredentialRegistry>,
    candidate: Candidate,
}

impl StreamLease {
    pub fn new(registry: Arc<CredentialRegistry>, candidate: Candidate) -> Self {
        Self {
            registry,
            candidate,
        }
    }

    pub fn credential_id(&self) -> &str {
        self.candidate.id()
    }

    /// Count a post-delivery failure against the credential; never retried
    pub fn report_truncated(&self, kind: TransportKind) {
        GATEWAY_METRICS.record_truncated();
        self.registry.report_at(
            &self.candidate,
            Outcome::Failure(FailureCategory::Transport(kind)),
            Local::now(),
        );
    }
}

/// One failed attempt, classified for the retry policy
#[derive(Debug, Clone)]
struct AttemptFailure {
    category: FailureCategory,
    status: Option<u16>,
    body: Option<String>,
    message: String,
}

impl AttemptFailure {
    fn transport(err: TransportError) -> Self {
        Self {
            category: FailureCategory::Transport(err.kind),
            status: None,
            body: None,
            message: err.message,
        }
    }

    fn status(status: u16, body: String) -> Self {
        Self {
            category: FailureCategory::Status(status),
            status: Some(status),
            message: format!("upstream returned HTTP {}", status),
            body: Some(body),
        }
    }

    fn into_surfaced(self) -> GatewayError {
        match self.category {
            FailureCategory::Transport(kind) => GatewayError::Transport {
                kind,
                message: self.message,
            },
            FailureCategory::Status(status) => GatewayError::Upstream {
                status,
                body: self.body.unwrap_or_default(),
            },
        }
    }
}

/// Drives one request across the priority-ordered candidates of a family
pub struct Dispatcher {
    registry: Arc<CredentialRegistry>,
    transport: Arc<dyn Transport>,
    policy: ArcSwap<RetryPolicy>,
    clock: Clock,
}

impl Dispatcher {
    pub fn new(registry: Arc<CredentialRegistry>, transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self {
            registry,
            transport,
            policy: ArcSwap::from_pointee(policy),
            clock: Arc::new(Local::now),
        }
    }

    /// Replace the wall clock, for deterministic cooldown arithmetic
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn set_policy(&self, policy: RetryPolicy) {
        self.policy.store(Arc::new(policy));
    }

    pub fn registry(&self) -> &Arc<CredentialRegistry> {
        &self.registry
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    fn now(&self) -> DateTime<Local> {
        (self.clock)()
    }

    /// Send `request` to the first credential that succeeds.
    ///
    /// The candidate list is a snapshot taken once; a candidate that turned
    /// ineligible in the meantime (a concurrent request cooled it) is skipped.
    /// Only the final outcome reaches the caller.
    pub async fn dispatch(&self, request: UpstreamRequest) -> Result<DispatchSuccess> {
        let family = request.family;
        let started = Instant::now();
        GATEWAY_METRICS.record_dispatch();

        let candidates = match self.registry.select_at(family, self.now()) {
            Ok(candidates) => candidates,
            Err(reason) => {
                GATEWAY_METRICS.record_no_eligible();
                warn!(family = %family, reason = %reason, "No eligible credential");
                return Err(GatewayError::NoEligibleCredential { family, reason });
            }
        };
        let policy = self.policy.load_full();
        let mut last: Option<AttemptFailure> = None;

        for candidate in &candidates {
            let state = candidate.state_at(self.now());
            if !state.is_eligible() {
                debug!(credential = %candidate.id(), state = state.label(), "Candidate no longer eligible, skipped");
                continue;
            }

            let mut attempt = 1;
            loop {
                let failure = match self.attempt(candidate, &request).await {
                    Ok(success) => {
                        self.registry.report_at(candidate, Outcome::Success, self.now());
                        GATEWAY_METRICS.record_success(started.elapsed());
                        info!(
                            credential = %candidate.id(),
                            family = %family,
                            status = success.status,
                            attempt,
                            "Upstream request succeeded"
                        );
                        return Ok(success);
                    }
                    Err(failure) => failure,
                };

                let decision = policy.decide(failure.category);
                match decision.action {
                    RetryAction::SurfaceToClient => {
                        warn!(
                            credential = %candidate.id(),
                            family = %family,
                            category = %failure.category,
                            "Upstream error surfaced to client"
                        );
                        return Err(failure.into_surfaced());
                    }
                    RetryAction::RetrySame | RetryAction::RetrySameWithBackoff(_)
                        if attempt < decision.max_attempts =>
                    {
                        GATEWAY_METRICS.record_retry();
                        info!(
                            credential = %candidate.id(),
                            family = %family,
                            category = %failure.category,
                            attempt,
                            max_attempts = decision.max_attempts,
                            "Retrying same credential"
                        );
                        if let RetryAction::RetrySameWithBackoff(delay) = decision.action {
                            tokio::time::sleep(delay).await;
                        }
                        attempt += 1;
                    }
                    _ => {
                        self.registry.report_at(
                            candidate,
                            Outcome::Failure(failure.category),
                            self.now(),
                        );
                        GATEWAY_METRICS.record_switch();
                        warn!(
                            credential = %candidate.id(),
                            family = %family,
                            category = %failure.category,
                            error = %failure.message,
                            attempts = attempt,
                            "Switching credential"
                        );
                        last = Some(failure);
                        break;
                    }
                }
            }
        }

        GATEWAY_METRICS.record_exhausted();
        match last {
            Some(failure) => {
                warn!(family = %family, last = %failure.category, "All credentials failed");
                Err(GatewayError::AllCredentialsFailed {
                    family,
                    last: failure.category,
                    status: failure.status,
                    body: failure.body,
                })
            }
            None => {
                let reason = self
                    .registry
                    .select_at(family, self.now())
                    .err()
                    .unwrap_or(NoEligibleReason::NoneConfigured);
                warn!(family = %family, reason = %reason, "Every candidate turned ineligible");
                Err(GatewayError::NoEligibleCredential { family, reason })
            }
        }
    }

    async fn attempt(
        &self,
        candidate: &Candidate,
        request: &UpstreamRequest,
    ) -> std::result::Result<DispatchSuccess, AttemptFailure> {
        let response = self
            .transport
            .send(candidate.config.clone(), request.clone())
            .await
            .map_err(AttemptFailure::transport)?;

        let status = response.status;
        if !response.is_success() {
            // a broken error body still classifies by status
            let body = collect_body(response.body).await.unwrap_or_default();
            return Err(AttemptFailure::status(
                status,
                String::from_utf8_lossy(&body).into_owned(),
            ));
        }

        let is_event_stream = response.is_event_stream();
        let headers = response.headers;
        let mut upstream = response.body;

        let body = if is_event_stream {
            match upstream.next().await {
                Some(Ok(first)) => {
                    if let Some((status, body)) = inspect::first_chunk_error(request.family, &first) {
                        return Err(AttemptFailure::status(status, body));
                    }
                    let replay = stream::once(async move { Ok::<Bytes, TransportError>(first) });
                    ResponseBody::Streaming(Box::pin(replay.chain(upstream)))
                }
                Some(Err(e)) => return Err(AttemptFailure::transport(e)),
                None => {
                    return Err(AttemptFailure::transport(TransportError::new(
                        TransportKind::Reset,
                        "upstream sent an empty event stream",
                    )));
                }
            }
        } else {
            ResponseBody::Complete(collect_body(upstream).await.map_err(AttemptFailure::transport)?)
        };

        Ok(DispatchSuccess {
            credential_id: candidate.id().to_string(),
            status,
            headers,
            body,
            lease: StreamLease::new(self.registry.clone(), candidate.clone()),
        })
    }
}
