use axum::http::HeaderMap;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

use crate::credential::{CredentialConfig, ProviderFamily};
use crate::retry::TransportKind;

/// Transport-level failure, classified for the retry policy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct TransportError {
    pub kind: TransportKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Type alias for an upstream body delivered chunk by chunk
pub type ProviderStream =
    Pin<Box<dyn Stream<Item = std::result::Result<Bytes, TransportError>> + Send>>;

/// Type alias for the future returned by [`Transport::send`]
pub type SendFuture =
    Pin<Box<dyn Future<Output = std::result::Result<UpstreamResponse, TransportError>> + Send>>;

/// Translated request ready to leave the gateway
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub family: ProviderFamily,
    pub body: Bytes,
    /// Client headers eligible for forwarding
    pub headers: HeaderMap,
    pub stream: bool,
}

pub struct UpstreamResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: ProviderStream,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_event_stream(&self) -> bool {
        is_event_stream(&self.headers)
    }
}

pub fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/event-stream"))
}

/// Read a whole body, failing on the first transport error
pub async fn collect_body(mut body: ProviderStream) -> std::result::Result<Bytes, TransportError> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = body.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

/// Outbound side of a dispatch: one HTTP exchange with one credential.
///
/// Dropping the returned future or body stream cancels the upstream call.
pub trait Transport: Send + Sync {
    fn send(&self, credential: Arc<CredentialConfig>, request: UpstreamRequest) -> SendFuture;

    /// Get the transport name for logging
    fn name(&self) -> &str;
}
