use axum::http::StatusCode;
use thiserror::Error;

use crate::credential::{NoEligibleReason, ProviderFamily};
use crate::retry::{FailureCategory, TransportKind};

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Unsupported request shape: {0}")]
    UnsupportedRequestShape(String),

    #[error("Missing or malformed client credential: {0}")]
    Unauthorized(String),

    #[error("Transport failure ({kind}): {message}")]
    Transport {
        kind: TransportKind,
        message: String,
    },

    #[error("Upstream error {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("No eligible {family} credential: {reason}")]
    NoEligibleCredential {
        family: ProviderFamily,
        reason: NoEligibleReason,
    },

    #[error("All {family} credentials failed (last: {last})")]
    AllCredentialsFailed {
        family: ProviderFamily,
        last: FailureCategory,
        status: Option<u16>,
        body: Option<String>,
    },

    #[error("Upstream stream truncated after partial delivery: {0}")]
    TruncatedStream(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl GatewayError {
    /// HTTP status surfaced to the client for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::UnsupportedRequestShape(_) | GatewayError::JsonError(_) => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::NoEligibleCredential { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            GatewayError::AllCredentialsFailed { status, .. } => status
                .and_then(|s| StatusCode::from_u16(s).ok())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            GatewayError::Transport {
                kind: TransportKind::Timeout,
                ..
            } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Transport { .. } | GatewayError::TruncatedStream(_) => {
                StatusCode::BAD_GATEWAY
            }
            GatewayError::ConfigError(_) | GatewayError::IoError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Short machine-readable error kind, shared by both error envelopes
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::UnsupportedRequestShape(_) | GatewayError::JsonError(_) => {
                "invalid_request_error"
            }
            GatewayError::Unauthorized(_) => "authentication_error",
            GatewayError::NoEligibleCredential { .. } => "overloaded_error",
            GatewayError::Upstream { .. } | GatewayError::AllCredentialsFailed { .. } => {
                "upstream_error"
            }
            GatewayError::Transport { .. } => "gateway_error",
            GatewayError::TruncatedStream(_) => "stream_truncated",
            GatewayError::ConfigError(_) | GatewayError::IoError(_) => "api_error",
        }
    }

    /// Raw upstream error body to relay, when the failure carries one
    pub fn upstream_body(&self) -> Option<(u16, &str)> {
        match self {
            GatewayError::Upstream { status, body } => Some((*status, body.as_str())),
            GatewayError::AllCredentialsFailed {
                status: Some(status),
                body: Some(body),
                ..
            } => Some((*status, body.as_str())),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
