//! # Model Gateway
//!
//! A failover gateway in front of Claude and Codex upstream credentials.
//!
//! ## Overview
//!
//! Three client shapes are accepted:
//! - **Claude Messages** on `/v1/messages`, forwarded to Claude credentials
//! - **Codex Responses** on `/openai/responses`, forwarded to Codex credentials
//! - **OpenAI Chat Completions** on `/v1/chat/completions`, translated to the
//!   configured bridge target and back
//!
//! Each request walks the priority-ordered credentials of its family. A
//! credential is skipped while disabled, outside its weekly schedule, before
//! its activation instant, or cooling down after repeated failures. The retry
//! policy decides per failure whether to retry the same credential, switch to
//! the next one, or surface the upstream error.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use model_gateway::{AppState, GatewayConfig, handler};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GatewayConfig::from_file("gateway.toml")?;
//! let state = Arc::new(AppState::new(config)?);
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! axum::serve(listener, handler::app(state)).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`credential`] - Credential pools, schedules and health
//! - [`retry`] - Failure classification and retry strategies
//! - [`dispatch`] - Failover loop over eligible credentials
//! - [`transform`] - Request/response translation between protocols
//! - [`streaming`] - SSE decoding, stream translation and aggregation
//! - [`usage`] - Token usage extraction
//! - [`maintenance`] - Startup health check and daily billing activation

pub mod client;
pub mod config;
pub mod credential;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod maintenance;
pub mod metrics;
pub mod models;
pub mod retry;
pub mod state;
pub mod streaming;
pub mod transform;
pub mod transport;
pub mod usage;
pub mod validation;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use state::AppState;
