use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{claude, codex};
use crate::config::TimeoutConfig;
use crate::credential::{CredentialConfig, ProviderFamily};
use crate::error::{GatewayError, Result};
use crate::retry::TransportKind;
use crate::transport::{
    ProviderStream, SendFuture, Transport, TransportError, UpstreamRequest, UpstreamResponse,
};

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_connect() {
            TransportKind::Connect
        } else if e.is_timeout() {
            TransportKind::Timeout
        } else {
            TransportKind::Reset
        };
        TransportError::new(kind, e.to_string())
    }
}

/// reqwest-backed transport with connect, first-byte and idle timeouts
pub struct HttpTransport {
    client: Client,
    first_byte: Duration,
    idle: Duration,
}

impl HttpTransport {
    pub fn new(timeouts: &TimeoutConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(timeouts.connect())
            .build()
            .map_err(|e| {
                GatewayError::ConfigError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            first_byte: timeouts.first_byte(),
            idle: timeouts.idle(),
        })
    }
}

impl Transport for HttpTransport {
    fn send(&self, credential: Arc<CredentialConfig>, request: UpstreamRequest) -> SendFuture {
        let client = self.client.clone();
        let first_byte = self.first_byte;
        let idle = self.idle;

        Box::pin(async move { Self::send_impl(client, credential, request, first_byte, idle).await })
    }

    fn name(&self) -> &str {
        "http"
    }
}

impl HttpTransport {
    async fn send_impl(
        client: Client,
        credential: Arc<CredentialConfig>,
        request: UpstreamRequest,
        first_byte: Duration,
        idle: Duration,
    ) -> std::result::Result<UpstreamResponse, TransportError> {
        let (url, headers) = match request.family {
            ProviderFamily::Claude => (
                claude::messages_url(&credential.base_url),
                claude::request_headers(&credential, &request.headers, request.stream),
            ),
            ProviderFamily::Codex => (
                codex::responses_url(&credential.base_url),
                codex::request_headers(&credential, &request.headers),
            ),
        };

        info!(
            credential = %credential.id,
            bytes = request.body.len(),
            url = %url,
            "Sending upstream request"
        );

        let pending = client.post(&url).headers(headers).body(request.body).send();
        let response = tokio::time::timeout(first_byte, pending)
            .await
            .map_err(|_| {
                TransportError::new(
                    TransportKind::Timeout,
                    format!("no response within {}s", first_byte.as_secs()),
                )
            })??;

        let status = response.status().as_u16();
        debug!(credential = %credential.id, status, "Upstream responded");

        Ok(UpstreamResponse {
            status,
            headers: response.headers().clone(),
            body: idle_guard(response.bytes_stream(), idle),
        })
    }
}

/// End the stream with a timeout error when no chunk arrives within `idle`
pub fn idle_guard<S>(stream: S, idle: Duration) -> ProviderStream
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut stream = Box::pin(stream);
        loop {
            match tokio::time::timeout(idle, stream.next()).await {
                Ok(Some(Ok(chunk))) => yield Ok(chunk),
                Ok(Some(Err(e))) => {
                    yield Err(TransportError::from(e));
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    yield Err(TransportError::new(
                        TransportKind::Timeout,
                        format!("no data for {}s", idle.as_secs()),
                    ));
                    break;
                }
            }
        }
    })
}
