//! Transport seam between the session and the analysis backend.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::header::ACCEPT;
use reqwest::header::HeaderValue;
use serde::Deserialize;
use thiserror::Error;
use vizstream_protocol::DebugRequest;

use crate::config_loader::VizConfig;

/// Errors that end a session in the `Failed` phase.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection refused, reset, or body unreadable.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Backend answered with a non-success status.
    #[error("Backend error ({status}): {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error text from the backend.
        message: String,
    },

    /// Stream failed after it was opened.
    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Body chunks of an open debug stream. Dropping it closes the stream.
pub type ChunkStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Opens debug streams for the session controller.
#[async_trait]
pub trait DebugTransport: Send + Sync + 'static {
    async fn open(&self, request: &DebugRequest) -> Result<ChunkStream, TransportError>;
}

/// Error body shapes seen from debug backends.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(alias = "detail", alias = "message")]
    error: String,
}

/// POSTs the request as JSON and streams the `text/event-stream` body.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(config: &VizConfig) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| TransportError::InvalidConfig(format!("http client: {e}")))?;
        Ok(Self::with_client(client, config.endpoint()))
    }

    /// Uses a caller-provided client, e.g. one with custom headers.
    pub fn with_client(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl DebugTransport for HttpTransport {
    async fn open(&self, request: &DebugRequest) -> Result<ChunkStream, TransportError> {
        tracing::debug!("opening debug stream at {}", self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<ErrorBody>(&error_text) {
                Ok(body) => body.error,
                Err(_) => error_text,
            };
            return Err(TransportError::Status {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(TransportError::Network))
            .boxed())
    }
}
