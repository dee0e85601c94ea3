//! Page generation service interface.
//!
//! The engine treats generated pages as opaque JSON stored verbatim. Only the
//! error classification matters here: transient errors are retried, permanent
//! ones fail the item at once.

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use crate::error::GenerationError;
use crate::types::page::PageRequest;

/// Longest response body kept in an error detail.
const MAX_ERROR_BODY: usize = 500;

/// Generates one page from a request.
#[async_trait]
pub trait PageGenerator: Send + Sync {
    async fn generate(&self, request: &PageRequest) -> Result<serde_json::Value, GenerationError>;
}

/// Generation service reached over HTTP.
///
/// POSTs the page request as JSON, the same body the single-page endpoint
/// accepts, and returns the decoded JSON response.
pub struct HttpGenerator {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpGenerator {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            token,
        }
    }

    /// Use an existing client (shared connection pool, custom timeouts).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl PageGenerator for HttpGenerator {
    async fn generate(&self, request: &PageRequest) -> Result<serde_json::Value, GenerationError> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let resp = builder.send().await.map_err(classify_transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), mode = %request.mode, "generation request rejected");
            return Err(classify_status(status, &body));
        }

        resp.json::<serde_json::Value>().await.map_err(|e| {
            if e.is_decode() {
                GenerationError::permanent(format!("undecodable response: {}", e))
            } else {
                classify_transport_error(e)
            }
        })
    }
}

/// Classify a non-success HTTP status.
///
/// 408, 429 and 5xx are transient; every other status is permanent.
pub fn classify_status(status: StatusCode, body: &str) -> GenerationError {
    let detail = format!("HTTP {}: {}", status.as_u16(), truncate(body, MAX_ERROR_BODY));

    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        GenerationError::transient(detail)
    } else {
        GenerationError::permanent(detail)
    }
}

/// Classify a transport-level failure.
///
/// Timeouts and connection failures are transient; a request that could not
/// be built is permanent.
fn classify_transport_error(err: reqwest::Error) -> GenerationError {
    if err.is_timeout() {
        GenerationError::transient(format!("timeout: {}", err))
    } else if err.is_connect() {
        GenerationError::transient(format!("connection error: {}", err))
    } else if err.is_builder() {
        GenerationError::permanent(format!("invalid request: {}", err))
    } else {
        GenerationError::transient(err.to_string())
    }
}

fn truncate(body: &str, max_chars: usize) -> &str {
    match body.char_indices().nth(max_chars) {
        Some((end, _)) => &body[..end],
        None => body,
    }
}
