//! # HTTP Transport
//!
//! The one place bytes leave the device.
//!
//! ## Responsibilities
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  RemoteTransport::send(descriptor, token)                               │
//! │    │                                                                    │
//! │    ├── network failure   ──► Err(ConnectionFailed | Timeout)           │
//! │    └── any HTTP answer   ──► Ok(TransportResponse { status, body })    │
//! │                                                                         │
//! │  Status interpretation, retries, auth refresh and caching belong to    │
//! │  the RequestClient, so a scripted transport can stand in for tests.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use tracing::debug;
use url::Url;

use larder_core::{HttpMethod, RequestDescriptor};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Transport Contract
// =============================================================================

/// Raw HTTP answer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,

    /// Parsed JSON body, `Null` when empty, a string when not JSON.
    pub body: Value,
}

impl TransportResponse {
    pub fn new(status: u16, body: Value) -> Self {
        TransportResponse { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Performs one HTTP exchange.
    async fn send(
        &self,
        request: &RequestDescriptor,
        access_token: Option<&str>,
    ) -> SyncResult<TransportResponse>;
}

// =============================================================================
// reqwest Transport
// =============================================================================

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Creates a transport rooted at `base_url` (e.g. `https://api.larder.app/v1`).
    pub fn new(base_url: &str) -> SyncResult<Self> {
        let parsed = Url::parse(base_url)?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("larder-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::InvalidConfig(e.to_string()))?;

        Ok(HttpTransport {
            client,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
        })
    }

    fn url_for(&self, path: &str) -> SyncResult<Url> {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        Ok(Url::parse(&format!("{}{}", self.base_url, path))?)
    }

    fn method(method: HttpMethod) -> Method {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
        }
    }
}

#[async_trait]
impl RemoteTransport for HttpTransport {
    async fn send(
        &self,
        request: &RequestDescriptor,
        access_token: Option<&str>,
    ) -> SyncResult<TransportResponse> {
        let url = self.url_for(&request.path)?;

        let mut builder = self
            .client
            .request(Self::method(request.method), url)
            .timeout(request.timeout_duration());

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(token) = access_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                SyncError::Timeout(request.timeout_ms)
            } else {
                SyncError::ConnectionFailed(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let text = response.text().await?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        debug!(request = %request.label(), status, "HTTP exchange complete");
        Ok(TransportResponse { status, body })
    }
}
