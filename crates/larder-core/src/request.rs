//! # Request Descriptors
//!
//! Immutable descriptions of one logical remote operation, plus the record
//! kept when such an operation is deferred while offline.
//!
//! ## Default Eligibility
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  method   cacheable   retryable   timeout                              │
//! │  ──────   ─────────   ─────────   ───────                              │
//! │  GET      yes         yes         15s                                   │
//! │  POST     no          yes         15s                                   │
//! │  PUT      no          yes         15s                                   │
//! │  PATCH    no          yes         15s                                   │
//! │  DELETE   no          yes         15s                                   │
//! │                                                                         │
//! │  Generation-class calls use `.timeout(GENERATION_TIMEOUT)` (60s).      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Timeout for long-running generation calls.
pub const GENERATION_TIMEOUT: Duration = Duration::from_secs(60);

// =============================================================================
// HTTP Method
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Returns true for methods that never change remote state.
    pub fn is_read(&self) -> bool {
        matches!(self, HttpMethod::Get)
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Request Descriptor
// =============================================================================

/// One logical remote operation.
///
/// Built once through the constructors and `with_*`/flag methods, then only
/// read. Serializable so deferred requests survive restarts.
///
/// ## Example
/// ```rust
/// use larder_core::RequestDescriptor;
///
/// let request = RequestDescriptor::get("/recipes")
///     .with_query("q", "soup")
///     .cacheable(false);
///
/// assert!(request.is_cacheable_read() == false);
/// assert_eq!(request.query.get("q").map(String::as_str), Some("soup"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub method: HttpMethod,

    /// Path relative to the API base URL, starting with `/`.
    pub path: String,

    /// JSON body for writes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,

    /// Query parameters. Ordered so cache keys are deterministic.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query: BTreeMap<String, String>,

    /// Whether a successful read may be served from / stored in the cache.
    pub cacheable: bool,

    /// Whether transient failures are retried and offline calls deferred.
    pub retryable: bool,

    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl RequestDescriptor {
    fn new(method: HttpMethod, path: impl Into<String>, body: Option<Value>) -> Self {
        RequestDescriptor {
            method,
            path: path.into(),
            body,
            query: BTreeMap::new(),
            cacheable: method.is_read(),
            retryable: true,
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path, None)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(HttpMethod::Post, path, Some(body))
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(HttpMethod::Put, path, Some(body))
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self::new(HttpMethod::Patch, path, Some(body))
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path, None)
    }

    /// Adds a query parameter.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Sets cache eligibility. Ignored for writes.
    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable && self.method.is_read();
        self
    }

    /// Sets retry eligibility.
    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Sets the per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Returns the per-request timeout.
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Returns true if the response may be served from the cache.
    pub fn is_cacheable_read(&self) -> bool {
        self.method.is_read() && self.cacheable
    }

    /// Deterministic key over method, path and query parameters.
    ///
    /// Used both as the cache key and as the mock-response key.
    pub fn cache_key(&self) -> String {
        let mut hasher = DefaultHasher::new();
        self.method.hash(&mut hasher);
        self.path.hash(&mut hasher);
        for (key, value) in &self.query {
            key.hash(&mut hasher);
            value.hash(&mut hasher);
        }
        format!("{:016x}", hasher.finish())
    }

    /// Human-readable label for logs (`GET /recipes?q=soup`).
    pub fn label(&self) -> String {
        if self.query.is_empty() {
            format!("{} {}", self.method, self.path)
        } else {
            let query: Vec<String> = self
                .query
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            format!("{} {}?{}", self.method, self.path, query.join("&"))
        }
    }
}

// =============================================================================
// Queued Request
// =============================================================================

/// A request deferred because there was no connectivity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedRequest {
    /// Unique identifier (UUID v4).
    pub id: String,

    pub descriptor: RequestDescriptor,

    pub queued_at: DateTime<Utc>,

    /// Number of replays that already failed.
    pub retry_count: u32,
}

impl QueuedRequest {
    pub fn new(descriptor: RequestDescriptor) -> Self {
        QueuedRequest {
            id: Uuid::new_v4().to_string(),
            descriptor,
            queued_at: Utc::now(),
            retry_count: 0,
        }
    }
}
