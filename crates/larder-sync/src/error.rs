//! # Sync Error Types
//!
//! Error types for the request client and the sync coordinator.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │  Connectivity   │  │  Authentication         │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  NoConnectivity │  │  AuthenticationFailed   │ │
//! │  │  InvalidUrl     │  │  QueuedForLater │  │  (terminal, credentials │ │
//! │  │  ConfigLoad/Save│  │  Offline        │  │   already cleared)      │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │ Transient Remote│  │ Permanent Remote│  │  Local                  │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Timeout        │  │  Api (4xx)      │  │  Store                  │ │
//! │  │  ConnectionFail │  │  InvalidResponse│  │  Core                   │ │
//! │  │  Api (5xx, 429) │  │                 │  │  ConflictNotFound       │ │
//! │  │  RetriesExhaust │  │                 │  │  AmbiguousConflict      │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every non-success outcome can be normalized into an [`ApiError`] with
//! [`SyncError::to_api_error`] for the app UI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use ts_rs::TS;

use larder_core::CoreError;
use larder_store::StoreError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// HTTP statuses treated as transient.
pub const TRANSIENT_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Returns true if a response status is worth retrying.
pub fn is_transient_status(status: u16) -> bool {
    TRANSIENT_STATUSES.contains(&status)
}

// =============================================================================
// ApiError
// =============================================================================

/// The uniform error shape surfaced to callers and sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ApiError {
    /// Machine-readable code (`NOT_FOUND`, `NO_CONNECTIVITY`, ...).
    pub code: String,

    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "unknown")]
    pub details: Option<Value>,

    #[serde(default = "Utc::now")]
    #[ts(as = "String")]
    pub timestamp: DateTime<Utc>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError {
            code: code.into(),
            message: message.into(),
            details: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

// =============================================================================
// SyncError
// =============================================================================

#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Connectivity Errors
    // =========================================================================
    /// Offline and the request is not retry-eligible.
    #[error("No network connectivity")]
    NoConnectivity,

    /// Offline; the request was stored and will be replayed on reconnect.
    #[error("Offline: request {request_id} queued for later")]
    QueuedForLater { request_id: String },

    /// A manual sync was requested while offline.
    #[error("Cannot sync while offline")]
    Offline,

    // =========================================================================
    // Authentication Errors
    // =========================================================================
    /// Credential refresh failed. Stored credentials have been cleared.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    // =========================================================================
    // Remote Errors
    // =========================================================================
    /// Request exceeded its timeout.
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// The transport could not reach the server.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {error}")]
    Api { status: u16, error: ApiError },

    /// Transient failures persisted through every retry.
    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// The response body did not have the expected shape.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    // =========================================================================
    // Local Errors
    // =========================================================================
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("No conflict recorded for {entity_id}")]
    ConflictNotFound { entity_id: String },

    /// Conflicts for both a recipe and a collection carry this id.
    #[error("Several conflicts recorded for {entity_id}; name the entity type")]
    AmbiguousConflict { entity_id: String },

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SyncError::Timeout(0)
        } else if err.is_decode() {
            SyncError::InvalidResponse(err.to_string())
        } else {
            SyncError::ConnectionFailed(err.to_string())
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the failure is transient and the call may be retried.
    ///
    /// ## Retryable Errors
    /// - Timeouts
    /// - Connection failures while the monitor reports online
    /// - HTTP 408, 429, 500, 502, 503, 504
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Timeout(_) | SyncError::ConnectionFailed(_) => true,
            SyncError::Api { status, .. } => is_transient_status(*status),
            _ => false,
        }
    }

    /// Returns true if the failure is about missing connectivity.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            SyncError::NoConnectivity | SyncError::QueuedForLater { .. } | SyncError::Offline
        )
    }

    /// Returns true if the failure needs the user to sign in again.
    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::AuthenticationFailed(_))
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// HTTP status, if the server produced this error.
    pub fn status(&self) -> Option<u16> {
        match self {
            SyncError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Normalizes the error into the uniform [`ApiError`] shape.
    pub fn to_api_error(&self) -> ApiError {
        let code = match self {
            SyncError::Api { error, .. } => return error.clone(),
            SyncError::InvalidConfig(_)
            | SyncError::InvalidUrl(_)
            | SyncError::ConfigLoadFailed(_)
            | SyncError::ConfigSaveFailed(_) => "CONFIG_ERROR",
            SyncError::NoConnectivity => "NO_CONNECTIVITY",
            SyncError::QueuedForLater { .. } => "QUEUED_FOR_LATER",
            SyncError::Offline => "OFFLINE",
            SyncError::AuthenticationFailed(_) => "AUTHENTICATION_FAILED",
            SyncError::Timeout(_) => "TIMEOUT",
            SyncError::ConnectionFailed(_) => "NETWORK_ERROR",
            SyncError::RetriesExhausted { .. } => "RETRIES_EXHAUSTED",
            SyncError::InvalidResponse(_) => "INVALID_RESPONSE",
            SyncError::Store(_) => "STORE_ERROR",
            SyncError::Core(_) => "INVALID_INPUT",
            SyncError::ConflictNotFound { .. } => "CONFLICT_NOT_FOUND",
            SyncError::AmbiguousConflict { .. } => "AMBIGUOUS_CONFLICT",
            SyncError::SerializationFailed(_) => "SERIALIZATION_ERROR",
            SyncError::Internal(_) => "INTERNAL_ERROR",
        };

        let api_error = ApiError::new(code, self.to_string());
        match self {
            SyncError::QueuedForLater { request_id } => {
                api_error.with_details(serde_json::json!({ "requestId": request_id }))
            }
            SyncError::RetriesExhausted { attempts, .. } => {
                api_error.with_details(serde_json::json!({ "attempts": attempts }))
            }
            _ => api_error,
        }
    }
}
