//! # Wire Protocol
//!
//! Response envelopes of the remote API and the credential refresh payloads.
//!
//! ## Envelopes
//! ```text
//! success:  { "data": <any>, "status": "success", "timestamp": "..." }
//! error:    { "code": "NOT_FOUND", "message": "...", "details": {...}, "timestamp": "..." }
//! refresh:  POST /auth/refresh { "refreshToken": "..." }
//!           → data: { "accessToken": "...", "refreshToken": "..." }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApiError;

/// Credential refresh endpoint.
pub const REFRESH_PATH: &str = "/auth/refresh";

// =============================================================================
// Envelopes
// =============================================================================

/// Successful response wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessEnvelope {
    pub data: Value,

    #[serde(default)]
    pub status: Value,

    #[serde(default)]
    pub timestamp: Option<String>,
}

impl SuccessEnvelope {
    pub fn new(data: Value) -> Self {
        SuccessEnvelope {
            data,
            status: Value::String("success".to_string()),
            timestamp: Some(chrono::Utc::now().to_rfc3339()),
        }
    }
}

/// Extracts `data` from a success body.
///
/// Bodies that are not enveloped are returned unchanged.
pub fn unwrap_success(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Builds an [`ApiError`] from an error body, filling gaps from the status.
pub fn parse_error(status: u16, body: &Value) -> ApiError {
    if let Ok(error) = serde_json::from_value::<ApiError>(body.clone()) {
        return error;
    }

    let message = body
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| body.as_str().map(str::to_string))
        .unwrap_or_else(|| default_message(status).to_string());

    let code = body
        .get("code")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP_{}", status));

    ApiError::new(code, message)
}

fn default_message(status: u16) -> &'static str {
    match status {
        400 => "Bad request",
        401 => "Authentication required",
        403 => "Forbidden",
        404 => "Not found",
        408 => "Request timeout",
        409 => "Conflict",
        422 => "Unprocessable entity",
        429 => "Too many requests",
        500 => "Internal server error",
        502 => "Bad gateway",
        503 => "Service unavailable",
        504 => "Gateway timeout",
        _ => "Request failed",
    }
}

// =============================================================================
// Credential Refresh
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,

    /// Servers that rotate refresh tokens send a new one.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unwrap_success() {
        let body = json!({"data": [{"id": "r1"}], "status": "success", "timestamp": "now"});
        assert_eq!(unwrap_success(body), json!([{"id": "r1"}]));

        assert_eq!(unwrap_success(json!({"id": "r1"})), json!({"id": "r1"}));
    }

    #[test]
    fn test_parse_full_error_envelope() {
        let body = json!({
            "code": "NOT_FOUND",
            "message": "Recipe not found",
            "timestamp": "2024-05-01T10:00:00Z"
        });
        let error = parse_error(404, &body);
        assert_eq!(error.code, "NOT_FOUND");
        assert_eq!(error.message, "Recipe not found");
    }

    #[test]
    fn test_parse_partial_error_body() {
        let error = parse_error(503, &Value::Null);
        assert_eq!(error.code, "HTTP_503");
        assert_eq!(error.message, "Service unavailable");

        let error = parse_error(400, &json!({"message": "bad name"}));
        assert_eq!(error.code, "HTTP_400");
        assert_eq!(error.message, "bad name");
    }

    #[test]
    fn test_refresh_wire_format() {
        let request = serde_json::to_value(RefreshRequest {
            refresh_token: "rt".into(),
        })
        .unwrap();
        assert_eq!(request, json!({"refreshToken": "rt"}));

        let response: RefreshResponse =
            serde_json::from_value(json!({"accessToken": "at2", "refreshToken": "rt2"})).unwrap();
        assert_eq!(response.access_token, "at2");
        assert_eq!(response.refresh_token.as_deref(), Some("rt2"));
    }
}
