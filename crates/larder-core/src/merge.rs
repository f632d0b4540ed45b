//! # Conflict Detection & Merge
//!
//! Pure comparisons between a local entity snapshot and a remote one.
//!
//! Payloads are opaque JSON objects. Only these fields are interpreted:
//! - `lastModified`: RFC 3339 string or epoch milliseconds
//! - `personalNotes`, `personalRating`, `personalMetadata`: owned by the
//!   local user and never overwritten by a merge

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Map, Value};
use std::time::Duration;

/// Modification timestamp field.
pub const LAST_MODIFIED_FIELD: &str = "lastModified";

/// Fields the local user owns. A merge always keeps the local values.
pub const PERSONAL_FIELDS: [&str; 3] = ["personalNotes", "personalRating", "personalMetadata"];

/// Modification times closer than this are treated as the same edit.
pub const DEFAULT_CONFLICT_TOLERANCE: Duration = Duration::from_secs(1);

/// Reads `lastModified` from a payload.
pub fn modified_at(payload: &Value) -> Option<DateTime<Utc>> {
    match payload.get(LAST_MODIFIED_FIELD)? {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

/// Formats a timestamp the way payloads carry it.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Returns true if the payloads differ in anything but `lastModified`.
pub fn content_differs(local: &Value, remote: &Value) -> bool {
    match (local.as_object(), remote.as_object()) {
        (Some(l), Some(r)) => without_timestamp(l) != without_timestamp(r),
        _ => local != remote,
    }
}

fn without_timestamp(map: &Map<String, Value>) -> Map<String, Value> {
    let mut copy = map.clone();
    copy.remove(LAST_MODIFIED_FIELD);
    copy
}

/// Returns true if a queued local change and a remote version diverge.
///
/// Both conditions must hold:
/// 1. content differs (ignoring `lastModified`)
/// 2. modification times are more than `tolerance` apart
///
/// A side without a readable timestamp cannot prove the edits coincide, so
/// a missing timestamp counts as "apart".
pub fn detect_conflict(local: &Value, remote: &Value, tolerance: Duration) -> bool {
    if !content_differs(local, remote) {
        return false;
    }

    match (modified_at(local), modified_at(remote)) {
        (Some(l), Some(r)) => {
            let gap = (r - l).num_milliseconds().unsigned_abs();
            gap > tolerance.as_millis() as u64
        }
        _ => true,
    }
}

/// Returns true if the remote copy should replace the stored local copy.
///
/// Used only when no local change is queued for the entity.
pub fn remote_is_newer(local: Option<&Value>, remote: &Value) -> bool {
    let Some(local) = local else {
        return true;
    };

    match (modified_at(local), modified_at(remote)) {
        (Some(l), Some(r)) => r > l,
        (None, Some(_)) => true,
        (_, None) => false,
    }
}

/// Builds the merged version of a conflicting entity.
///
/// The remote version is the structural base. The local personal fields are
/// laid over it and `lastModified` is stamped with `now`.
///
/// ## Example
/// ```rust
/// use chrono::Utc;
/// use larder_core::merge::merge_versions;
/// use serde_json::json;
///
/// let local = json!({"id": "r1", "personalRating": 5});
/// let remote = json!({"id": "r1", "name": "New Name", "personalRating": 2});
///
/// let merged = merge_versions(&local, &remote, Utc::now());
/// assert_eq!(merged["name"], "New Name");
/// assert_eq!(merged["personalRating"], 5);
/// ```
pub fn merge_versions(local: &Value, remote: &Value, now: DateTime<Utc>) -> Value {
    let mut merged = remote.as_object().cloned().unwrap_or_default();

    if let Some(local) = local.as_object() {
        for field in PERSONAL_FIELDS {
            if let Some(value) = local.get(field) {
                merged.insert(field.to_string(), value.clone());
            }
        }
    }

    merged.insert(
        LAST_MODIFIED_FIELD.to_string(),
        Value::String(format_timestamp(now)),
    );
    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const T0: &str = "2024-05-01T10:00:00.000Z";
    const T0_PLUS_HALF: &str = "2024-05-01T10:00:00.500Z";
    const T0_PLUS_5: &str = "2024-05-01T10:00:05.000Z";
    const T0_PLUS_10: &str = "2024-05-01T10:00:10.000Z";

    #[test]
    fn test_modified_at_formats() {
        let from_string = modified_at(&json!({"lastModified": T0})).unwrap();
        let from_millis = modified_at(&json!({"lastModified": from_string.timestamp_millis()})).unwrap();
        assert_eq!(from_string, from_millis);

        assert!(modified_at(&json!({"lastModified": "yesterday"})).is_none());
        assert!(modified_at(&json!({"id": "r1"})).is_none());
    }

    #[test]
    fn test_conflict_when_content_and_time_differ() {
        let local = json!({"id": "r1", "name": "Local", "lastModified": T0});
        let remote = json!({"id": "r1", "name": "Remote", "lastModified": T0_PLUS_5});
        assert!(detect_conflict(&local, &remote, DEFAULT_CONFLICT_TOLERANCE));
    }

    #[test]
    fn test_no_conflict_within_tolerance() {
        let local = json!({"id": "r1", "name": "Local", "lastModified": T0});
        let remote = json!({"id": "r1", "name": "Remote", "lastModified": T0_PLUS_HALF});
        assert!(!detect_conflict(&local, &remote, DEFAULT_CONFLICT_TOLERANCE));
    }

    #[test]
    fn test_no_conflict_when_only_timestamp_differs() {
        let local = json!({"id": "r1", "name": "Same", "lastModified": T0});
        let remote = json!({"id": "r1", "name": "Same", "lastModified": T0_PLUS_10});
        assert!(!detect_conflict(&local, &remote, DEFAULT_CONFLICT_TOLERANCE));
    }

    #[test]
    fn test_remote_is_newer() {
        let older = json!({"id": "r1", "lastModified": T0});
        let newer = json!({"id": "r1", "lastModified": T0_PLUS_5});

        assert!(remote_is_newer(None, &older));
        assert!(remote_is_newer(Some(&older), &newer));
        assert!(!remote_is_newer(Some(&newer), &older));
        assert!(!remote_is_newer(Some(&older), &older));
        assert!(!remote_is_newer(Some(&older), &json!({"id": "r1"})));
    }

    #[test]
    fn test_merge_keeps_local_personal_fields() {
        let local = json!({
            "id": "r1",
            "personalMetadata": {"isFavorite": true},
            "lastModified": T0,
        });
        let remote = json!({
            "id": "r1",
            "name": "New Name",
            "personalMetadata": {"isFavorite": false},
            "lastModified": T0_PLUS_10,
        });

        let now = Utc::now();
        let merged = merge_versions(&local, &remote, now);

        assert_eq!(merged["name"], "New Name");
        assert_eq!(merged["personalMetadata"]["isFavorite"], true);
        assert_eq!(modified_at(&merged).unwrap().timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn test_merge_does_not_invent_personal_fields() {
        let local = json!({"id": "r1"});
        let remote = json!({"id": "r1", "personalNotes": "from server"});

        let merged = merge_versions(&local, &remote, Utc::now());
        assert_eq!(merged["personalNotes"], "from server");
        assert!(merged.get("personalRating").is_none());
    }
}
