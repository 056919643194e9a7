//! Shared HTTP utilities for the task service.
//!
//! Provides the JSON envelopes returned by the API, correlation-id
//! generation and time formatting. Framework-agnostic: the api-server wraps
//! these values into axum responses.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::time::SystemTime;

// ============================================================================
// JSON Envelopes
// ============================================================================

/// Success envelope without payload.
///
/// Returns: `{"status": "success", "message": "<message>"}`
pub fn json_success(message: &str) -> serde_json::Value {
    serde_json::json!({"status": "success", "message": message})
}

/// Success envelope carrying a payload.
///
/// Returns: `{"status": "success", "message": "<message>", "data": <data>}`
pub fn json_success_with_data<T: Serialize>(message: &str, data: &T) -> serde_json::Value {
    serde_json::json!({"status": "success", "message": message, "data": data})
}

/// Error envelope carrying the request's correlation id.
///
/// Returns:
/// `{"status": "error", "correlation_id": "<id>", "message": "<message>", "error": "<detail>"}`
pub fn json_error(correlation_id: &str, message: &str, detail: &str) -> serde_json::Value {
    serde_json::json!({
        "status": "error",
        "correlation_id": correlation_id,
        "message": message,
        "error": detail,
    })
}

// ============================================================================
// Correlation IDs
// ============================================================================

/// Header carrying the per-request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Generate a fresh correlation id (UUID v4).
pub fn generate_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Use the id from the request header when present, otherwise generate one.
pub fn correlation_id_or_new(header: Option<&str>) -> String {
    match header.map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => generate_correlation_id(),
    }
}

// ============================================================================
// Time Utilities
// ============================================================================

/// Convert SystemTime to RFC3339 string (seconds precision, UTC).
pub fn system_time_to_rfc3339(t: SystemTime) -> String {
    let dt: DateTime<Utc> = t.into();
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}
