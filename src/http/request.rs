//! Request handling.
//!
//! # Design Decisions
//! - Invocation ID taken from `x-request-id` when it is a valid UUID
//! - Otherwise a fresh UUID v4 is generated

use axum::http::HeaderMap;
use uuid::Uuid;

/// Header carrying the invocation ID in both directions.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Resolve the invocation ID for an incoming request.
pub fn invocation_id(headers: &HeaderMap) -> Uuid {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .unwrap_or_else(Uuid::new_v4)
}
