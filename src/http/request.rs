//! Request inspection.
//!
//! # Responsibilities
//! - Classify WebSocket upgrade attempts
//! - Read the request ID assigned by the request-id layer
//!
//! # Design Decisions
//! - Classification looks at `Upgrade` and `Connection` only, with exact,
//!   case-sensitive values; anything else is ordinary HTTP
//! - Request ID added as early as possible for tracing

use axum::http::{header, HeaderMap};

/// Header carrying the per-request correlation ID.
pub const X_REQUEST_ID: &str = "x-request-id";

/// True iff the request carries `Upgrade: websocket` and `Connection: Upgrade`.
pub fn is_websocket_request(headers: &HeaderMap) -> bool {
    header_is(headers, header::UPGRADE, "websocket")
        && header_is(headers, header::CONNECTION, "Upgrade")
}

fn header_is(headers: &HeaderMap, name: header::HeaderName, expected: &str) -> bool {
    headers
        .get(name)
        .is_some_and(|value| value.as_bytes() == expected.as_bytes())
}

/// The request ID, or `"unknown"` when none was assigned.
pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}
