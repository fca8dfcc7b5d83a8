//! HTTP middleware: CORS and correlation-id propagation.

pub mod correlation;
pub mod cors;

pub use correlation::{correlation_middleware, CorrelationId, CORRELATION_ID_HEADER};
pub use cors::{create_cors_layer, create_permissive_cors_layer};

use axum::http::HeaderMap;

/// Best-effort client identity for unauthenticated callers: proxy-reported
/// IP, falling back to a shared anonymous bucket.
pub fn client_identity(headers: &HeaderMap) -> String {
    crate::audit::extract_ip_from_headers(headers).unwrap_or_else(|| "anonymous".to_string())
}
