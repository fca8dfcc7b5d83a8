//! Structured error responses with a uniform envelope.
//!
//! Every error that escapes a handler or middleware is converted here into
//! the wire shape `{"error": {"code", "message"}}`. Internal detail is logged
//! but never echoed to the caller.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// Inner body of the uniform error envelope.
#[derive(Serialize, ToSchema)]
pub struct ErrorBody {
    /// Machine-readable error identifier (e.g., "RATE_LIMIT_EXCEEDED")
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Optional structured error details (e.g., validation field errors)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Uniform error envelope returned for all error responses.
///
/// # JSON Example
///
/// ```json
/// {
///   "error": {
///     "code": "NOT_FOUND",
///     "message": "Notification not found"
///   }
/// }
/// ```
#[derive(Serialize, ToSchema)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

impl ErrorEnvelope {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.error.details = Some(details);
        self
    }
}

/// Application error type that converts into the uniform envelope.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppError {
    #[error("Unauthorized: {0}")]
    Auth(String),

    #[error("Forbidden: {0}")]
    Permission(String),

    #[error("Bad Request: {0}")]
    Validation(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Idempotency conflict: {0}")]
    IdempotencyConflict(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Internal Server Error: {0}")]
    Internal(String),

    #[error("Service Unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AppError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Permission(_) => StatusCode::FORBIDDEN,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::IdempotencyConflict(_) => StatusCode::CONFLICT,
            AppError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Machine-readable code used in the envelope.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Auth(_) => "AUTH_ERROR",
            AppError::Permission(_) => "PERMISSION_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::IdempotencyConflict(_) => "IDEMPOTENCY_CONFLICT",
            AppError::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let message = match &self {
            AppError::Auth(msg) => {
                tracing::debug!("Authentication failed: {}", msg);
                msg.clone()
            }
            AppError::Permission(msg) => {
                tracing::info!("Authorization denied: {}", msg);
                msg.clone()
            }
            AppError::Validation(msg) => {
                tracing::info!("Validation failed: {}", msg);
                msg.clone()
            }
            AppError::NotFound(msg) => msg.clone(),
            AppError::IdempotencyConflict(msg) => {
                tracing::info!("Idempotency conflict: {}", msg);
                msg.clone()
            }
            AppError::RateLimitExceeded => "Rate limit exceeded. Please retry later".to_string(),
            // Internal detail is logged, never echoed to the caller.
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "An internal server error occurred".to_string()
            }
            AppError::ServiceUnavailable(msg) => {
                tracing::error!("Service unavailable: {}", msg);
                "Service is temporarily unavailable".to_string()
            }
        };

        (status, Json(ErrorEnvelope::new(code, message))).into_response()
    }
}

/// Error from a middleware backing store (idempotency, rate limit, audit).
#[derive(Debug, Error)]
#[error("store error: {0}")]
pub struct StoreError(pub String);

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("JSON serialization error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let envelope = ErrorEnvelope::new("NOT_FOUND", "missing");
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["error"]["code"], "NOT_FOUND");
        assert_eq!(json["error"]["message"], "missing");
        assert!(json["error"].get("details").is_none());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::Auth("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::Permission("x".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::RateLimitExceeded.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AppError::IdempotencyConflict("x".into()).status(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_internal_detail_not_echoed() {
        let response = AppError::Internal("secret database dsn".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
