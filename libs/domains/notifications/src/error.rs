//! Error types for the notifications domain.

use axum_helpers::AppError;
use thiserror::Error;
use uuid::Uuid;

/// Result type for notification operations.
pub type NotificationResult<T> = Result<T, NotificationError>;

/// Errors that can occur in the notifications domain.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// Recipient is on the suppression list.
    #[error("Recipient is suppressed: {0}")]
    Suppressed(String),

    /// Provider failure worth retrying (timeouts, 5xx, rate limiting).
    #[error("Transient provider error: {0}")]
    TransientProvider(String),

    /// Provider failure that will never succeed (invalid destination,
    /// policy block). Triggers suppression, bypasses the retry budget.
    #[error("Permanent provider error: {0}")]
    PermanentProvider(String),

    /// Webhook signature did not verify.
    #[error("Webhook signature verification failed")]
    SignatureInvalid,

    /// Callback payload could not be parsed.
    #[error("Malformed provider payload: {0}")]
    PayloadError(String),

    /// Input failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Notification record not found.
    #[error("Notification not found: {0}")]
    NotFound(Uuid),

    /// Ledger store error.
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl NotificationError {
    /// Whether the queue processor may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NotificationError::TransientProvider(_))
    }
}

impl From<NotificationError> for AppError {
    fn from(err: NotificationError) -> Self {
        match err {
            NotificationError::SignatureInvalid => {
                AppError::Auth("Invalid webhook signature".to_string())
            }
            NotificationError::Validation(msg) => AppError::Validation(msg),
            NotificationError::PayloadError(msg) => AppError::Validation(msg),
            NotificationError::NotFound(id) => {
                AppError::NotFound(format!("Notification not found: {}", id))
            }
            NotificationError::Suppressed(msg) => AppError::Validation(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for NotificationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            NotificationError::TransientProvider(err.to_string())
        } else {
            NotificationError::TransientProvider(format!("provider call failed: {}", err))
        }
    }
}

impl From<serde_json::Error> for NotificationError {
    fn from(err: serde_json::Error) -> Self {
        NotificationError::PayloadError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(NotificationError::TransientProvider("503".into()).is_retryable());
        assert!(!NotificationError::PermanentProvider("invalid number".into()).is_retryable());
        assert!(!NotificationError::Suppressed("blocked".into()).is_retryable());
    }

    #[test]
    fn test_signature_invalid_maps_to_auth() {
        let app: AppError = NotificationError::SignatureInvalid.into();
        assert_eq!(app.status(), axum::http::StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_not_found_maps_to_404() {
        let app: AppError = NotificationError::NotFound(Uuid::nil()).into();
        assert_eq!(app.status(), axum::http::StatusCode::NOT_FOUND);
    }
}
