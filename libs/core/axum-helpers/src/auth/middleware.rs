use super::jwt::BearerAuth;
use crate::errors::AppError;
use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Extract a bearer credential from the Authorization header.
fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer ").map(|s| s.to_string()))
}

/// Bearer authentication middleware.
///
/// Verifies the JWT from the Authorization header, then inserts the decoded
/// `Claims` into request extensions for downstream middleware and handlers.
///
/// # Example
///
/// ```ignore
/// use axum::Router;
/// use axum::routing::post;
/// use axum_helpers::{BearerAuth, auth_middleware};
///
/// let protected = Router::new()
///     .route("/api/notifications", post(enqueue))
///     .layer(axum::middleware::from_fn_with_state(auth.clone(), auth_middleware));
/// ```
pub async fn auth_middleware(
    State(auth): State<BearerAuth>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(&headers)
        .ok_or_else(|| AppError::Auth("No credential provided".to_string()))?;

    let claims = auth.verify_token(&token).map_err(|e| {
        tracing::debug!("Token verification failed: {}", e);
        AppError::Auth("Invalid or expired credential".to_string())
    })?;

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}

/// Allowed-role set for an operation, shared as middleware state.
#[derive(Clone)]
pub struct AllowedRoles(Arc<Vec<String>>);

impl AllowedRoles {
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(Arc::new(roles.into_iter().map(Into::into).collect()))
    }

    pub fn roles(&self) -> &[String] {
        &self.0
    }
}

/// Role authorization middleware.
///
/// Must run after `auth_middleware` (relies on `Claims` in extensions).
/// Rejects callers outside the configured allowed-role set.
pub async fn require_role_middleware(
    State(allowed): State<AllowedRoles>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let claims = request
        .extensions()
        .get::<super::jwt::Claims>()
        .ok_or_else(|| AppError::Auth("No credential provided".to_string()))?;

    if !claims.has_any_role(allowed.roles()) {
        return Err(AppError::Permission(format!(
            "Caller '{}' lacks a required role",
            claims.sub
        )));
    }

    Ok(next.run(request).await)
}
