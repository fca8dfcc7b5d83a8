//! Router assembly: the security pipeline wrapped around the notification
//! routes, plus health and OpenAPI documents.

use axum::http::HeaderValue;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use axum_helpers::{
    audit_middleware, auth_middleware, correlation_middleware, create_cors_layer,
    create_permissive_cors_layer, idempotency_middleware, rate_limit_middleware,
    require_role_middleware, AllowedRoles,
};
use serde_json::{json, Value};
use utoipa::OpenApi;

use crate::openapi::ApiDoc;
use crate::state::AppState;

/// Liveness probe.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Build the full application router.
///
/// Authenticated API routes run the whole pipeline (auth, roles,
/// idempotency, rate limit, audit). Webhook routes skip bearer auth —
/// callbacks are signature-gated inside the reconciler — but stay
/// rate-limited and audited. Correlation ids and CORS wrap everything.
pub fn build_router(state: &AppState) -> Router {
    let api = domain_notifications::api_routes()
        .with_state(state.notifications.clone())
        .layer(axum::middleware::from_fn_with_state(
            state.audit.clone(),
            audit_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.idempotency.clone(),
            idempotency_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            AllowedRoles::new(state.config.allowed_roles.clone()),
            require_role_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.bearer.clone(),
            auth_middleware,
        ));

    let webhooks = domain_notifications::webhook_routes()
        .with_state(state.notifications.clone())
        .layer(axum::middleware::from_fn_with_state(
            state.audit.clone(),
            audit_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.limiter.clone(),
            rate_limit_middleware,
        ));

    let cors = match state
        .config
        .cors_origin
        .as_deref()
        .and_then(|o| o.parse::<HeaderValue>().ok())
    {
        Some(origin) => create_cors_layer(origin),
        None => create_permissive_cors_layer(),
    };

    Router::new()
        .nest("/api/v1", api)
        .merge(webhooks)
        .route("/health", get(health))
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(axum::middleware::from_fn(correlation_middleware))
        .layer(cors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum_helpers::CORRELATION_ID_HEADER;
    use core_config::FromEnv;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        temp_env::with_vars(
            [
                ("JWT_SECRET", Some("a-test-secret-that-is-long-enough-123456")),
                ("WEBHOOK_SECRET", None),
            ],
            || AppState::from_config(Config::from_env().unwrap()).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let app = build_router(&test_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(CORRELATION_ID_HEADER));

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_api_requires_credential() {
        let app = build_router(&test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/notifications")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_webhooks_skip_bearer_auth() {
        let app = build_router(&test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/webhooks/email")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"message_id":"x","status":"delivered"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_openapi_document_served() {
        let app = build_router(&test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api-docs/openapi.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
