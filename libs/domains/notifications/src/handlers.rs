//! HTTP handlers and routers for the notifications domain.

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use axum_helpers::{AppError, ValidatedJson};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::cache::CachedValue;
use crate::models::{EnqueueReceipt, EnqueueRequest, NotificationRecord, SuppressionEntry};
use crate::processor::{BatchSummary, QueueProcessor};
use crate::reconciler::WebhookReconciler;
use crate::service::NotificationService;
use crate::signature::SIGNATURE_HEADER;

/// How stale the suppressions listing may be.
const SUPPRESSIONS_CACHE_TTL: Duration = Duration::from_secs(30);

/// Shared state for the notification routes.
#[derive(Clone)]
pub struct NotificationsState {
    pub service: NotificationService,
    pub processor: Arc<QueueProcessor>,
    pub reconciler: Arc<WebhookReconciler>,
    suppressions_cache: Arc<CachedValue<Vec<SuppressionEntry>>>,
    /// Public base URL callbacks are signed against.
    pub callback_base_url: Arc<str>,
}

impl NotificationsState {
    pub fn new(
        service: NotificationService,
        processor: Arc<QueueProcessor>,
        reconciler: Arc<WebhookReconciler>,
        callback_base_url: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            service,
            processor,
            reconciler,
            suppressions_cache: Arc::new(CachedValue::new(SUPPRESSIONS_CACHE_TTL)),
            callback_base_url: callback_base_url.into(),
        }
    }
}

/// Authenticated API routes (enqueue, batch trigger, lookup, admin).
pub fn api_routes() -> Router<NotificationsState> {
    Router::new()
        .route("/notifications", post(enqueue_notification))
        .route("/notifications/process", post(process_batch))
        .route("/notifications/{id}", get(get_notification))
        .route("/notifications/{id}/cancel", post(cancel_notification))
        .route("/suppressions", get(list_suppressions))
        .route("/suppressions/{recipient}", delete(remove_suppression))
}

/// Signature-gated provider callback routes (no bearer auth).
pub fn webhook_routes() -> Router<NotificationsState> {
    Router::new().route("/webhooks/{provider}", post(receive_webhook))
}

#[utoipa::path(
    post,
    path = "/api/v1/notifications",
    request_body = EnqueueRequest,
    responses(
        (status = 202, description = "Notification queued", body = EnqueueReceipt),
        (status = 200, description = "Equivalent notification already queued", body = EnqueueReceipt),
        (status = 400, description = "Validation error")
    ),
    tag = "notifications"
)]
pub async fn enqueue_notification(
    State(state): State<NotificationsState>,
    ValidatedJson(request): ValidatedJson<EnqueueRequest>,
) -> Result<impl IntoResponse, AppError> {
    let receipt = state.service.enqueue(request).await?;
    let status = if receipt.deduplicated {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(receipt)))
}

#[derive(Debug, Deserialize)]
pub struct ProcessParams {
    pub limit: Option<usize>,
}

const DEFAULT_BATCH_LIMIT: usize = 50;

#[utoipa::path(
    post,
    path = "/api/v1/notifications/process",
    params(("limit" = Option<usize>, Query, description = "Max records to claim")),
    responses((status = 200, description = "Batch summary", body = BatchSummary)),
    tag = "notifications"
)]
pub async fn process_batch(
    State(state): State<NotificationsState>,
    Query(params): Query<ProcessParams>,
) -> Result<Json<BatchSummary>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_BATCH_LIMIT);
    let summary = state.processor.process_batch(limit).await?;
    Ok(Json(summary))
}

#[utoipa::path(
    get,
    path = "/api/v1/notifications/{id}",
    params(("id" = Uuid, Path, description = "Notification id")),
    responses(
        (status = 200, description = "Notification record", body = NotificationRecord),
        (status = 404, description = "Not found")
    ),
    tag = "notifications"
)]
pub async fn get_notification(
    State(state): State<NotificationsState>,
    Path(id): Path<Uuid>,
) -> Result<Json<NotificationRecord>, AppError> {
    Ok(Json(state.service.get(id).await?))
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CancelReceipt {
    pub id: Uuid,
    pub cancelled: bool,
}

#[utoipa::path(
    post,
    path = "/api/v1/notifications/{id}/cancel",
    params(("id" = Uuid, Path, description = "Notification id")),
    responses(
        (status = 200, description = "Cancel attempted", body = CancelReceipt),
        (status = 404, description = "Not found")
    ),
    tag = "notifications"
)]
pub async fn cancel_notification(
    State(state): State<NotificationsState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CancelReceipt>, AppError> {
    let cancelled = state.service.cancel(id).await?;
    Ok(Json(CancelReceipt { id, cancelled }))
}

#[utoipa::path(
    get,
    path = "/api/v1/suppressions",
    responses((status = 200, description = "Current suppression list", body = [SuppressionEntry])),
    tag = "suppressions"
)]
pub async fn list_suppressions(
    State(state): State<NotificationsState>,
) -> Result<Json<Vec<SuppressionEntry>>, AppError> {
    let service = state.service.clone();
    let entries = state
        .suppressions_cache
        .get(|| async move { service.list_suppressions().await })
        .await?;
    Ok(Json(entries))
}

#[utoipa::path(
    delete,
    path = "/api/v1/suppressions/{recipient}",
    params(("recipient" = String, Path, description = "Suppressed recipient")),
    responses(
        (status = 204, description = "Suppression removed"),
        (status = 404, description = "No suppression for recipient")
    ),
    tag = "suppressions"
)]
pub async fn remove_suppression(
    State(state): State<NotificationsState>,
    Path(recipient): Path<String>,
) -> Result<StatusCode, AppError> {
    let removed = state.service.remove_suppression(&recipient).await?;
    if !removed {
        return Err(AppError::NotFound(format!(
            "No suppression for '{}'",
            recipient
        )));
    }
    state.suppressions_cache.invalidate().await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookReceipt {
    pub received: bool,
    pub resolved: bool,
}

#[utoipa::path(
    post,
    path = "/webhooks/{provider}",
    params(("provider" = String, Path, description = "Provider name")),
    request_body = String,
    responses(
        (status = 200, description = "Callback accepted", body = WebhookReceipt),
        (status = 401, description = "Invalid signature")
    ),
    tag = "webhooks"
)]
pub async fn receive_webhook(
    State(state): State<NotificationsState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Json<WebhookReceipt>, AppError> {
    let callback_url = format!("{}/webhooks/{}", state.callback_base_url, provider);
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());

    let report = state
        .reconciler
        .reconcile(&provider, &callback_url, signature, content_type, &body)
        .await?;

    Ok(Json(WebhookReceipt {
        received: true,
        resolved: report.record_id.is_some(),
    }))
}
