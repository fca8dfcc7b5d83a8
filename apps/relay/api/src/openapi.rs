use utoipa::OpenApi;

/// OpenAPI document for the relay API.
#[derive(OpenApi)]
#[openapi(
    paths(
        domain_notifications::handlers::enqueue_notification,
        domain_notifications::handlers::process_batch,
        domain_notifications::handlers::get_notification,
        domain_notifications::handlers::cancel_notification,
        domain_notifications::handlers::list_suppressions,
        domain_notifications::handlers::remove_suppression,
        domain_notifications::handlers::receive_webhook,
    ),
    components(schemas(
        domain_notifications::models::EnqueueRequest,
        domain_notifications::models::EnqueueReceipt,
        domain_notifications::models::NotificationRecord,
        domain_notifications::models::NotificationKind,
        domain_notifications::models::NotificationChannel,
        domain_notifications::models::NotificationStatus,
        domain_notifications::models::DeliveryOutcome,
        domain_notifications::models::SuppressionEntry,
        domain_notifications::models::SuppressionKind,
        domain_notifications::processor::BatchSummary,
        domain_notifications::handlers::CancelReceipt,
        domain_notifications::handlers::WebhookReceipt,
    )),
    info(
        title = "Appointment Notification Relay API",
        version = "0.1.0",
        description = "Durable notification queue with retry, suppression and provider delivery-status reconciliation"
    ),
    tags(
        (name = "notifications", description = "Enqueue, inspect and process notifications"),
        (name = "suppressions", description = "Suppression-list administration"),
        (name = "webhooks", description = "Provider delivery-status callbacks")
    )
)]
pub struct ApiDoc;
