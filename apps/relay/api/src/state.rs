//! Application state assembly: ledger, senders, processor, reconciler and
//! the middleware stores, all built once from configuration.

use axum_helpers::{
    AuditSink, BearerAuth, IdempotencyLayer, InMemoryAuditStore, InMemoryIdempotencyStore,
    InMemoryRateLimitStore, RateLimiter,
};
use chrono::Duration;
use domain_notifications::{
    EmailSender, HmacVerifier, InMemoryLedger, NotificationService, NotificationsState,
    QueueProcessor, SenderRegistry, SmsSender, WebhookReconciler,
};
use std::sync::Arc;

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub notifications: NotificationsState,
    pub bearer: BearerAuth,
    pub limiter: RateLimiter,
    pub idempotency: IdempotencyLayer,
    pub audit: AuditSink,
}

impl AppState {
    pub fn from_config(config: Config) -> eyre::Result<Self> {
        let ledger = InMemoryLedger::shared();
        let service = NotificationService::new(ledger.clone());

        let email = EmailSender::new(config.email.clone(), ledger.clone())?;
        let sms = SmsSender::new(config.sms.clone(), ledger.clone())?;
        let registry = Arc::new(
            SenderRegistry::new()
                .register(Arc::new(email))
                .register(Arc::new(sms)),
        );
        let processor = Arc::new(QueueProcessor::new(ledger.clone(), registry));

        let audit = AuditSink::new(Arc::new(InMemoryAuditStore::new()));
        let verifier = Arc::new(HmacVerifier::new(config.webhook_secret.clone()));
        let reconciler = Arc::new(WebhookReconciler::new(
            ledger,
            verifier,
            Arc::new(audit.clone()),
        ));

        let notifications = NotificationsState::new(
            service,
            processor,
            reconciler,
            config.callback_base_url.as_str(),
        );

        let bearer = BearerAuth::new(&config.jwt);
        let limiter = RateLimiter::new(
            Arc::new(InMemoryRateLimitStore::new()),
            config.rate_limit_max_requests,
            Duration::seconds(i64::from(config.rate_limit_window_secs)),
        )
        .with_exempt_roles(config.rate_limit_exempt_roles.clone());
        let idempotency = IdempotencyLayer::new(Arc::new(InMemoryIdempotencyStore::new()));

        Ok(Self {
            config,
            notifications,
            bearer,
            limiter,
            idempotency,
            audit,
        })
    }
}
