//! # Notifications domain
//!
//! Durable appointment-notification relay: producers enqueue records into a
//! shared ledger, a queue processor drives each record through claim,
//! dispatch and retry, and a webhook reconciler folds provider delivery
//! feedback back onto the same records.
//!
//! ## Modules
//!
//! - **[`models`]**: records, statuses, suppressions, delivery outcomes
//! - **[`ledger`]**: the shared persistence trait and in-memory ledger
//! - **[`backoff`]**: exponential retry policy
//! - **[`senders`]**: per-transport provider integrations
//! - **[`processor`]**: the batch queue processor
//! - **[`service`]**: producer API (enqueue, dedup, admin)
//! - **[`signature`]**: webhook HMAC verification
//! - **[`reconciler`]**: delivery-feedback reconciliation
//! - **[`cache`]**: TTL-bounded settings cache
//! - **[`handlers`]**: axum routes over all of the above

pub mod backoff;
pub mod cache;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod models;
pub mod processor;
pub mod reconciler;
pub mod senders;
pub mod service;
pub mod signature;

pub use backoff::{RetryDecision, RetryPolicy};
pub use cache::CachedValue;
pub use error::{NotificationError, NotificationResult};
pub use handlers::{api_routes, webhook_routes, NotificationsState};
pub use ledger::{InMemoryLedger, NotificationLedger};
pub use models::{
    DeliveryOutcome, EnqueueReceipt, EnqueueRequest, MessageContent, NotificationChannel,
    NotificationKind, NotificationRecord, NotificationStatus, SuppressionEntry, SuppressionKind,
};
pub use processor::{BatchSummary, QueueProcessor};
pub use reconciler::{ProviderCallback, ReconcileReport, WebhookReconciler};
pub use senders::{
    ChannelSender, EmailProviderConfig, EmailSender, SendOutcome, SenderRegistry, SmsProviderConfig,
    SmsSender,
};
pub use service::NotificationService;
pub use signature::{HmacVerifier, SignatureVerifier, SIGNATURE_HEADER};
