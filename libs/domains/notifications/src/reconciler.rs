//! Inbound webhook reconciler.
//!
//! Providers post delivery feedback (delivered, bounced, failed, ...) back
//! to us after a send. The reconciler verifies the callback signature,
//! maps the provider's vocabulary onto the canonical outcome set, resolves
//! the owning record by provider message id and applies the outcome under
//! the status monotonicity guard. Every callback is audited with its raw
//! feedback, resolved or not.

use axum_helpers::{AuditEvent, AuditOutcome, AuditSink};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{NotificationError, NotificationResult};
use crate::ledger::NotificationLedger;
use crate::models::{DeliveryOutcome, NotificationStatus, SuppressionEntry, SuppressionKind};
use crate::signature::SignatureVerifier;

/// A provider callback, tolerant of the field names the common providers
/// use in both JSON and form-encoded bodies.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderCallback {
    #[serde(
        alias = "message_id",
        alias = "MessageSid",
        alias = "sid",
        alias = "id"
    )]
    pub provider_message_id: Option<String>,
    #[serde(alias = "event", alias = "MessageStatus", alias = "status")]
    pub delivery_status: Option<String>,
    #[serde(alias = "email", alias = "to", alias = "To")]
    pub recipient: Option<String>,
    #[serde(alias = "reason", alias = "description", alias = "ErrorMessage")]
    pub detail: Option<String>,
}

impl ProviderCallback {
    /// Parse a raw callback body as JSON first, then form-encoded.
    pub fn parse(content_type: Option<&str>, body: &[u8]) -> NotificationResult<Self> {
        let is_form = content_type
            .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
            .unwrap_or(false);
        if is_form {
            serde_urlencoded::from_bytes(body)
                .map_err(|e| NotificationError::PayloadError(e.to_string()))
        } else {
            Ok(serde_json::from_slice(body)?)
        }
    }
}

/// What the reconciler did with a callback.
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub outcome: DeliveryOutcome,
    /// The record the callback resolved to, when one was found.
    pub record_id: Option<Uuid>,
    pub status: Option<NotificationStatus>,
}

pub struct WebhookReconciler {
    ledger: Arc<dyn NotificationLedger>,
    verifier: Arc<dyn SignatureVerifier>,
    audit: Arc<AuditSink>,
}

impl WebhookReconciler {
    pub fn new(
        ledger: Arc<dyn NotificationLedger>,
        verifier: Arc<dyn SignatureVerifier>,
        audit: Arc<AuditSink>,
    ) -> Self {
        Self {
            ledger,
            verifier,
            audit,
        }
    }

    /// Verify, parse and apply one provider callback.
    ///
    /// An unresolved provider message id is a soft success: the send and
    /// the callback can race, and the provider must not retry forever. Once
    /// the signature verifies, the raw feedback is audited on every path,
    /// including parse failures and ledger errors.
    pub async fn reconcile(
        &self,
        provider: &str,
        callback_url: &str,
        signature_header: Option<&str>,
        content_type: Option<&str>,
        body: &[u8],
    ) -> NotificationResult<ReconcileReport> {
        // Verify before parsing; an unsigned body is never interpreted.
        self.verifier.verify(callback_url, body, signature_header)?;

        match self.apply(provider, content_type, body).await {
            Ok((callback, report)) => {
                self.audit_callback(provider, &callback, &report).await;
                Ok(report)
            }
            Err(error) => {
                self.audit_error(provider, body, &error).await;
                match error {
                    // A payload we cannot interpret is accepted, not
                    // bounced back for the provider to retry forever.
                    NotificationError::PayloadError(detail) => {
                        tracing::warn!(
                            provider = %provider,
                            detail = %detail,
                            "Unparseable provider callback"
                        );
                        Ok(ReconcileReport {
                            outcome: DeliveryOutcome::Unknown,
                            record_id: None,
                            status: None,
                        })
                    }
                    other => Err(other),
                }
            }
        }
    }

    async fn apply(
        &self,
        provider: &str,
        content_type: Option<&str>,
        body: &[u8],
    ) -> NotificationResult<(ProviderCallback, ReconcileReport)> {
        let callback = ProviderCallback::parse(content_type, body)?;
        let outcome = callback
            .delivery_status
            .as_deref()
            .map(DeliveryOutcome::from_provider_status)
            .unwrap_or(DeliveryOutcome::Unknown);

        let resolved = match callback.provider_message_id.as_deref() {
            Some(message_id) => {
                self.ledger
                    .apply_delivery_outcome(message_id, outcome, callback.detail.as_deref())
                    .await?
            }
            None => None,
        };

        if resolved.is_none() {
            tracing::info!(
                provider = %provider,
                provider_message_id = ?callback.provider_message_id,
                outcome = %outcome,
                "Callback did not resolve to a record"
            );
        }

        // Permanent failures block the recipient from further sends.
        if outcome.is_permanent_failure() {
            let recipient = resolved
                .as_ref()
                .map(|r| r.recipient.clone())
                .or_else(|| callback.recipient.clone());
            if let Some(recipient) = recipient {
                self.ledger
                    .upsert_suppression(SuppressionEntry::new(
                        recipient,
                        SuppressionKind::Invalid,
                        callback
                            .detail
                            .clone()
                            .unwrap_or_else(|| format!("provider reported {}", outcome)),
                        format!("webhook:{}", provider),
                    ))
                    .await?;
            }
        }

        let report = ReconcileReport {
            outcome,
            record_id: resolved.as_ref().map(|r| r.id),
            status: resolved.as_ref().map(|r| r.status),
        };
        Ok((callback, report))
    }

    async fn audit_callback(
        &self,
        provider: &str,
        callback: &ProviderCallback,
        report: &ReconcileReport,
    ) {
        let mut event = AuditEvent::new(
            Some(format!("provider:{}", provider)),
            "webhook.delivery_status",
            AuditOutcome::Success,
        )
        .with_details(json!({
            "provider_message_id": callback.provider_message_id,
            "raw_status": callback.delivery_status,
            "outcome": report.outcome.to_string(),
            "resolved": report.record_id.is_some(),
            "detail": callback.detail,
        }));
        if let Some(id) = report.record_id {
            event = event.with_resource("notification", id.to_string());
        }
        self.audit.record(event).await;
    }

    async fn audit_error(&self, provider: &str, body: &[u8], error: &NotificationError) {
        let event = AuditEvent::new(
            Some(format!("provider:{}", provider)),
            "webhook.delivery_status",
            AuditOutcome::Failure,
        )
        .with_details(json!({
            "raw_body": String::from_utf8_lossy(body),
            "error": error.to_string(),
        }));
        self.audit.record(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use crate::models::{NotificationChannel, NotificationKind, NotificationRecord};
    use crate::signature::HmacVerifier;
    use axum_helpers::InMemoryAuditStore;
    use chrono::{Duration, Utc};

    const URL: &str = "https://relay.example.com/webhooks/email";

    async fn sent_record(ledger: &InMemoryLedger, message_id: &str) -> Uuid {
        let record = NotificationRecord::new(
            NotificationKind::Email,
            NotificationChannel::Reminder,
            "alice@example.com".into(),
            None,
            "hi".into(),
            Utc::now() - Duration::minutes(1),
        );
        let id = record.id;
        ledger.insert(record).await.unwrap();
        ledger.claim_due(1, Utc::now()).await.unwrap();
        ledger
            .mark_sent(id, Some(message_id.to_string()))
            .await
            .unwrap();
        id
    }

    fn reconciler(
        ledger: Arc<InMemoryLedger>,
        secret: Option<&str>,
    ) -> (WebhookReconciler, Arc<InMemoryAuditStore>) {
        let store = Arc::new(InMemoryAuditStore::new());
        let audit = Arc::new(AuditSink::new(store.clone()));
        let verifier = Arc::new(HmacVerifier::new(secret.map(String::from)));
        (WebhookReconciler::new(ledger, verifier, audit), store)
    }

    #[tokio::test]
    async fn test_delivered_callback_advances_record() {
        let ledger = InMemoryLedger::shared();
        let id = sent_record(&ledger, "msg-1").await;
        let (reconciler, audit) = reconciler(ledger.clone(), None);

        let body = br#"{"message_id":"msg-1","status":"delivered"}"#;
        let report = reconciler
            .reconcile("email", URL, None, Some("application/json"), body)
            .await
            .unwrap();

        assert_eq!(report.record_id, Some(id));
        assert_eq!(report.status, Some(NotificationStatus::Delivered));
        assert_eq!(
            ledger.get(id).await.unwrap().unwrap().status,
            NotificationStatus::Delivered
        );
        assert_eq!(audit.events().await.len(), 1);
    }

    #[tokio::test]
    async fn test_bounce_suppresses_recipient() {
        let ledger = InMemoryLedger::shared();
        let id = sent_record(&ledger, "msg-2").await;
        let (reconciler, _) = reconciler(ledger.clone(), None);

        let body = br#"{"message_id":"msg-2","status":"bounced","reason":"mailbox full"}"#;
        reconciler
            .reconcile("email", URL, None, Some("application/json"), body)
            .await
            .unwrap();

        assert_eq!(
            ledger.get(id).await.unwrap().unwrap().status,
            NotificationStatus::Bounced
        );
        let suppression = ledger
            .find_suppression("alice@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(suppression.reason, "mailbox full");
    }

    #[tokio::test]
    async fn test_out_of_order_callback_never_regresses() {
        let ledger = InMemoryLedger::shared();
        let id = sent_record(&ledger, "msg-3").await;
        let (reconciler, _) = reconciler(ledger.clone(), None);

        let delivered = br#"{"message_id":"msg-3","status":"delivered"}"#;
        reconciler
            .reconcile("email", URL, None, Some("application/json"), delivered)
            .await
            .unwrap();

        // The provider's earlier "sent" event arrives late.
        let sent = br#"{"message_id":"msg-3","status":"sent"}"#;
        let report = reconciler
            .reconcile("email", URL, None, Some("application/json"), sent)
            .await
            .unwrap();

        assert_eq!(report.status, Some(NotificationStatus::Delivered));
        assert_eq!(
            ledger.get(id).await.unwrap().unwrap().status,
            NotificationStatus::Delivered
        );
    }

    #[tokio::test]
    async fn test_unresolved_callback_is_soft_success_and_audited() {
        let ledger = InMemoryLedger::shared();
        let (reconciler, audit) = reconciler(ledger, None);

        let body = br#"{"message_id":"no-such","status":"delivered"}"#;
        let report = reconciler
            .reconcile("email", URL, None, Some("application/json"), body)
            .await
            .unwrap();

        assert!(report.record_id.is_none());
        assert_eq!(audit.events().await.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_audited_and_accepted() {
        let ledger = InMemoryLedger::shared();
        let (reconciler, audit) = reconciler(ledger, None);

        let body = b"{not-json at all";
        let report = reconciler
            .reconcile("email", URL, None, Some("application/json"), body)
            .await
            .unwrap();

        assert_eq!(report.outcome, DeliveryOutcome::Unknown);
        assert!(report.record_id.is_none());
        // The raw feedback survives even when the body cannot be parsed.
        let events = audit.events().await;
        assert_eq!(events.len(), 1);
        let details = events[0].details.as_ref().unwrap();
        assert!(details["raw_body"]
            .as_str()
            .unwrap()
            .contains("not-json"));
    }

    #[tokio::test]
    async fn test_bad_signature_rejected_before_parse() {
        let ledger = InMemoryLedger::shared();
        let (reconciler, audit) = reconciler(ledger, Some("secret"));

        let body = b"definitely-not-json-and-never-parsed";
        let err = reconciler
            .reconcile("email", URL, Some("sha256=0000"), None, body)
            .await
            .unwrap_err();
        assert!(matches!(err, NotificationError::SignatureInvalid));
        assert!(audit.events().await.is_empty());
    }

    #[tokio::test]
    async fn test_form_encoded_callback() {
        let ledger = InMemoryLedger::shared();
        let id = sent_record(&ledger, "SM123").await;
        let (reconciler, _) = reconciler(ledger.clone(), None);

        let body = b"MessageSid=SM123&MessageStatus=undelivered&To=%2B15551234567";
        let report = reconciler
            .reconcile(
                "sms",
                URL,
                None,
                Some("application/x-www-form-urlencoded"),
                body,
            )
            .await
            .unwrap();

        assert_eq!(report.record_id, Some(id));
        assert_eq!(report.status, Some(NotificationStatus::Bounced));
    }
}
