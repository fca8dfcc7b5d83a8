//! Producer-facing service over the notification ledger.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::error::{NotificationError, NotificationResult};
use crate::ledger::NotificationLedger;
use crate::models::{
    EnqueueReceipt, EnqueueRequest, NotificationChannel, NotificationKind, NotificationRecord,
    SuppressionEntry,
};

/// Metadata key tying a notification to its appointment; doubles as the
/// producer dedup scope.
pub const APPOINTMENT_ID_KEY: &str = "appointment_id";

#[derive(Clone)]
pub struct NotificationService {
    ledger: Arc<dyn NotificationLedger>,
}

impl NotificationService {
    pub fn new(ledger: Arc<dyn NotificationLedger>) -> Self {
        Self { ledger }
    }

    /// Enqueue a notification with producer-side dedup.
    ///
    /// An equivalent record (same recipient, channel and dedup scope) that
    /// is pending, in flight or already sent short-circuits the insert and
    /// returns the existing id.
    pub async fn enqueue(&self, request: EnqueueRequest) -> NotificationResult<EnqueueReceipt> {
        request
            .validate()
            .map_err(|e| NotificationError::Validation(e.to_string()))?;

        let scheduled_for = request.scheduled_for.unwrap_or_else(Utc::now);
        let mut record = NotificationRecord::new(
            request.kind,
            request.channel,
            request.recipient,
            request.subject,
            request.content,
            scheduled_for,
        );
        record.correlation_id = request.correlation_id;
        record.template_id = request.template_id;
        record.metadata = request.metadata;

        let scope = record.dedup_scope();
        if let Some(existing) = self
            .ledger
            .find_active(&record.recipient, record.channel, &scope)
            .await?
        {
            tracing::debug!(
                id = %existing.id,
                recipient = %record.recipient,
                channel = %record.channel,
                scope = %scope,
                "Deduplicated enqueue onto existing record"
            );
            return Ok(EnqueueReceipt {
                id: existing.id,
                deduplicated: true,
            });
        }

        let id = record.id;
        self.ledger.insert(record).await?;
        Ok(EnqueueReceipt {
            id,
            deduplicated: false,
        })
    }

    /// Queue a customer-facing appointment reminder.
    pub async fn queue_appointment_reminder(
        &self,
        recipient: &str,
        kind: NotificationKind,
        appointment_id: &str,
        appointment_at: DateTime<Utc>,
        content: String,
        lead_time: Duration,
    ) -> NotificationResult<EnqueueReceipt> {
        let mut request = EnqueueRequest {
            kind,
            channel: NotificationChannel::Reminder,
            recipient: recipient.to_string(),
            subject: Some("Appointment reminder".to_string()),
            content,
            scheduled_for: Some(appointment_at - lead_time),
            correlation_id: None,
            template_id: None,
            metadata: Default::default(),
        };
        request
            .metadata
            .insert(APPOINTMENT_ID_KEY.to_string(), appointment_id.to_string());
        self.enqueue(request).await
    }

    /// Queue the staff daily-schedule digest; deduped per logical day.
    pub async fn queue_daily_schedule(
        &self,
        recipient: &str,
        content: String,
        send_at: DateTime<Utc>,
    ) -> NotificationResult<EnqueueReceipt> {
        self.enqueue(EnqueueRequest {
            kind: NotificationKind::Email,
            channel: NotificationChannel::DailySchedule,
            recipient: recipient.to_string(),
            subject: Some(format!("Schedule for {}", send_at.date_naive())),
            content,
            scheduled_for: Some(send_at),
            correlation_id: None,
            template_id: None,
            metadata: Default::default(),
        })
        .await
    }

    /// Queue an immediate booking confirmation.
    pub async fn queue_confirmation(
        &self,
        recipient: &str,
        kind: NotificationKind,
        appointment_id: &str,
        content: String,
    ) -> NotificationResult<EnqueueReceipt> {
        let mut request = EnqueueRequest {
            kind,
            channel: NotificationChannel::Confirmation,
            recipient: recipient.to_string(),
            subject: Some("Booking confirmed".to_string()),
            content,
            scheduled_for: None,
            correlation_id: None,
            template_id: None,
            metadata: Default::default(),
        };
        request
            .metadata
            .insert(APPOINTMENT_ID_KEY.to_string(), appointment_id.to_string());
        self.enqueue(request).await
    }

    pub async fn get(&self, id: Uuid) -> NotificationResult<NotificationRecord> {
        self.ledger
            .get(id)
            .await?
            .ok_or(NotificationError::NotFound(id))
    }

    /// Best-effort cancel; returns whether the record was still cancellable.
    pub async fn cancel(&self, id: Uuid) -> NotificationResult<bool> {
        self.ledger.cancel(id).await
    }

    pub async fn list_suppressions(&self) -> NotificationResult<Vec<SuppressionEntry>> {
        self.ledger.list_suppressions().await
    }

    pub async fn remove_suppression(&self, recipient: &str) -> NotificationResult<bool> {
        self.ledger.remove_suppression(recipient).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use crate::models::NotificationStatus;
    use std::collections::HashMap;

    fn service() -> (NotificationService, Arc<InMemoryLedger>) {
        let ledger = InMemoryLedger::shared();
        (NotificationService::new(ledger.clone()), ledger)
    }

    fn request(recipient: &str) -> EnqueueRequest {
        EnqueueRequest {
            kind: NotificationKind::Email,
            channel: NotificationChannel::Reminder,
            recipient: recipient.to_string(),
            subject: Some("hi".into()),
            content: "body".into(),
            scheduled_for: None,
            correlation_id: None,
            template_id: None,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_enqueue_inserts_pending_record() {
        let (service, ledger) = service();
        let receipt = service.enqueue(request("a@example.com")).await.unwrap();
        assert!(!receipt.deduplicated);

        let stored = ledger.get(receipt.id).await.unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Pending);
        assert_eq!(stored.recipient, "a@example.com");
    }

    #[tokio::test]
    async fn test_enqueue_dedups_same_scope() {
        let (service, _) = service();
        let mut first = request("a@example.com");
        first
            .metadata
            .insert(APPOINTMENT_ID_KEY.into(), "appt-1".into());
        let mut second = request("a@example.com");
        second
            .metadata
            .insert(APPOINTMENT_ID_KEY.into(), "appt-1".into());

        let r1 = service.enqueue(first).await.unwrap();
        let r2 = service.enqueue(second).await.unwrap();
        assert!(!r1.deduplicated);
        assert!(r2.deduplicated);
        assert_eq!(r1.id, r2.id);
    }

    #[tokio::test]
    async fn test_enqueue_different_scope_is_not_deduped() {
        let (service, _) = service();
        let mut first = request("a@example.com");
        first
            .metadata
            .insert(APPOINTMENT_ID_KEY.into(), "appt-1".into());
        let mut second = request("a@example.com");
        second
            .metadata
            .insert(APPOINTMENT_ID_KEY.into(), "appt-2".into());

        let r1 = service.enqueue(first).await.unwrap();
        let r2 = service.enqueue(second).await.unwrap();
        assert_ne!(r1.id, r2.id);
        assert!(!r2.deduplicated);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_invalid_body() {
        let (service, _) = service();
        let mut bad = request("a@example.com");
        bad.content = String::new();
        let err = service.enqueue(bad).await.unwrap_err();
        assert!(matches!(err, NotificationError::Validation(_)));
    }

    #[tokio::test]
    async fn test_reminder_scheduling_and_scope() {
        let (service, ledger) = service();
        let appointment_at = Utc::now() + Duration::hours(24);
        let receipt = service
            .queue_appointment_reminder(
                "a@example.com",
                NotificationKind::Sms,
                "appt-9",
                appointment_at,
                "tomorrow at 10".into(),
                Duration::hours(2),
            )
            .await
            .unwrap();

        let stored = ledger.get(receipt.id).await.unwrap().unwrap();
        assert_eq!(stored.scheduled_for, appointment_at - Duration::hours(2));
        assert_eq!(stored.dedup_scope(), "appt-9");
    }

    #[tokio::test]
    async fn test_cancel_roundtrip() {
        let (service, _) = service();
        let receipt = service.enqueue(request("a@example.com")).await.unwrap();
        assert!(service.cancel(receipt.id).await.unwrap());
        let record = service.get(receipt.id).await.unwrap();
        assert_eq!(record.status, NotificationStatus::Cancelled);
        // Second cancel is a no-op.
        assert!(!service.cancel(receipt.id).await.unwrap());
    }
}
