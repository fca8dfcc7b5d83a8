//! The shared notification ledger.
//!
//! Every fact the queue processor, producers and webhook reconciler need to
//! resume correctly lives behind this trait: queue position, retry counts,
//! delivery state and the suppression list. All state transitions are
//! conditional updates against the current status, so overlapping processor
//! runs and out-of-order webhook callbacks stay safe without in-process
//! locks held across invocations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{NotificationError, NotificationResult};
use crate::models::{
    DeliveryOutcome, NotificationChannel, NotificationRecord, NotificationStatus, SuppressionEntry,
};

/// Persistence trait for notification records and suppression entries.
#[async_trait]
pub trait NotificationLedger: Send + Sync {
    /// Insert a new record.
    async fn insert(&self, record: NotificationRecord) -> NotificationResult<()>;

    /// Fetch a record by id.
    async fn get(&self, id: Uuid) -> NotificationResult<Option<NotificationRecord>>;

    /// Find an existing record for the producer dedup key
    /// (recipient, channel, dedup scope) that is pending, in flight or
    /// already sent/delivered.
    async fn find_active(
        &self,
        recipient: &str,
        channel: NotificationChannel,
        dedup_scope: &str,
    ) -> NotificationResult<Option<NotificationRecord>>;

    /// Atomically claim up to `limit` due records, oldest-due-first.
    ///
    /// Each claim is a conditional pending→processing transition: a record
    /// already claimed by a concurrent run is skipped, never double-claimed.
    async fn claim_due(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> NotificationResult<Vec<NotificationRecord>>;

    /// processing→sent, storing the provider message id.
    async fn mark_sent(
        &self,
        id: Uuid,
        provider_message_id: Option<String>,
    ) -> NotificationResult<()>;

    /// processing→pending with a future `scheduled_for` and bumped
    /// retry count (retryable failure with budget left).
    async fn reschedule(
        &self,
        id: Uuid,
        scheduled_for: DateTime<Utc>,
        retry_count: u32,
        error: &str,
    ) -> NotificationResult<()>;

    /// Transition to terminal `failed` with the final error recorded.
    async fn mark_failed(&self, id: Uuid, error: &str) -> NotificationResult<()>;

    /// Best-effort administrative cancel of a pending/processing record.
    /// Returns whether the transition applied.
    async fn cancel(&self, id: Uuid) -> NotificationResult<bool>;

    /// Apply a canonical delivery outcome to the record owning the given
    /// provider message id, under the monotonicity guard. Returns the
    /// record (post-apply) when one was resolved.
    async fn apply_delivery_outcome(
        &self,
        provider_message_id: &str,
        outcome: DeliveryOutcome,
        detail: Option<&str>,
    ) -> NotificationResult<Option<NotificationRecord>>;

    /// Insert or refresh a suppression entry for a recipient.
    async fn upsert_suppression(&self, entry: SuppressionEntry) -> NotificationResult<()>;

    /// Look up a suppression entry.
    async fn find_suppression(
        &self,
        recipient: &str,
    ) -> NotificationResult<Option<SuppressionEntry>>;

    /// Administrative removal. Returns whether an entry existed.
    async fn remove_suppression(&self, recipient: &str) -> NotificationResult<bool>;

    /// All current suppression entries.
    async fn list_suppressions(&self) -> NotificationResult<Vec<SuppressionEntry>>;
}

/// In-memory implementation of the notification ledger.
///
/// Transitions take the write lock for their whole read-check-write, which
/// gives the same atomic conditional-update semantics a SQL ledger provides
/// with `UPDATE ... WHERE status = 'pending'`.
#[derive(Default)]
pub struct InMemoryLedger {
    records: RwLock<HashMap<Uuid, NotificationRecord>>,
    suppressions: RwLock<HashMap<String, SuppressionEntry>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn suppression_key(recipient: &str) -> String {
        recipient.trim().to_ascii_lowercase()
    }
}

#[async_trait]
impl NotificationLedger for InMemoryLedger {
    async fn insert(&self, record: NotificationRecord) -> NotificationResult<()> {
        let mut records = self.records.write().await;
        tracing::debug!(
            id = %record.id,
            kind = %record.kind,
            channel = %record.channel,
            recipient = %record.recipient,
            scheduled_for = %record.scheduled_for,
            "Inserted notification record"
        );
        records.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> NotificationResult<Option<NotificationRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn find_active(
        &self,
        recipient: &str,
        channel: NotificationChannel,
        dedup_scope: &str,
    ) -> NotificationResult<Option<NotificationRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .find(|r| {
                r.recipient.eq_ignore_ascii_case(recipient)
                    && r.channel == channel
                    && r.dedup_scope() == dedup_scope
                    && matches!(
                        r.status,
                        NotificationStatus::Pending
                            | NotificationStatus::Processing
                            | NotificationStatus::Sent
                            | NotificationStatus::Delivered
                    )
            })
            .cloned())
    }

    async fn claim_due(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> NotificationResult<Vec<NotificationRecord>> {
        let mut records = self.records.write().await;

        let mut due: Vec<(DateTime<Utc>, Uuid)> = records
            .values()
            .filter(|r| r.status == NotificationStatus::Pending && r.scheduled_for <= now)
            .map(|r| (r.scheduled_for, r.id))
            .collect();
        due.sort();
        due.truncate(limit);

        let mut claimed = Vec::with_capacity(due.len());
        for (_, id) in due {
            // Conditional transition: status must still be pending.
            if let Some(record) = records.get_mut(&id) {
                if record.status == NotificationStatus::Pending {
                    record.status = NotificationStatus::Processing;
                    record.updated_at = now;
                    claimed.push(record.clone());
                }
            }
        }

        if !claimed.is_empty() {
            tracing::debug!(count = claimed.len(), "Claimed due notification records");
        }
        Ok(claimed)
    }

    async fn mark_sent(
        &self,
        id: Uuid,
        provider_message_id: Option<String>,
    ) -> NotificationResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .ok_or(NotificationError::NotFound(id))?;

        // A cancel may have landed while the send was in flight; the
        // outcome of the sender is then ignored.
        if record.status.is_terminal() {
            tracing::debug!(id = %id, status = %record.status, "Ignoring sent outcome for terminal record");
            return Ok(());
        }

        record.status = NotificationStatus::Sent;
        record.provider_message_id = provider_message_id;
        record.updated_at = Utc::now();
        tracing::info!(id = %id, "Notification sent");
        Ok(())
    }

    async fn reschedule(
        &self,
        id: Uuid,
        scheduled_for: DateTime<Utc>,
        retry_count: u32,
        error: &str,
    ) -> NotificationResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .ok_or(NotificationError::NotFound(id))?;

        if record.status.is_terminal() {
            tracing::debug!(id = %id, status = %record.status, "Ignoring reschedule for terminal record");
            return Ok(());
        }

        record.status = NotificationStatus::Pending;
        record.scheduled_for = scheduled_for;
        record.retry_count = retry_count;
        record.error_message = Some(error.to_string());
        record.updated_at = Utc::now();
        tracing::info!(
            id = %id,
            retry_count = retry_count,
            scheduled_for = %scheduled_for,
            "Notification rescheduled after retryable failure"
        );
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> NotificationResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .ok_or(NotificationError::NotFound(id))?;

        if record.status.is_terminal() {
            tracing::debug!(id = %id, status = %record.status, "Ignoring failure for terminal record");
            return Ok(());
        }

        record.status = NotificationStatus::Failed;
        record.error_message = Some(error.to_string());
        record.updated_at = Utc::now();
        tracing::warn!(id = %id, error = %error, "Notification failed");
        Ok(())
    }

    async fn cancel(&self, id: Uuid) -> NotificationResult<bool> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .ok_or(NotificationError::NotFound(id))?;

        let cancellable = matches!(
            record.status,
            NotificationStatus::Pending | NotificationStatus::Processing
        );
        if cancellable {
            record.status = NotificationStatus::Cancelled;
            record.updated_at = Utc::now();
            tracing::info!(id = %id, "Notification cancelled");
        }
        Ok(cancellable)
    }

    async fn apply_delivery_outcome(
        &self,
        provider_message_id: &str,
        outcome: DeliveryOutcome,
        detail: Option<&str>,
    ) -> NotificationResult<Option<NotificationRecord>> {
        let mut records = self.records.write().await;

        let record = records
            .values_mut()
            .find(|r| r.provider_message_id.as_deref() == Some(provider_message_id));

        let Some(record) = record else {
            return Ok(None);
        };

        if let Some(target) = outcome.target_status() {
            if record.status.allows(target) {
                record.status = target;
                if let Some(detail) = detail {
                    record.error_message = Some(detail.to_string());
                }
                record.updated_at = Utc::now();
                tracing::info!(
                    id = %record.id,
                    outcome = %outcome,
                    status = %record.status,
                    "Applied delivery outcome"
                );
            } else {
                tracing::debug!(
                    id = %record.id,
                    outcome = %outcome,
                    status = %record.status,
                    "Delivery outcome carries no new information, keeping status"
                );
            }
        }

        Ok(Some(record.clone()))
    }

    async fn upsert_suppression(&self, entry: SuppressionEntry) -> NotificationResult<()> {
        let mut suppressions = self.suppressions.write().await;
        let key = Self::suppression_key(&entry.recipient);
        tracing::info!(
            recipient = %entry.recipient,
            kind = %entry.kind,
            source = %entry.source,
            "Suppression entry upserted"
        );
        suppressions.insert(key, entry);
        Ok(())
    }

    async fn find_suppression(
        &self,
        recipient: &str,
    ) -> NotificationResult<Option<SuppressionEntry>> {
        let suppressions = self.suppressions.read().await;
        Ok(suppressions.get(&Self::suppression_key(recipient)).cloned())
    }

    async fn remove_suppression(&self, recipient: &str) -> NotificationResult<bool> {
        let mut suppressions = self.suppressions.write().await;
        let removed = suppressions
            .remove(&Self::suppression_key(recipient))
            .is_some();
        if removed {
            tracing::info!(recipient = %recipient, "Suppression entry removed");
        }
        Ok(removed)
    }

    async fn list_suppressions(&self) -> NotificationResult<Vec<SuppressionEntry>> {
        let suppressions = self.suppressions.read().await;
        let mut entries: Vec<SuppressionEntry> = suppressions.values().cloned().collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(entries)
    }
}
