//! The queue processor: claims due records and drives each one through a
//! single send attempt, with per-record error isolation.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;

use crate::backoff::{RetryDecision, RetryPolicy};
use crate::error::{NotificationError, NotificationResult};
use crate::ledger::NotificationLedger;
use crate::models::{
    MessageContent, NotificationRecord, SuppressionEntry, SuppressionKind,
};
use crate::senders::{SendOutcome, SenderRegistry};

/// Default bound on a single provider call.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of one batch run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct BatchSummary {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub retried: usize,
    pub errors: Vec<String>,
}

pub struct QueueProcessor {
    ledger: Arc<dyn NotificationLedger>,
    senders: Arc<SenderRegistry>,
    retry_policy: RetryPolicy,
    send_timeout: Duration,
}

impl QueueProcessor {
    pub fn new(ledger: Arc<dyn NotificationLedger>, senders: Arc<SenderRegistry>) -> Self {
        Self {
            ledger,
            senders,
            retry_policy: RetryPolicy::default(),
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    /// Claim and process up to `limit` due records.
    ///
    /// One record's failure never aborts the batch; every claimed record
    /// ends the run in a consistent status.
    pub async fn process_batch(&self, limit: usize) -> NotificationResult<BatchSummary> {
        let claimed = self.ledger.claim_due(limit, Utc::now()).await?;
        let mut summary = BatchSummary {
            total: claimed.len(),
            ..Default::default()
        };

        for record in claimed {
            let id = record.id;
            match self.process_one(record).await {
                Ok(RecordResult::Sent) => summary.sent += 1,
                Ok(RecordResult::Retried) => summary.retried += 1,
                Ok(RecordResult::Failed) => summary.failed += 1,
                Err(e) => {
                    summary.failed += 1;
                    summary.errors.push(format!("{}: {}", id, e));
                    tracing::error!(id = %id, error = %e, "Record processing failed");
                    // A claimed record must not stay in processing.
                    if let Err(mark_err) = self.ledger.mark_failed(id, &e.to_string()).await {
                        tracing::error!(id = %id, error = %mark_err, "Failed to resolve claimed record");
                    }
                }
            }
        }

        if summary.total > 0 {
            tracing::info!(
                total = summary.total,
                sent = summary.sent,
                failed = summary.failed,
                retried = summary.retried,
                "Batch processed"
            );
        }
        Ok(summary)
    }

    async fn process_one(&self, record: NotificationRecord) -> NotificationResult<RecordResult> {
        // Suppression pre-check: the sender is never invoked for a blocked
        // recipient.
        if let Some(entry) = self.ledger.find_suppression(&record.recipient).await? {
            let reason = format!("recipient suppressed ({}): {}", entry.kind, entry.reason);
            self.ledger.mark_failed(record.id, &reason).await?;
            tracing::info!(id = %record.id, recipient = %record.recipient, "Skipped suppressed recipient");
            return Ok(RecordResult::Failed);
        }

        let sender = self.senders.get(record.kind)?;
        let content = MessageContent {
            subject: record.subject.clone(),
            body: record.content.clone(),
        };

        let outcome = match tokio::time::timeout(
            self.send_timeout,
            sender.send(&record.recipient, &content),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(NotificationError::TransientProvider(format!(
                "send timed out after {:?}",
                self.send_timeout
            ))),
        };

        match outcome {
            Ok(SendOutcome::Accepted {
                provider_message_id,
            }) => {
                self.ledger.mark_sent(record.id, provider_message_id).await?;
                Ok(RecordResult::Sent)
            }
            Ok(SendOutcome::Suppressed { reason }) => {
                self.ledger
                    .mark_failed(record.id, &format!("recipient suppressed: {}", reason))
                    .await?;
                Ok(RecordResult::Failed)
            }
            Err(e) if e.is_retryable() => self.handle_retryable(&record, &e).await,
            Err(e) => self.handle_permanent(&record, &e).await,
        }
    }

    async fn handle_retryable(
        &self,
        record: &NotificationRecord,
        error: &NotificationError,
    ) -> NotificationResult<RecordResult> {
        match self.retry_policy.next_attempt(record, Utc::now()) {
            RetryDecision::Retry {
                scheduled_for,
                retry_count,
            } => {
                self.ledger
                    .reschedule(record.id, scheduled_for, retry_count, &error.to_string())
                    .await?;
                Ok(RecordResult::Retried)
            }
            RetryDecision::Exhausted => {
                self.ledger
                    .mark_failed(
                        record.id,
                        &format!("retry budget exhausted: {}", error),
                    )
                    .await?;
                Ok(RecordResult::Failed)
            }
        }
    }

    async fn handle_permanent(
        &self,
        record: &NotificationRecord,
        error: &NotificationError,
    ) -> NotificationResult<RecordResult> {
        self.ledger.mark_failed(record.id, &error.to_string()).await?;
        // An unreachable destination stays unreachable; block future sends.
        if matches!(error, NotificationError::PermanentProvider(_)) {
            self.ledger
                .upsert_suppression(SuppressionEntry::new(
                    record.recipient.clone(),
                    SuppressionKind::Invalid,
                    error.to_string(),
                    "processor",
                ))
                .await?;
        }
        Ok(RecordResult::Failed)
    }
}

enum RecordResult {
    Sent,
    Retried,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use crate::models::{
        NotificationChannel, NotificationKind, NotificationStatus,
    };
    use crate::senders::MockChannelSender;
    use chrono::Duration as ChronoDuration;

    fn due_record() -> NotificationRecord {
        NotificationRecord::new(
            NotificationKind::Email,
            NotificationChannel::Reminder,
            "alice@example.com".into(),
            Some("Reminder".into()),
            "See you at 10".into(),
            Utc::now() - ChronoDuration::minutes(1),
        )
    }

    fn registry_with(mock: MockChannelSender) -> Arc<SenderRegistry> {
        Arc::new(SenderRegistry::new().register(Arc::new(mock)))
    }

    #[tokio::test]
    async fn test_successful_send_marks_sent() {
        let ledger = InMemoryLedger::shared();
        let record = due_record();
        let id = record.id;
        ledger.insert(record).await.unwrap();

        let mut mock = MockChannelSender::new();
        mock.expect_kind().return_const(NotificationKind::Email);
        mock.expect_send().times(1).returning(|_, _| {
            Ok(SendOutcome::Accepted {
                provider_message_id: Some("msg-1".to_string()),
            })
        });

        let processor = QueueProcessor::new(ledger.clone(), registry_with(mock));
        let summary = processor.process_batch(10).await.unwrap();

        assert_eq!(summary.total, 1);
        assert_eq!(summary.sent, 1);
        let stored = ledger.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Sent);
        assert_eq!(stored.provider_message_id.as_deref(), Some("msg-1"));
    }

    #[tokio::test]
    async fn test_transient_failure_reschedules_with_backoff() {
        let ledger = InMemoryLedger::shared();
        let record = due_record();
        let id = record.id;
        ledger.insert(record).await.unwrap();

        let mut mock = MockChannelSender::new();
        mock.expect_kind().return_const(NotificationKind::Email);
        mock.expect_send()
            .times(1)
            .returning(|_, _| Err(NotificationError::TransientProvider("503".into())));

        let processor = QueueProcessor::new(ledger.clone(), registry_with(mock));
        let before = Utc::now();
        let summary = processor.process_batch(10).await.unwrap();

        assert_eq!(summary.retried, 1);
        let stored = ledger.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Pending);
        assert_eq!(stored.retry_count, 1);
        assert!(stored.scheduled_for >= before + ChronoDuration::minutes(5));
        assert!(stored.error_message.is_some());
    }

    #[tokio::test]
    async fn test_exhausted_budget_fails_terminally() {
        let ledger = InMemoryLedger::shared();
        let mut record = due_record();
        record.retry_count = record.max_retries;
        let id = record.id;
        ledger.insert(record).await.unwrap();

        let mut mock = MockChannelSender::new();
        mock.expect_kind().return_const(NotificationKind::Email);
        mock.expect_send()
            .times(1)
            .returning(|_, _| Err(NotificationError::TransientProvider("503".into())));

        let processor = QueueProcessor::new(ledger.clone(), registry_with(mock));
        let summary = processor.process_batch(10).await.unwrap();

        assert_eq!(summary.failed, 1);
        let stored = ledger.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Failed);
    }

    #[tokio::test]
    async fn test_permanent_failure_suppresses_recipient() {
        let ledger = InMemoryLedger::shared();
        let record = due_record();
        let id = record.id;
        ledger.insert(record).await.unwrap();

        let mut mock = MockChannelSender::new();
        mock.expect_kind().return_const(NotificationKind::Email);
        mock.expect_send().times(1).returning(|_, _| {
            Err(NotificationError::PermanentProvider(
                "invalid address".into(),
            ))
        });

        let processor = QueueProcessor::new(ledger.clone(), registry_with(mock));
        processor.process_batch(10).await.unwrap();

        let stored = ledger.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Failed);
        assert!(ledger
            .find_suppression("alice@example.com")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_suppressed_recipient_never_reaches_sender() {
        let ledger = InMemoryLedger::shared();
        ledger
            .upsert_suppression(SuppressionEntry::new(
                "alice@example.com",
                SuppressionKind::Unsubscribed,
                "opted out",
                "admin",
            ))
            .await
            .unwrap();
        let record = due_record();
        let id = record.id;
        ledger.insert(record).await.unwrap();

        let mut mock = MockChannelSender::new();
        mock.expect_kind().return_const(NotificationKind::Email);
        mock.expect_send().times(0);

        let processor = QueueProcessor::new(ledger.clone(), registry_with(mock));
        let summary = processor.process_batch(10).await.unwrap();

        assert_eq!(summary.failed, 1);
        let stored = ledger.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Failed);
        assert!(stored.error_message.unwrap().contains("suppressed"));
    }

    #[tokio::test]
    async fn test_processing_error_still_resolves_claimed_record() {
        let ledger = InMemoryLedger::shared();
        let mut record = due_record();
        record.kind = NotificationKind::Sms;
        let id = record.id;
        ledger.insert(record).await.unwrap();

        // No SMS sender registered: process_one errors out after the claim.
        let processor = QueueProcessor::new(ledger.clone(), Arc::new(SenderRegistry::new()));
        let summary = processor.process_batch(10).await.unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.errors.len(), 1);
        let stored = ledger.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Failed);
        assert!(stored.error_message.unwrap().contains("no sender registered"));
    }

    #[tokio::test]
    async fn test_concurrent_batches_claim_each_record_once() {
        let ledger = InMemoryLedger::shared();
        let record = due_record();
        let id = record.id;
        ledger.insert(record).await.unwrap();

        let mut mock = MockChannelSender::new();
        mock.expect_kind().return_const(NotificationKind::Email);
        // Exactly one dispatch across both overlapping runs.
        mock.expect_send().times(1).returning(|_, _| {
            Ok(SendOutcome::Accepted {
                provider_message_id: None,
            })
        });

        let processor = QueueProcessor::new(ledger.clone(), registry_with(mock));
        let (a, b) = tokio::join!(processor.process_batch(10), processor.process_batch(10));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.total + b.total, 1);
        assert_eq!(a.sent + b.sent, 1);
        assert_eq!(
            ledger.get(id).await.unwrap().unwrap().status,
            NotificationStatus::Sent
        );
    }

    #[tokio::test]
    async fn test_one_bad_record_does_not_abort_the_batch() {
        let ledger = InMemoryLedger::shared();
        let good = due_record();
        let good_id = good.id;
        let mut bad = due_record();
        bad.recipient = "broken@example.com".into();
        ledger.insert(good).await.unwrap();
        ledger.insert(bad).await.unwrap();

        let mut mock = MockChannelSender::new();
        mock.expect_kind().return_const(NotificationKind::Email);
        mock.expect_send().times(2).returning(|recipient, _| {
            if recipient == "broken@example.com" {
                Err(NotificationError::PermanentProvider("bad".into()))
            } else {
                Ok(SendOutcome::Accepted {
                    provider_message_id: None,
                })
            }
        });

        let processor = QueueProcessor::new(ledger.clone(), registry_with(mock));
        let summary = processor.process_batch(10).await.unwrap();

        assert_eq!(summary.total, 2);
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(
            ledger.get(good_id).await.unwrap().unwrap().status,
            NotificationStatus::Sent
        );
    }
}
