//! Data models for the notifications domain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Transport used to reach the recipient.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Email,
    Sms,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationKind::Email => write!(f, "email"),
            NotificationKind::Sms => write!(f, "sms"),
        }
    }
}

/// Semantic purpose of a notification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    /// Appointment reminder sent to a customer.
    Reminder,
    /// Daily schedule digest sent to staff.
    DailySchedule,
    /// Booking confirmation.
    Confirmation,
    /// Cancellation notice.
    Cancellation,
}

impl std::fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationChannel::Reminder => write!(f, "reminder"),
            NotificationChannel::DailySchedule => write!(f, "daily_schedule"),
            NotificationChannel::Confirmation => write!(f, "confirmation"),
            NotificationChannel::Cancellation => write!(f, "cancellation"),
        }
    }
}

/// Lifecycle status of a notification record.
///
/// Statuses carry an information ordering: pending < processing < sent <
/// delivered. The terminal set {delivered, bounced, failed, cancelled} is
/// final; once reached, a record never regresses to a lower-information
/// status, including via out-of-order webhook callbacks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Processing,
    Sent,
    Delivered,
    Bounced,
    Failed,
    Cancelled,
}

impl NotificationStatus {
    /// Whether the record is in a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NotificationStatus::Delivered
                | NotificationStatus::Bounced
                | NotificationStatus::Failed
                | NotificationStatus::Cancelled
        )
    }

    /// Information rank used by the monotonicity guard. Terminal statuses
    /// outrank every non-terminal one.
    pub fn rank(&self) -> u8 {
        match self {
            NotificationStatus::Pending => 0,
            NotificationStatus::Processing => 1,
            NotificationStatus::Sent => 2,
            NotificationStatus::Delivered
            | NotificationStatus::Bounced
            | NotificationStatus::Failed
            | NotificationStatus::Cancelled => 3,
        }
    }

    /// Whether a write moving the record to `next` is permitted by the
    /// monotonicity guard: never out of a terminal state, never to a
    /// lower-or-equal information rank.
    pub fn allows(&self, next: NotificationStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationStatus::Pending => write!(f, "pending"),
            NotificationStatus::Processing => write!(f, "processing"),
            NotificationStatus::Sent => write!(f, "sent"),
            NotificationStatus::Delivered => write!(f, "delivered"),
            NotificationStatus::Bounced => write!(f, "bounced"),
            NotificationStatus::Failed => write!(f, "failed"),
            NotificationStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One queued/sent notification and its lifecycle state.
///
/// Created by a producer, mutated only by the queue processor and the
/// webhook reconciler, never deleted (retained for audit).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub channel: NotificationChannel,
    pub recipient: String,
    pub subject: Option<String>,
    pub content: String,
    pub status: NotificationStatus,
    pub scheduled_for: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error_message: Option<String>,
    pub correlation_id: Option<String>,
    pub template_id: Option<String>,
    pub provider_message_id: Option<String>,
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Default retry budget for new records.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

impl NotificationRecord {
    pub fn new(
        kind: NotificationKind,
        channel: NotificationChannel,
        recipient: String,
        subject: Option<String>,
        content: String,
        scheduled_for: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            channel,
            recipient,
            subject,
            content,
            status: NotificationStatus::Pending,
            scheduled_for,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            error_message: None,
            correlation_id: None,
            template_id: None,
            provider_message_id: None,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Producer-side dedup scope: the appointment when one is referenced,
    /// otherwise the logical day of the scheduled send.
    pub fn dedup_scope(&self) -> String {
        self.metadata
            .get("appointment_id")
            .cloned()
            .unwrap_or_else(|| self.scheduled_for.date_naive().to_string())
    }
}

/// Why a recipient is suppressed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionKind {
    /// Destination is invalid (hard bounce, bad number).
    Invalid,
    /// Recipient opted out.
    Unsubscribed,
}

impl std::fmt::Display for SuppressionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuppressionKind::Invalid => write!(f, "invalid"),
            SuppressionKind::Unsubscribed => write!(f, "unsubscribed"),
        }
    }
}

/// A recipient blocked from further sends.
///
/// Entries are permanent: they never expire and are removed only through an
/// explicit administrative operation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SuppressionEntry {
    pub recipient: String,
    pub kind: SuppressionKind,
    pub reason: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

impl SuppressionEntry {
    pub fn new(
        recipient: impl Into<String>,
        kind: SuppressionKind,
        reason: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            kind,
            reason: reason.into(),
            source: source.into(),
            created_at: Utc::now(),
        }
    }
}

/// Message content handed to a channel sender.
#[derive(Debug, Clone, Default)]
pub struct MessageContent {
    pub subject: Option<String>,
    pub body: String,
}

/// Canonical delivery outcome mapped from provider webhook vocabulary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Queued,
    Sending,
    Sent,
    Delivered,
    Bounced,
    Failed,
    Accepted,
    Unknown,
}

impl DeliveryOutcome {
    /// Map a provider's status word onto the canonical vocabulary.
    pub fn from_provider_status(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "queued" => DeliveryOutcome::Queued,
            "sending" => DeliveryOutcome::Sending,
            "sent" => DeliveryOutcome::Sent,
            "delivered" => DeliveryOutcome::Delivered,
            "bounce" | "bounced" | "undelivered" => DeliveryOutcome::Bounced,
            "failed" | "dropped" => DeliveryOutcome::Failed,
            "accepted" => DeliveryOutcome::Accepted,
            _ => DeliveryOutcome::Unknown,
        }
    }

    /// The record status this outcome maps to, if it carries enough
    /// information to move a record at all.
    pub fn target_status(&self) -> Option<NotificationStatus> {
        match self {
            DeliveryOutcome::Sent => Some(NotificationStatus::Sent),
            DeliveryOutcome::Delivered => Some(NotificationStatus::Delivered),
            DeliveryOutcome::Bounced => Some(NotificationStatus::Bounced),
            DeliveryOutcome::Failed => Some(NotificationStatus::Failed),
            DeliveryOutcome::Queued
            | DeliveryOutcome::Sending
            | DeliveryOutcome::Accepted
            | DeliveryOutcome::Unknown => None,
        }
    }

    /// Permanent-failure class of outcomes: these suppress the recipient.
    pub fn is_permanent_failure(&self) -> bool {
        matches!(self, DeliveryOutcome::Bounced | DeliveryOutcome::Failed)
    }
}

impl std::fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryOutcome::Queued => write!(f, "queued"),
            DeliveryOutcome::Sending => write!(f, "sending"),
            DeliveryOutcome::Sent => write!(f, "sent"),
            DeliveryOutcome::Delivered => write!(f, "delivered"),
            DeliveryOutcome::Bounced => write!(f, "bounced"),
            DeliveryOutcome::Failed => write!(f, "failed"),
            DeliveryOutcome::Accepted => write!(f, "accepted"),
            DeliveryOutcome::Unknown => write!(f, "unknown"),
        }
    }
}

/// Request body for enqueueing a notification.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct EnqueueRequest {
    pub kind: NotificationKind,
    pub channel: NotificationChannel,
    /// Email address or phone number.
    #[validate(length(min = 3, max = 320))]
    pub recipient: String,
    #[validate(length(max = 255))]
    pub subject: Option<String>,
    #[validate(length(min = 1, max = 10_000))]
    pub content: String,
    /// When to send; immediate when omitted.
    pub scheduled_for: Option<DateTime<Utc>>,
    pub correlation_id: Option<String>,
    pub template_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Response body for an enqueue: the record id, and whether an equivalent
/// record already existed.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EnqueueReceipt {
    pub id: Uuid,
    pub deduplicated: bool,
}
