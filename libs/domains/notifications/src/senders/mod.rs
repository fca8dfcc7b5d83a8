//! Channel senders.
//!
//! A sender owns one transport (email, SMS): it consults the suppression
//! list, hands the message to the upstream provider and reports the
//! outcome. The retry loop, status bookkeeping and scheduling all stay in
//! the queue processor; a sender only classifies its own failures as
//! transient or permanent.

mod email;
mod sms;

pub use email::{EmailProviderConfig, EmailSender};
pub use sms::{SmsProviderConfig, SmsSender};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{NotificationError, NotificationResult};
use crate::ledger::NotificationLedger;
use crate::models::{MessageContent, NotificationKind};

/// Outcome of a provider hand-off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Provider accepted the message. The provider-assigned id, when one is
    /// returned, is the join key the webhook reconciler uses later.
    Accepted {
        provider_message_id: Option<String>,
    },
    /// Recipient is on the suppression list; nothing was dispatched.
    Suppressed { reason: String },
}

/// One transport's provider integration.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// The transport this sender serves.
    fn kind(&self) -> NotificationKind;

    /// Human-readable provider name, used in logs and audit events.
    fn name(&self) -> &'static str;

    /// Hand the message to the provider.
    async fn send(
        &self,
        recipient: &str,
        content: &MessageContent,
    ) -> NotificationResult<SendOutcome>;

    /// Whether the provider is currently reachable.
    async fn health_check(&self) -> bool {
        true
    }
}

/// Routes a record's kind to the sender that owns that transport.
#[derive(Default)]
pub struct SenderRegistry {
    senders: HashMap<NotificationKind, Arc<dyn ChannelSender>>,
}

impl SenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        self.senders.insert(sender.kind(), sender);
        self
    }

    pub fn get(&self, kind: NotificationKind) -> NotificationResult<Arc<dyn ChannelSender>> {
        self.senders.get(&kind).cloned().ok_or_else(|| {
            NotificationError::Config(format!("no sender registered for kind '{}'", kind))
        })
    }
}

/// Suppression short-circuit shared by the concrete senders.
pub(crate) async fn suppression_outcome(
    ledger: &dyn NotificationLedger,
    recipient: &str,
) -> NotificationResult<Option<SendOutcome>> {
    match ledger.find_suppression(recipient).await? {
        Some(entry) => Ok(Some(SendOutcome::Suppressed {
            reason: format!("{}: {}", entry.kind, entry.reason),
        })),
        None => Ok(None),
    }
}

/// Classify a provider HTTP status: client errors are permanent, everything
/// retryable (429, 5xx) is transient.
pub(crate) fn classify_provider_status(
    status: reqwest::StatusCode,
    body: &str,
) -> NotificationError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        NotificationError::TransientProvider(format!("provider returned {}: {}", status, body))
    } else {
        NotificationError::PermanentProvider(format!("provider returned {}: {}", status, body))
    }
}
