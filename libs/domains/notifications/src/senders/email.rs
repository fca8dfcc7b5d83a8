//! HTTP email sender (SendGrid-style JSON API).

use async_trait::async_trait;
use core_config::{env_or_default, ConfigError, FromEnv};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{NotificationError, NotificationResult};
use crate::ledger::NotificationLedger;
use crate::models::{MessageContent, NotificationKind};
use crate::senders::{classify_provider_status, suppression_outcome, ChannelSender, SendOutcome};

/// Provider settings for the email transport.
#[derive(Debug, Clone)]
pub struct EmailProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub from_address: String,
    pub timeout: Duration,
}

impl EmailProviderConfig {
    pub fn new(base_url: String, api_key: String, from_address: String) -> Self {
        Self {
            base_url,
            api_key,
            from_address,
            timeout: Duration::from_secs(10),
        }
    }
}

impl FromEnv for EmailProviderConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::new(
            env_or_default("EMAIL_API_BASE_URL", "https://api.sendgrid.com"),
            env_or_default("EMAIL_API_KEY", ""),
            env_or_default("EMAIL_FROM_ADDRESS", "no-reply@example.com"),
        ))
    }
}

#[derive(Serialize)]
struct EmailPayload<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    body: &'a str,
}

#[derive(Deserialize)]
struct EmailAccepted {
    #[serde(alias = "message_id")]
    id: Option<String>,
}

pub struct EmailSender {
    config: EmailProviderConfig,
    client: reqwest::Client,
    ledger: Arc<dyn NotificationLedger>,
}

impl EmailSender {
    pub fn new(
        config: EmailProviderConfig,
        ledger: Arc<dyn NotificationLedger>,
    ) -> NotificationResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| NotificationError::Config(format!("email http client: {}", e)))?;
        Ok(Self {
            config,
            client,
            ledger,
        })
    }
}

#[async_trait]
impl ChannelSender for EmailSender {
    fn kind(&self) -> NotificationKind {
        NotificationKind::Email
    }

    fn name(&self) -> &'static str {
        "email-http"
    }

    async fn send(
        &self,
        recipient: &str,
        content: &MessageContent,
    ) -> NotificationResult<SendOutcome> {
        if let Some(suppressed) = suppression_outcome(self.ledger.as_ref(), recipient).await? {
            return Ok(suppressed);
        }

        let payload = EmailPayload {
            from: &self.config.from_address,
            to: recipient,
            subject: content.subject.as_deref().unwrap_or(""),
            body: &content.body,
        };

        let response = self
            .client
            .post(format!("{}/v3/mail/send", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_provider_status(status, &body));
        }

        let accepted: EmailAccepted = response.json().await.unwrap_or(EmailAccepted { id: None });
        tracing::debug!(recipient = %recipient, provider_message_id = ?accepted.id, "Email accepted by provider");
        Ok(SendOutcome::Accepted {
            provider_message_id: accepted.id,
        })
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(format!("{}/v3/health", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}
