//! HTTP SMS sender (Twilio-style form-encoded API).

use async_trait::async_trait;
use core_config::{env_or_default, ConfigError, FromEnv};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{NotificationError, NotificationResult};
use crate::ledger::NotificationLedger;
use crate::models::{MessageContent, NotificationKind};
use crate::senders::{classify_provider_status, suppression_outcome, ChannelSender, SendOutcome};

/// Provider settings for the SMS transport.
#[derive(Debug, Clone)]
pub struct SmsProviderConfig {
    pub base_url: String,
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    pub timeout: Duration,
}

impl SmsProviderConfig {
    pub fn new(
        base_url: String,
        account_sid: String,
        auth_token: String,
        from_number: String,
    ) -> Self {
        Self {
            base_url,
            account_sid,
            auth_token,
            from_number,
            timeout: Duration::from_secs(10),
        }
    }
}

impl FromEnv for SmsProviderConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::new(
            env_or_default("SMS_API_BASE_URL", "https://api.twilio.com"),
            env_or_default("SMS_ACCOUNT_SID", ""),
            env_or_default("SMS_AUTH_TOKEN", ""),
            env_or_default("SMS_FROM_NUMBER", ""),
        ))
    }
}

#[derive(Deserialize)]
struct SmsAccepted {
    sid: Option<String>,
}

pub struct SmsSender {
    config: SmsProviderConfig,
    client: reqwest::Client,
    ledger: Arc<dyn NotificationLedger>,
}

impl SmsSender {
    pub fn new(
        config: SmsProviderConfig,
        ledger: Arc<dyn NotificationLedger>,
    ) -> NotificationResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| NotificationError::Config(format!("sms http client: {}", e)))?;
        Ok(Self {
            config,
            client,
            ledger,
        })
    }
}

#[async_trait]
impl ChannelSender for SmsSender {
    fn kind(&self) -> NotificationKind {
        NotificationKind::Sms
    }

    fn name(&self) -> &'static str {
        "sms-http"
    }

    async fn send(
        &self,
        recipient: &str,
        content: &MessageContent,
    ) -> NotificationResult<SendOutcome> {
        if let Some(suppressed) = suppression_outcome(self.ledger.as_ref(), recipient).await? {
            return Ok(suppressed);
        }

        let params = [
            ("From", self.config.from_number.as_str()),
            ("To", recipient),
            ("Body", content.body.as_str()),
        ];

        let response = self
            .client
            .post(format!(
                "{}/2010-04-01/Accounts/{}/Messages.json",
                self.config.base_url, self.config.account_sid
            ))
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_provider_status(status, &body));
        }

        let accepted: SmsAccepted = response.json().await.unwrap_or(SmsAccepted { sid: None });
        tracing::debug!(recipient = %recipient, provider_message_id = ?accepted.sid, "SMS accepted by provider");
        Ok(SendOutcome::Accepted {
            provider_message_id: accepted.sid,
        })
    }
}
