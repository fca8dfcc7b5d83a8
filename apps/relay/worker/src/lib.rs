//! Periodic batch-processing loop for the notification queue.

use core_config::{env_or_default, ConfigError, Environment, FromEnv};
use domain_notifications::{EmailProviderConfig, QueueProcessor, SmsProviderConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Longest exponent applied to the poll interval after repeated failures.
const MAX_BACKOFF_EXPONENT: u32 = 5;

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub environment: Environment,
    pub poll_interval: Duration,
    pub batch_limit: usize,
    pub email: EmailProviderConfig,
    pub sms: SmsProviderConfig,
}

impl FromEnv for WorkerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let poll_interval_secs: u64 = env_or_default("POLL_INTERVAL_SECS", "30")
            .parse()
            .map_err(|e| ConfigError::ParseError {
                key: "POLL_INTERVAL_SECS".to_string(),
                details: format!("{}", e),
            })?;
        let batch_limit: usize = env_or_default("BATCH_LIMIT", "50").parse().map_err(|e| {
            ConfigError::ParseError {
                key: "BATCH_LIMIT".to_string(),
                details: format!("{}", e),
            }
        })?;

        Ok(Self {
            environment: Environment::from_env(),
            poll_interval: Duration::from_secs(poll_interval_secs),
            batch_limit,
            email: EmailProviderConfig::from_env()?,
            sms: SmsProviderConfig::from_env()?,
        })
    }
}

/// Delay before the next poll, stretched exponentially while the processor
/// itself keeps failing (provider outages, ledger errors). A successful
/// batch resets to the base interval.
pub fn next_poll_delay(base: Duration, consecutive_errors: u32) -> Duration {
    base * 2u32.pow(consecutive_errors.min(MAX_BACKOFF_EXPONENT))
}

/// Run the processing loop until a shutdown broadcast arrives.
pub async fn run_loop(
    processor: Arc<QueueProcessor>,
    config: &WorkerConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut consecutive_errors: u32 = 0;

    loop {
        let delay = next_poll_delay(config.poll_interval, consecutive_errors);
        tokio::select! {
            _ = shutdown.recv() => {
                info!("Shutdown received, stopping worker loop");
                break;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        match processor.process_batch(config.batch_limit).await {
            Ok(summary) => {
                consecutive_errors = 0;
                if summary.total > 0 {
                    info!(
                        total = summary.total,
                        sent = summary.sent,
                        failed = summary.failed,
                        retried = summary.retried,
                        "Worker batch complete"
                    );
                }
            }
            Err(e) => {
                consecutive_errors += 1;
                error!(
                    error = %e,
                    consecutive_errors,
                    "Worker batch failed, backing off"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum_helpers::ShutdownCoordinator;
    use chrono::Utc;
    use domain_notifications::{
        ChannelSender, InMemoryLedger, MessageContent, NotificationChannel, NotificationKind,
        NotificationLedger, NotificationRecord, NotificationResult, NotificationStatus,
        SendOutcome, SenderRegistry,
    };

    struct AlwaysAccepts;

    #[async_trait]
    impl ChannelSender for AlwaysAccepts {
        fn kind(&self) -> NotificationKind {
            NotificationKind::Email
        }

        fn name(&self) -> &'static str {
            "always-accepts"
        }

        async fn send(
            &self,
            _recipient: &str,
            _content: &MessageContent,
        ) -> NotificationResult<SendOutcome> {
            Ok(SendOutcome::Accepted {
                provider_message_id: None,
            })
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let base = Duration::from_secs(30);
        assert_eq!(next_poll_delay(base, 0), base);
        assert_eq!(next_poll_delay(base, 1), base * 2);
        assert_eq!(next_poll_delay(base, 3), base * 8);
        // Cap holds for arbitrarily long failure streaks.
        assert_eq!(next_poll_delay(base, 10), base * 32);
        assert_eq!(next_poll_delay(base, 100), base * 32);
    }

    #[test]
    fn test_worker_config_defaults() {
        temp_env::with_vars(
            [
                ("POLL_INTERVAL_SECS", None::<&str>),
                ("BATCH_LIMIT", None),
            ],
            || {
                let config = WorkerConfig::from_env().unwrap();
                assert_eq!(config.poll_interval, Duration::from_secs(30));
                assert_eq!(config.batch_limit, 50);
            },
        );
    }

    #[test]
    fn test_worker_config_rejects_bad_interval() {
        temp_env::with_var("POLL_INTERVAL_SECS", Some("soon"), || {
            assert!(WorkerConfig::from_env().is_err());
        });
    }

    #[tokio::test]
    async fn test_loop_processes_due_records_then_stops() {
        let ledger = InMemoryLedger::shared();
        let record = NotificationRecord::new(
            NotificationKind::Email,
            NotificationChannel::Reminder,
            "a@example.com".into(),
            None,
            "hi".into(),
            Utc::now(),
        );
        let id = record.id;
        ledger.insert(record).await.unwrap();

        let registry = Arc::new(SenderRegistry::new().register(Arc::new(AlwaysAccepts)));
        let processor = Arc::new(QueueProcessor::new(ledger.clone(), registry));

        let config = WorkerConfig {
            environment: Environment::Development,
            poll_interval: Duration::from_millis(10),
            batch_limit: 10,
            email: EmailProviderConfig::new(String::new(), String::new(), String::new()),
            sms: SmsProviderConfig::new(
                String::new(),
                String::new(),
                String::new(),
                String::new(),
            ),
        };

        let (coordinator, rx) = ShutdownCoordinator::new();
        let handle = tokio::spawn({
            let processor = processor.clone();
            let config = config.clone();
            async move { run_loop(processor, &config, rx).await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        coordinator.shutdown();
        handle.await.unwrap();

        assert_eq!(
            ledger.get(id).await.unwrap().unwrap().status,
            NotificationStatus::Sent
        );
    }
}
