use axum_helpers::ShutdownCoordinator;
use core_config::tracing::{init_tracing, install_color_eyre};
use core_config::FromEnv;
use domain_notifications::{
    EmailSender, InMemoryLedger, QueueProcessor, SenderRegistry, SmsSender,
};
use relay_worker::{run_loop, WorkerConfig};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    install_color_eyre();

    let config = WorkerConfig::from_env()?;
    init_tracing(&config.environment);

    let ledger = InMemoryLedger::shared();
    let email = EmailSender::new(config.email.clone(), ledger.clone())?;
    let sms = SmsSender::new(config.sms.clone(), ledger.clone())?;
    let registry = Arc::new(
        SenderRegistry::new()
            .register(Arc::new(email))
            .register(Arc::new(sms)),
    );
    let processor = Arc::new(QueueProcessor::new(ledger, registry));

    info!(
        interval = ?config.poll_interval,
        batch_limit = config.batch_limit,
        "relay worker starting"
    );

    let (coordinator, rx) = ShutdownCoordinator::new();
    let signals = coordinator.clone();
    tokio::spawn(async move { signals.wait_for_signal().await });

    run_loop(processor, &config, rx).await;

    info!("relay worker shutdown complete");
    Ok(())
}
