use axum_helpers::ShutdownCoordinator;
use core_config::tracing::{init_tracing, install_color_eyre};
use core_config::FromEnv;
use tracing::info;

mod config;
mod openapi;
mod routes;
mod state;

use config::Config;
use state::AppState;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // Install color-eyre first for colored error output.
    install_color_eyre();

    let config = Config::from_env()?;
    init_tracing(&config.environment);

    if config.webhook_secret.is_none() {
        tracing::warn!("WEBHOOK_SECRET not set; provider callbacks are accepted unverified");
    }

    let state = AppState::from_config(config)?;
    let app = routes::build_router(&state);

    let address = state.config.server.address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!("relay API listening on {}", address);

    let (coordinator, _) = ShutdownCoordinator::new();

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            coordinator.wait_for_signal().await;
        })
        .await?;

    info!("relay API shutdown complete");
    Ok(())
}
