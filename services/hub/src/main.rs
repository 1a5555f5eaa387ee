//! waggle hub
//!
//! The hub is the central coordination service for an agent swarm. It hosts
//! the coordinator, agent-state, and resource-lock actors behind an HTTP +
//! WebSocket API.

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use waggle_hub::{api, config, registry::Registry, state::AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to WAGGLE_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting waggle hub");
    info!(
        listen_addr = %config.listen_addr,
        data_dir = %config.data_dir.display(),
        dev_mode = config.dev_mode,
        "Configuration loaded"
    );

    std::fs::create_dir_all(&config.data_dir)?;

    // Create application state and warm the coordinator instance so a
    // broken data dir fails startup, not the first request.
    let registry = Registry::new(config.data_dir.clone());
    let state = AppState::new(registry);
    if let Err(e) = state.registry().coordinator().await {
        error!(error = %e, "Failed to open coordinator store");
        return Err(e.into());
    }

    // Build and run the server
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Received shutdown signal");
        })
        .await?;

    info!("Hub stopped");
    Ok(())
}
