pub mod api;
pub mod config;
pub mod core_state;
pub mod db;
pub mod ecg; // Record reading, normalization, inference, result mapping
pub mod intake; // Upload validation + storage
pub mod models;
pub mod visits;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::core_state::{CoreError, CoreState};

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Server(#[from] api::ServerError),
}

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init();
}

/// Run the HTTP service until Ctrl-C.
pub async fn run() -> Result<(), StartupError> {
    init_tracing();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let config = AppConfig::from_env()?;
    let bind_addr = config.bind_addr;
    let core = Arc::new(CoreState::initialize(config)?);

    let mut server = api::start_api_server(core, bind_addr).await?;
    tracing::info!(addr = %server.addr, "Listening");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
    }

    server.shutdown();
    server.wait().await?;
    Ok(())
}
