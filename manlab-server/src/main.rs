//! manlab-server - Fleet Management Control Plane
//!
//! The server side of ManLab: agent hub, command queue, remote tool
//! sessions, streaming downloads, and the periodic control loops.

use manlab_server::api::{ApiServer, ApiServerConfig};
use manlab_server::config::ServerConfig;
use manlab_server::database;
use manlab_server::logging::init_logging;
use manlab_server::services::ServiceContainer;
use tracing::{error, info};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables first; logging and config read them.
    dotenvy::dotenv().ok();

    let log_dir = std::env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string());
    let (logging_config, _guard) = init_logging(&log_dir)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Starting manlab-server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env_or_default();

    info!("Connecting to database: {}", config.database_url);
    let pool = database::init_pool(&config.database_url).await?;

    info!("Running database migrations...");
    database::run_migrations(&pool).await?;
    info!("Database migrations complete");

    info!("Initializing services...");
    let container = ServiceContainer::new(pool, &config)?;

    logging_config.start_retention_cleanup(container.cancellation_token());
    container.start_workers()?;

    let server = ApiServer::new(
        ApiServerConfig {
            bind_address: config.bind_address.clone(),
            port: config.port,
            enable_cors: config.enable_cors,
        },
        container.state.clone(),
        container.cancellation_token(),
    );

    info!("manlab-server started successfully");

    let serve = tokio::spawn(async move { server.run().await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), initiating shutdown...");
        }
        _ = wait_for_sigterm() => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    info!("Shutting down services...");
    container.shutdown();

    if let Ok(Err(e)) = serve.await {
        error!("Server exited with error: {}", e);
    }

    info!("manlab-server shutdown complete");
    Ok(())
}

/// Wait for SIGTERM signal (Unix only).
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
    sigterm.recv().await;
}

/// Wait for SIGTERM signal (non-Unix fallback).
#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}
