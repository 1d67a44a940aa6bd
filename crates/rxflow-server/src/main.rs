use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rxflow_ai::MockModel;
use rxflow_core::db::Database;
use rxflow_server::{build_router, maintenance, AppState, Config};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("rxflow=info,tower_http=info")),
        )
        .init();

    let config = Config::parse();
    let db = Database::open(&config.database)
        .with_context(|| format!("failed to open database at {}", config.database.display()))?;
    // Rule-based stand-in until an inference backend is configured.
    let state = AppState::new(db, Arc::new(MockModel), config.processing);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn(maintenance::run_loop(
        state.clone(),
        config.sweep_interval(),
        config.stale_after(),
        shutdown_rx,
    ));

    let app = build_router(state);
    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    info!(addr = %config.bind, processing = ?config.processing, "rxflow server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let _ = shutdown_tx.send(true);
    sweeper.await.context("maintenance task failed")?;
    info!("rxflow server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
