// crates/server/src/main.rs
//! Crewdeck server binary.
//!
//! Parses configuration, installs logging and metrics, then serves the API
//! until SIGINT/SIGTERM. Running jobs get a grace period to finish before
//! they are recorded as interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use crewdeck_observability::init_tracing;
use crewdeck_server::{create_app, init_metrics, AppState, Config};

const DEFAULT_LOG_DIRECTIVES: &str = "info,crewdeck_server=debug,crewdeck_jobs=debug";

/// Resolves on the first of Ctrl-C or (on Unix) SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, initiating graceful shutdown"),
        _ = terminate => tracing::info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_tracing(config.log_format, DEFAULT_LOG_DIRECTIVES)?;

    init_metrics();

    let addr = config.addr();
    let grace = config.shutdown_grace;
    let state = AppState::new(config).context("invalid workflow configuration")?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        max_jobs = state.store.max_active(),
        workflows = ?state.workflows.kinds(),
        default_workflow = state.workflows.default_kind(),
        job_timeout_secs = state.runner.timeout().as_secs_f64(),
        "starting crewdeck"
    );

    let app = create_app(state.clone());
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "listening");

    // Jobs drain before open streams are closed.
    let draining = state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!(
                running = draining.runner.running_tasks(),
                grace_secs = grace.as_secs_f64(),
                "draining running jobs"
            );
            draining.runner.shutdown(grace).await;
            draining.shutdown.cancel();
        })
        .await?;

    tracing::info!("shutdown complete");

    Ok(())
}
