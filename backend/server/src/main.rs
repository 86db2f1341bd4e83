//! Program approval server: entry point.
//!
//! Opens (and migrates) the SQLite store, optionally bootstraps the first
//! administrator, starts the background session sweeper, and serves the
//! Axum REST API until Ctrl-C.

mod api;
mod auth;
mod config;
mod errors;
mod sweeper;

use std::sync::Arc;

use program_approval::ApprovalService;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG controls verbosity.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Optional .env file.
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;

    let service = ApprovalService::connect(&config.database_url, &config.store_options()).await?;

    if let Some(admin) = &config.bootstrap_admin {
        match service
            .bootstrap_admin(&admin.name, &admin.email, &admin.password)
            .await?
        {
            Some(actor) => info!("Bootstrapped administrator {} ({})", actor.id, admin.email),
            None => info!("Administrator already present; skipping bootstrap"),
        }
    }

    // ─── Session sweeper ──────────────────────────────────
    let shutdown = CancellationToken::new();
    let sweeper = tokio::spawn(sweeper::run(
        service.clone(),
        config.sweep_interval(),
        shutdown.clone(),
    ));

    // ─── REST API ─────────────────────────────────────────
    let api_state = Arc::new(api::ApiState {
        service,
        session_ttl: config.session_ttl(),
        max_body_bytes: config.max_upload_bytes,
    });
    let app = api::router(api_state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        warn!("Session sweeper ended abnormally: {e}");
    }
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for Ctrl-C: {e}");
                // Without a signal handler, only an explicit cancel stops the server.
                shutdown.cancelled().await;
            }
            info!("Shutdown requested");
        }
        _ = shutdown.cancelled() => {}
    }
}
