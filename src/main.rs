//! Solana Arbitrage Backend
//! Mission: Serve the operator dashboard with live prices, opportunities and execution
//! Philosophy: Paper trade by default, never hold keys

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use solarb_backend::server::ws_router;
use solarb_backend::storage::Database;
use solarb_backend::{build_router, AppState, Components, Config};

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let config = Config::parse();
    config.validate()?;
    info!("🚀 Solana arbitrage backend starting");
    info!(
        "⚙️ Execution mode: {:?}, Jupiter: {}, RPC: {}",
        config.execution_mode, config.jupiter_api_url, config.solana_rpc_url
    );

    let db = Arc::new(
        Database::open(&config.database_path)
            .with_context(|| format!("Failed to open database at {}", config.database_path))?,
    );
    info!("📁 Database ready at {}", config.database_path);

    let http = reqwest::Client::builder()
        .timeout(config.http_timeout())
        .build()
        .context("Failed to build HTTP client")?;

    let api_addr = config.api_addr()?;
    let ws_addr = config.ws_addr()?;
    let components = Components::from_config(&config, http)?;
    let state = AppState::new(config, db, components);
    let background = state.spawn_background();

    if let Some(addr) = ws_addr {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind WebSocket listener on {}", addr))?;
        info!("🔌 WebSocket server listening on ws://{}", addr);
        let app = ws_router(state.clone());
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("WebSocket server stopped: {}", e);
            }
        });
    }

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(api_addr)
        .await
        .with_context(|| format!("Failed to bind API listener on {}", api_addr))?;
    info!("🌐 API listening on http://{}", api_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server failed")?;

    for task in background {
        task.abort();
    }
    info!("👋 Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "solarb_backend=debug,solarb=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // Standard dotenv search (cwd + parents)
    let _ = dotenv();

    // Also the crate's own .env when launched from elsewhere
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let candidate = manifest_dir.join(".env");
    if candidate.exists() {
        let _ = dotenv::from_path(&candidate);
    }
}
