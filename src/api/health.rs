use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::error;

use crate::feed::SourceHealthReport;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub execution_mode: &'static str,
    pub bot_active: bool,
    pub sources: Vec<SourceHealthReport>,
}

/// GET /
pub async fn root() -> Json<Value> {
    Json(json!({ "message": "Solana Arbitrage Bot API" }))
}

/// GET /health - 503 when the database is unreachable
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (status, database, code) = match state.db.ping() {
        Ok(()) => ("healthy", "connected", StatusCode::OK),
        Err(e) => {
            error!("Health check failed: {:#}", e);
            ("unhealthy", "unavailable", StatusCode::SERVICE_UNAVAILABLE)
        }
    };

    (
        code,
        Json(HealthResponse {
            status,
            database,
            execution_mode: state.executor.mode(),
            bot_active: state.bot.status().active,
            sources: state.feed.health_report(),
        }),
    )
}
