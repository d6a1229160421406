use axum::{extract::State, Extension, Json};
use serde::Serialize;

use super::current_user;
use super::views::{OpportunityResponse, TokenIndex, TradeResponse};
use crate::auth::Claims;
use crate::error::ApiResult;
use crate::models::PerformancePoint;
use crate::server::AppState;

const RECENT_LIMIT: usize = 5;
const PERFORMANCE_DAYS: i64 = 30;

#[derive(Debug, Serialize)]
pub struct DashboardStats {
    pub total_profit: f64,
    pub active_opportunities: i64,
    pub trades_executed: i64,
    /// Mean wall-clock duration of the user's executions
    pub avg_response_time_ms: i64,
}

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    pub stats: DashboardStats,
    pub recent_opportunities: Vec<OpportunityResponse>,
    pub recent_trades: Vec<TradeResponse>,
    pub performance_data: Vec<PerformancePoint>,
}

/// GET /dashboard
pub async fn get_dashboard(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<DashboardResponse>> {
    let user = current_user(&claims)?;
    let db = &state.db;

    let (total_profit, trades_executed, avg_ms) = db.trade_stats(&user)?;
    let index = TokenIndex::load(db)?;

    Ok(Json(DashboardResponse {
        stats: DashboardStats {
            total_profit,
            active_opportunities: db.count_active_opportunities()?,
            trades_executed,
            avg_response_time_ms: avg_ms.round() as i64,
        },
        recent_opportunities: index.opportunities(db.recent_active_opportunities(RECENT_LIMIT)?),
        recent_trades: index.trades(db.list_trades(&user, Some(RECENT_LIMIT))?),
        performance_data: db.performance_series(&user, PERFORMANCE_DAYS)?,
    }))
}
