use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::Deserialize;

use super::current_user;
use super::views::{TokenIndex, TradeResponse};
use crate::auth::Claims;
use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct TradeQuery {
    pub limit: Option<usize>,
}

/// GET /trades - newest first
pub async fn list_trades(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<TradeQuery>,
) -> ApiResult<Json<Vec<TradeResponse>>> {
    let user = current_user(&claims)?;
    let index = TokenIndex::load(&state.db)?;
    Ok(Json(index.trades(state.db.list_trades(&user, query.limit)?)))
}

/// GET /trades/{id}
pub async fn get_trade(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(trade_id): Path<i64>,
) -> ApiResult<Json<TradeResponse>> {
    let user = current_user(&claims)?;
    let trade = state
        .db
        .get_trade(&user, trade_id)?
        .ok_or_else(|| ApiError::not_found("Trade not found"))?;
    Ok(Json(TokenIndex::load(&state.db)?.trade(trade)))
}
