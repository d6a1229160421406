use axum::{extract::State, Extension, Json};
use serde::Deserialize;

use super::current_user;
use crate::auth::Claims;
use crate::error::ApiResult;
use crate::models::BotStatus;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct BotStatusUpdate {
    pub active: bool,
}

/// GET /bot/status
pub async fn get_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<BotStatus>> {
    current_user(&claims)?;
    Ok(Json(state.bot.status()))
}

/// POST /bot/status - the caller becomes the operator whose settings drive the loop
pub async fn set_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(update): Json<BotStatusUpdate>,
) -> ApiResult<Json<BotStatus>> {
    let user = current_user(&claims)?;
    Ok(Json(state.bot.set_active(update.active, user)))
}
