use axum::{
    extract::{Path, State},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::info;

use super::current_user;
use crate::auth::Claims;
use crate::error::{ApiError, ApiResult};
use crate::server::AppState;
use crate::settings::validate_category;

#[derive(Debug, Deserialize)]
pub struct SettingsUpdate {
    pub settings: Value,
}

fn check_category(category: &str) -> ApiResult<()> {
    let valid = !category.is_empty()
        && category.len() <= 32
        && category
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ApiError::bad_request(format!("Invalid settings category '{}'", category)))
    }
}

/// GET /settings - every category keyed by name
pub async fn get_settings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<BTreeMap<String, Value>>> {
    let user = current_user(&claims)?;
    Ok(Json(state.db.all_settings(&user)?))
}

/// GET /settings/{category}
pub async fn get_category(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(category): Path<String>,
) -> ApiResult<Json<Value>> {
    let user = current_user(&claims)?;
    check_category(&category)?;
    state
        .db
        .get_setting(&user, &category)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Settings for category '{}' not found", category)))
}

/// PUT /settings/{category} - upsert, `trading` and `dexes` are validated
pub async fn put_category(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(category): Path<String>,
    Json(update): Json<SettingsUpdate>,
) -> ApiResult<Json<Value>> {
    let user = current_user(&claims)?;
    check_category(&category)?;
    validate_category(&category, &update.settings, &state.feed.venues()).map_err(ApiError::BadRequest)?;

    state.db.put_setting(&user, &category, &update.settings)?;
    info!("⚙️ {} updated '{}' settings", claims.username, category);
    Ok(Json(update.settings))
}
