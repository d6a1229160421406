use axum::{
    extract::{Query, State},
    Extension, Json,
};
use serde::Deserialize;
use tracing::warn;

use super::current_user;
use crate::auth::Claims;
use crate::error::{ApiError, ApiResult};
use crate::models::{PriceQuote, TokenPair, USDC_MINT};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuery {
    pub input_mint: String,
    #[serde(default = "default_output")]
    pub output_mint: String,
}

fn default_output() -> String {
    USDC_MINT.to_string()
}

/// GET /prices?inputMint=..&outputMint=.. - cached reference, refreshed when stale
pub async fn get_price(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<PriceQuery>,
) -> ApiResult<Json<PriceQuote>> {
    current_user(&claims)?;
    if query.input_mint == query.output_mint {
        return Err(ApiError::bad_request("Unsupported token pair"));
    }
    let base = state.db.token_by_mint(&query.input_mint)?;
    let quote = state.db.token_by_mint(&query.output_mint)?;
    let (Some(base), Some(quote)) = (base, quote) else {
        return Err(ApiError::bad_request("Unsupported token pair"));
    };

    let pair = TokenPair::new(base, quote);
    state.feed.reference_price(&pair).await.map(Json).map_err(|e| {
        warn!("Price lookup for {} failed: {:#}", pair.symbol(), e);
        ApiError::Upstream(format!("No venue could price {}", pair.symbol()))
    })
}
