use axum::{
    extract::{Path, State},
    Extension, Json,
};
use std::collections::BTreeMap;
use tracing::debug;

use super::current_user;
use crate::auth::Claims;
use crate::error::ApiResult;
use crate::models::{Token, TokenPair, USDC_MINT};
use crate::risk::{assess_portfolio, Holding, PortfolioRisk, TradeRiskAssessment};
use crate::server::AppState;

/// GET /risk/trade/{id} - unknown ids score 10 and cannot execute
pub async fn assess_trade_risk(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(opportunity_id): Path<i64>,
) -> ApiResult<Json<TradeRiskAssessment>> {
    let user = current_user(&claims)?;
    let settings = state.db.trading_settings(&user)?;
    let opportunity = state.db.get_opportunity(opportunity_id)?;
    Ok(Json(state.executor.assess(opportunity.as_ref(), &settings)))
}

/// GET /risk/portfolio - balances across all wallets, valued in USDC
pub async fn assess_portfolio_risk(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<PortfolioRisk>> {
    let user = current_user(&claims)?;
    let has_wallets = !state.db.list_wallets(&user)?.is_empty();

    let mut positions: BTreeMap<String, (Token, f64)> = BTreeMap::new();
    for balance in state.db.user_balances(&user)? {
        if balance.balance <= 0.0 {
            continue;
        }
        positions
            .entry(balance.token.mint_address.clone())
            .or_insert_with(|| (balance.token.clone(), 0.0))
            .1 += balance.balance;
    }

    let usdc = state.db.token_by_mint(USDC_MINT)?;
    let mut holdings = Vec::with_capacity(positions.len());
    for (token, balance) in positions.into_values() {
        let price_usd = usd_price(&state, &token, usdc.as_ref()).await;
        holdings.push(Holding {
            symbol: token.symbol,
            balance,
            price_usd,
        });
    }

    Ok(Json(assess_portfolio(has_wallets, &holdings)))
}

async fn usd_price(state: &AppState, token: &Token, usdc: Option<&Token>) -> Option<f64> {
    if token.mint_address == USDC_MINT {
        return Some(1.0);
    }
    let pair = TokenPair::new(token.clone(), usdc?.clone());
    match state.feed.reference_price(&pair).await {
        Ok(quote) => Some(quote.price),
        Err(e) => {
            debug!("No USD price for {}: {:#}", token.symbol, e);
            None
        }
    }
}
