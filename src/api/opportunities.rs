use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::current_user;
use super::views::{OpportunityResponse, TokenIndex};
use crate::auth::Claims;
use crate::error::{ApiError, ApiResult};
use crate::execution::{ExecutionRequest, SimulationReport};
use crate::models::TradeStatus;
use crate::server::AppState;

/// Dashboard clients send the id as a string, scripts as a number
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OpportunityRef {
    Number(i64),
    Text(String),
}

impl OpportunityRef {
    fn id(&self) -> ApiResult<i64> {
        match self {
            OpportunityRef::Number(id) => Ok(*id),
            OpportunityRef::Text(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ApiError::bad_request("opportunity_id must be an integer")),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub opportunity_id: OpportunityRef,
}

/// GET /opportunities - active, widest spread first
pub async fn list_opportunities(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<OpportunityResponse>>> {
    current_user(&claims)?;
    let index = TokenIndex::load(&state.db)?;
    Ok(Json(index.opportunities(state.db.list_active_opportunities()?)))
}

/// POST /opportunities/scan - kick off a scan, answer with what is active now
pub async fn scan_opportunities(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<OpportunityResponse>>> {
    let user = current_user(&claims)?;
    // A running bot keeps its operator's detector configuration
    let owner = state.bot.settings_owner(user);
    let trading = state.db.trading_settings(&owner)?;
    let dexes = state.db.dex_settings(&owner)?;
    state.arbitrage.apply_settings(&trading, &dexes);

    let arbitrage = state.arbitrage.clone();
    tokio::spawn(async move {
        if let Err(e) = arbitrage.scan_opportunities().await {
            warn!("Requested scan failed: {:#}", e);
        }
    });

    let index = TokenIndex::load(&state.db)?;
    Ok(Json(index.opportunities(state.db.list_active_opportunities()?)))
}

/// POST /opportunities/execute - validate now, execute in the background
pub async fn execute_opportunity(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<ExecuteRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let user = current_user(&claims)?;
    let opportunity_id = payload.opportunity_id.id()?;
    let settings = state.db.trading_settings(&user)?;

    state.executor.preflight(opportunity_id, &settings)?;

    let wallet = state
        .db
        .first_active_wallet(&user)?
        .ok_or_else(|| ApiError::not_found("No active wallet found"))?;

    info!("⚡ Execution of opportunity {} requested by {}", opportunity_id, claims.username);
    let executor = state.executor.clone();
    tokio::spawn(async move {
        let request = ExecutionRequest {
            user_id: user,
            opportunity_id,
            wallet,
            settings,
        };
        match executor.execute(request).await {
            Ok(trade) if trade.status == TradeStatus::Completed => {
                info!("✅ Opportunity {} executed, profit ${:.4}", opportunity_id, trade.profit_usd);
            }
            Ok(trade) => warn!(
                "Opportunity {} failed: {}",
                opportunity_id,
                trade.error_message.unwrap_or_default()
            ),
            Err(e) if e.is_refusal() => warn!("Opportunity {} refused: {}", opportunity_id, e),
            Err(e) => error!("Execution of opportunity {} errored: {:#}", opportunity_id, e),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": "Arbitrage execution started" })),
    ))
}

/// POST /opportunities/{id}/simulate - dry run of both legs
pub async fn simulate_opportunity(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(opportunity_id): Path<i64>,
) -> ApiResult<Json<SimulationReport>> {
    let user = current_user(&claims)?;
    let settings = state.db.trading_settings(&user)?;
    let wallet = state
        .db
        .first_active_wallet(&user)?
        .ok_or_else(|| ApiError::not_found("No active wallet found"))?;

    let report = state
        .executor
        .simulate(opportunity_id, &settings, &wallet.address)
        .await?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opportunity_id_accepts_string_or_number() {
        let req: ExecuteRequest = serde_json::from_str(r#"{"opportunity_id": "42"}"#).unwrap();
        assert_eq!(req.opportunity_id.id().unwrap(), 42);

        let req: ExecuteRequest = serde_json::from_str(r#"{"opportunity_id": 7}"#).unwrap();
        assert_eq!(req.opportunity_id.id().unwrap(), 7);

        let req: ExecuteRequest = serde_json::from_str(r#"{"opportunity_id": "abc"}"#).unwrap();
        assert!(matches!(req.opportunity_id.id(), Err(ApiError::BadRequest(_))));
    }
}
