use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{info, warn};

use super::current_user;
use crate::auth::Claims;
use crate::clients::SolanaRpc;
use crate::error::{ApiError, ApiResult};
use crate::models::{TokenBalance, Wallet, SOL_MINT};
use crate::server::AppState;
use crate::storage::Database;

#[derive(Debug, Deserialize)]
pub struct CreateWalletRequest {
    pub name: String,
    pub address: String,
    /// Never stored. Present only so it can be refused explicitly.
    #[serde(default)]
    pub private_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BalanceQuery {
    #[serde(default)]
    pub refresh: bool,
}

const BASE58: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Base58 of a 32-byte public key is 32 to 44 characters.
/// A 64-byte secret key encodes to 87 or 88 and is refused.
fn is_public_address(address: &str) -> bool {
    (32..=44).contains(&address.len()) && address.chars().all(|c| BASE58.contains(c))
}

/// GET /wallets
pub async fn list_wallets(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<Vec<Wallet>>> {
    let user = current_user(&claims)?;
    Ok(Json(state.db.list_wallets(&user)?))
}

/// POST /wallets - public addresses only
pub async fn create_wallet(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateWalletRequest>,
) -> ApiResult<Json<Wallet>> {
    let user = current_user(&claims)?;

    if payload.private_key.as_deref().is_some_and(|k| !k.is_empty()) {
        return Err(ApiError::bad_request(
            "Private keys are not accepted; register the public address only",
        ));
    }
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("Wallet name is required"));
    }
    let address = payload.address.trim();
    if !is_public_address(address) {
        return Err(ApiError::bad_request("Invalid Solana address"));
    }
    if state.db.wallet_by_address(&user, address)?.is_some() {
        return Err(ApiError::bad_request("Wallet already exists"));
    }

    let wallet = state.db.create_wallet(&user, name, address)?;
    info!("👛 Wallet {} ({}) added for {}", wallet.name, wallet.address, claims.username);
    Ok(Json(wallet))
}

/// GET /wallets/{id}
pub async fn get_wallet(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(wallet_id): Path<i64>,
) -> ApiResult<Json<Wallet>> {
    let user = current_user(&claims)?;
    let wallet = state
        .db
        .get_wallet(&user, wallet_id)?
        .ok_or_else(|| ApiError::not_found("Wallet not found"))?;
    Ok(Json(wallet))
}

/// GET /wallets/{id}/balances, `?refresh=true` re-reads the chain first
pub async fn get_wallet_balances(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(wallet_id): Path<i64>,
    Query(query): Query<BalanceQuery>,
) -> ApiResult<Json<Vec<TokenBalance>>> {
    let user = current_user(&claims)?;
    let wallet = state
        .db
        .get_wallet(&user, wallet_id)?
        .ok_or_else(|| ApiError::not_found("Wallet not found"))?;

    if query.refresh {
        refresh_balances(&state.db, &state.chain, &wallet).await?;
    }
    Ok(Json(state.db.wallet_balances(wallet.id)?))
}

/// Store current on-chain balances for the registry tokens.
/// Native SOL and wrapped SOL share the SOL row; tokens the wallet no
/// longer holds drop to zero.
async fn refresh_balances(db: &Database, chain: &SolanaRpc, wallet: &Wallet) -> ApiResult<()> {
    let upstream = |e: anyhow::Error| {
        warn!("Balance refresh for {} failed: {:#}", wallet.address, e);
        ApiError::Upstream("Could not read balances from the Solana RPC node".to_string())
    };
    let sol = chain.get_sol_balance(&wallet.address).await.map_err(upstream)?;
    let tokens = chain.get_token_balances(&wallet.address).await.map_err(upstream)?;

    let mut held: HashMap<String, f64> = HashMap::from([(SOL_MINT.to_string(), sol)]);
    for (mint, amount) in tokens {
        *held.entry(mint).or_insert(0.0) += amount;
    }
    for previous in db.wallet_balances(wallet.id)? {
        held.entry(previous.token.mint_address).or_insert(0.0);
    }

    let mut updated = 0;
    for (mint, balance) in held {
        if let Some(token) = db.token_by_mint(&mint)? {
            db.upsert_balance(wallet.id, token.id, balance)?;
            updated += 1;
        }
    }
    info!("🔄 Refreshed {} balances for wallet {}", updated, wallet.id);
    Ok(())
}
