//! HTTP API
//! Mission: JSON endpoints the operator dashboard talks to

pub mod bot;
pub mod dashboard;
pub mod health;
pub mod opportunities;
pub mod prices;
pub mod risk;
pub mod settings;
pub mod trades;
pub mod views;
pub mod wallets;

use uuid::Uuid;

use crate::auth::Claims;
use crate::error::{ApiError, ApiResult};

/// User id carried by a validated token
pub(crate) fn current_user(claims: &Claims) -> ApiResult<Uuid> {
    claims
        .user_id()
        .ok_or_else(|| ApiError::Unauthorized("Could not validate credentials".to_string()))
}
