//! Authentication Middleware
//! Mission: Attach validated `Claims` to every protected request

use crate::auth::jwt::JwtHandler;
use crate::error::ApiError;
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::debug;

/// Rejects with 401 unless a valid bearer token is presented
pub async fn auth_middleware(
    State(jwt): State<Arc<JwtHandler>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = header_token(req.headers())?
        .or_else(|| query_token(req.uri().query()))
        .ok_or_else(|| ApiError::Unauthorized("Not authenticated".to_string()))?;

    let claims = jwt.validate_token(&token).map_err(|e| {
        debug!("Rejected token on {}: {:#}", req.uri().path(), e);
        ApiError::Unauthorized("Could not validate credentials".to_string())
    })?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

fn header_token(headers: &HeaderMap) -> Result<Option<String>, ApiError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| Some(t.trim().to_string()))
        .ok_or_else(|| {
            ApiError::Unauthorized("Invalid authorization format. Use: Bearer {token}".to_string())
        })
}

/// Browsers cannot set headers on a WebSocket upgrade, so `?token=` is accepted too
fn query_token(query: Option<&str>) -> Option<String> {
    query?
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}
