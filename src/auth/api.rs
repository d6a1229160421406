//! Authentication API Endpoints
//! Mission: Registration, password login and the current-user lookup

use crate::auth::{
    jwt::JwtHandler,
    models::{Claims, LoginForm, RegisterRequest, TokenResponse, UserResponse},
    user_store::{RegistrationConflict, UserStore},
};
use crate::settings::default_categories;
use crate::storage::Database;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Form, Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Shared auth state
#[derive(Clone)]
pub struct AuthState {
    pub user_store: Arc<UserStore>,
    pub jwt_handler: Arc<JwtHandler>,
    pub db: Arc<Database>,
    /// Venue names seeded into a new account's `dexes` settings
    pub venues: Arc<Vec<String>>,
}

/// Login endpoint - POST /token (form encoded)
pub async fn login(
    State(state): State<AuthState>,
    Form(form): Form<LoginForm>,
) -> Result<Json<TokenResponse>, AuthApiError> {
    info!("🔐 Login attempt: {}", form.username);

    let user = state
        .user_store
        .authenticate(&form.username, &form.password)
        .map_err(AuthApiError::internal)?
        .ok_or_else(|| {
            warn!("❌ Failed login attempt: {}", form.username);
            AuthApiError::InvalidCredentials
        })?;

    let token = state
        .jwt_handler
        .generate_token(&user)
        .map_err(AuthApiError::internal)?;

    info!("✅ Login successful: {}", user.username);

    Ok(Json(TokenResponse {
        access_token: token,
        token_type: "bearer".to_string(),
    }))
}

/// Register endpoint - POST /register
pub async fn register(
    State(state): State<AuthState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<UserResponse>, AuthApiError> {
    let username = payload.username.trim();
    let email = payload.email.trim();

    if username.len() < 3
        || username.len() > 32
        || !username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(AuthApiError::InvalidUsername);
    }
    if !is_plausible_email(email) {
        return Err(AuthApiError::InvalidEmail);
    }
    if payload.password.len() < 8 {
        return Err(AuthApiError::WeakPassword);
    }

    if let Some(conflict) = state
        .user_store
        .find_conflict(username, email)
        .map_err(AuthApiError::internal)?
    {
        return Err(AuthApiError::AlreadyRegistered(conflict));
    }

    let user = state
        .user_store
        .create_user(username, email, &payload.password)
        .map_err(AuthApiError::internal)?;

    for (category, value) in default_categories(&state.venues) {
        state
            .db
            .put_setting(&user.id, category, &value)
            .map_err(AuthApiError::internal)?;
    }

    Ok(Json(UserResponse::from_user(&user)))
}

/// Current user - GET /users/me
pub async fn me(
    State(state): State<AuthState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UserResponse>, AuthApiError> {
    let user_id = claims.user_id().ok_or(AuthApiError::Unauthorized)?;
    let user = state
        .user_store
        .get_user(&user_id)
        .map_err(AuthApiError::internal)?
        .ok_or(AuthApiError::Unauthorized)?;
    Ok(Json(UserResponse::from_user(&user)))
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}

#[derive(Debug)]
pub enum AuthApiError {
    InvalidCredentials,
    Unauthorized,
    InvalidUsername,
    InvalidEmail,
    WeakPassword,
    AlreadyRegistered(RegistrationConflict),
    InternalError,
}

impl AuthApiError {
    fn internal(err: anyhow::Error) -> Self {
        error!("Auth storage error: {:#}", err);
        AuthApiError::InternalError
    }
}

impl IntoResponse for AuthApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthApiError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "Incorrect username or password".to_string(),
            ),
            AuthApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Could not validate credentials".to_string(),
            ),
            AuthApiError::InvalidUsername => (
                StatusCode::BAD_REQUEST,
                "Username must be 3-32 characters of letters, digits, '.', '_' or '-'".to_string(),
            ),
            AuthApiError::InvalidEmail => {
                (StatusCode::BAD_REQUEST, "Invalid email address".to_string())
            }
            AuthApiError::WeakPassword => (
                StatusCode::BAD_REQUEST,
                "Password must be at least 8 characters".to_string(),
            ),
            AuthApiError::AlreadyRegistered(conflict) => {
                (StatusCode::BAD_REQUEST, conflict.to_string())
            }
            AuthApiError::InternalError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let mut response = (status, Json(json!({ "detail": message }))).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                axum::http::header::WWW_AUTHENTICATE,
                axum::http::HeaderValue::from_static("Bearer"),
            );
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_plausibility() {
        assert!(is_plausible_email("alice@example.com"));
        assert!(!is_plausible_email("alice.example.com"));
        assert!(!is_plausible_email("@example.com"));
        assert!(!is_plausible_email("alice@localhost"));
        assert!(!is_plausible_email("alice@example."));
    }

    #[test]
    fn test_conflict_maps_to_bad_request() {
        let response =
            AuthApiError::AlreadyRegistered(RegistrationConflict::Username).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = AuthApiError::InvalidCredentials.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
