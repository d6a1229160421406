//! Access Tokens
//! Mission: Issue and verify the HS256 bearer tokens handed out by `/token`

use crate::auth::models::{Claims, User};
use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use tracing::debug;

/// Signing keys are derived once from the configured secret
pub struct JwtHandler {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    lifetime: Duration,
}

impl JwtHandler {
    pub fn new(secret: String, expiration_hours: i64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            lifetime: Duration::hours(expiration_hours),
        }
    }

    /// Bearer token for `user`, valid for the configured lifetime
    pub fn generate_token(&self, user: &User) -> Result<String> {
        let issued = Utc::now();
        let expires = issued
            .checked_add_signed(self.lifetime)
            .context("Token expiry overflows")?;

        let claims = Claims {
            sub: user.id.to_string(),
            username: user.username.clone(),
            iat: issued.timestamp().max(0) as usize,
            exp: expires.timestamp().max(0) as usize,
        };
        debug!("🔑 Issuing token for {} until {}", user.username, expires);

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).context("Failed to sign token")
    }

    /// Claims of a token signed with our secret that has not expired
    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .context("Invalid or expired token")
    }
}
