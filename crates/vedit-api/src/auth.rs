//! Bearer token authentication.
//!
//! Tokens are HS256 JWTs whose `sub` claim is the user id. With
//! `AUTH_DISABLED=true` every request runs as a fixed dev user, which is
//! how local development and the integration tests operate.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

/// User id for requests when auth is disabled.
pub const DEV_USER: &str = "dev-user";

/// Authenticated caller, extracted from the Authorization header.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[allow(dead_code)]
    exp: usize,
}

fn bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    let header = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("missing Authorization header"))?;
    header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::unauthorized("expected Bearer token"))
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if state.config.auth_disabled {
            return Ok(AuthUser {
                user_id: DEV_USER.to_string(),
            });
        }
        if state.config.jwt_secret.is_empty() {
            return Err(ApiError::internal("JWT_SECRET not configured"));
        }
        let token = bearer_token(parts)?;
        let key = DecodingKey::from_secret(state.config.jwt_secret.as_bytes());
        let data = decode::<Claims>(token, &key, &Validation::new(Algorithm::HS256))
            .map_err(|e| ApiError::unauthorized(format!("invalid token: {e}")))?;
        if data.claims.sub.is_empty() {
            return Err(ApiError::unauthorized("token has empty subject"));
        }
        Ok(AuthUser {
            user_id: data.claims.sub,
        })
    }
}
