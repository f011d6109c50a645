//! Credit and profile handlers.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::services::profile::{self, Profile};
use crate::state::AppState;

/// The caller's profile: balance plus recent ledger entries. The first
/// read for a new user applies the welcome grant.
pub async fn get_profile(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<Profile>> {
    let profile = profile::profile(&state, &user.user_id).await?;
    Ok(Json(profile))
}

/// Coupon redemption payload.
#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct RedeemResponse {
    /// Credits granted by this call (0 when replayed)
    pub granted: i64,
    pub balance: i64,
    /// True when this user had already redeemed the code
    pub replayed: bool,
}

/// Redeem a coupon code for the caller.
pub async fn redeem_coupon(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<RedeemRequest>,
) -> ApiResult<Json<RedeemResponse>> {
    if body.code.trim().is_empty() {
        return Err(ApiError::bad_request("code cannot be empty"));
    }
    let outcome = profile::redeem(&state, &user.user_id, &body.code).await?;
    Ok(Json(RedeemResponse {
        granted: outcome.granted,
        balance: outcome.balance,
        replayed: outcome.replayed,
    }))
}
