//! User profile and credit services.

use serde::Serialize;

use vedit_models::ledger::welcome_key;
use vedit_models::{LedgerEntry, LedgerReason};
use vedit_store::RedeemOutcome;

use crate::error::ApiResult;
use crate::state::AppState;

/// How many ledger entries the profile returns.
const RECENT_ENTRIES: u32 = 20;

/// Profile payload: balance plus recent credit history.
#[derive(Debug, Serialize)]
pub struct Profile {
    pub user_id: String,
    pub balance: i64,
    pub recent_entries: Vec<LedgerEntry>,
}

/// Grant the one-time welcome credits if this user has never received
/// them. Safe to call on every profile read; the ledger key makes it a
/// no-op after the first time.
pub async fn ensure_welcome(state: &AppState, user_id: &str) -> ApiResult<()> {
    let amount = state.config.welcome_credits;
    if amount <= 0 {
        return Ok(());
    }
    let user = user_id.to_string();
    state
        .with_store(move |store| {
            store.credit(
                &user,
                amount,
                LedgerReason::WelcomeGrant,
                None,
                &welcome_key(&user),
            )
        })
        .await?;
    Ok(())
}

/// Fetch the caller's profile, applying the welcome grant on first touch.
pub async fn profile(state: &AppState, user_id: &str) -> ApiResult<Profile> {
    ensure_welcome(state, user_id).await?;
    let user = user_id.to_string();
    let (balance, recent_entries) = state
        .with_store(move |store| {
            let balance = store.balance(&user)?;
            let entries = store.recent_entries(&user, RECENT_ENTRIES)?;
            Ok((balance, entries))
        })
        .await?;
    Ok(Profile {
        user_id: user_id.to_string(),
        balance,
        recent_entries,
    })
}

/// Redeem a coupon code for the caller.
pub async fn redeem(state: &AppState, user_id: &str, code: &str) -> ApiResult<RedeemOutcome> {
    let user = user_id.to_string();
    let code = code.trim().to_string();
    state
        .with_store(move |store| store.redeem_coupon(&code, &user))
        .await
}
