//! Coupon code redemption.
//!
//! Validity checks, the usage-count bump and the credit grant share one
//! transaction, so a coupon can never be over-redeemed and a grant can
//! never land without its count. Redemption is per-user idempotent through
//! the deterministic redeem key.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, TransactionBehavior};
use tracing::info;

use vedit_models::ledger::redeem_key;
use vedit_models::LedgerReason;

use crate::db::{now_iso, parse_ts, Store};
use crate::error::{StoreError, StoreResult};
use crate::ledger::apply_delta;

/// Result of a redemption attempt that did not fail validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedeemOutcome {
    /// Credits this call granted (0 on a replay).
    pub granted: i64,
    /// Wallet balance after the call.
    pub balance: i64,
    /// True when this user had already redeemed the code.
    pub replayed: bool,
}

struct CouponRow {
    credits: i64,
    max_uses: Option<i64>,
    used_count: i64,
    expires_at: Option<DateTime<Utc>>,
    active: bool,
}

impl Store {
    /// Create or update a coupon code (operator surface).
    pub fn upsert_coupon(
        &self,
        code: &str,
        credits: i64,
        max_uses: Option<i64>,
        expires_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        if code.trim().is_empty() {
            return Err(StoreError::invalid_input("coupon code cannot be empty"));
        }
        if credits <= 0 {
            return Err(StoreError::invalid_input("coupon credits must be positive"));
        }
        let now = now_iso();
        self.conn().execute(
            "INSERT INTO coupon_codes(code, credits, max_uses, expires_at, created_at, updated_at) \
             VALUES(?1, ?2, ?3, ?4, ?5, ?5) \
             ON CONFLICT(code) DO UPDATE SET \
                 credits = excluded.credits, max_uses = excluded.max_uses, \
                 expires_at = excluded.expires_at, updated_at = excluded.updated_at",
            params![
                code,
                credits,
                max_uses,
                expires_at.map(|ts| ts.to_rfc3339()),
                now,
            ],
        )?;
        Ok(())
    }

    /// Redeem a coupon code for `user_id`.
    ///
    /// Unknown or disabled codes are indistinguishable to the caller
    /// (`CouponInvalid`). A second redemption by the same user replays the
    /// original grant without touching the usage count.
    pub fn redeem_coupon(&self, code: &str, user_id: &str) -> StoreResult<RedeemOutcome> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let row: Option<CouponRow> = tx
            .query_row(
                "SELECT credits, max_uses, used_count, expires_at, status \
                 FROM coupon_codes WHERE code = ?1",
                params![code],
                |row| {
                    let expires_at: Option<String> = row.get(3)?;
                    let status: String = row.get(4)?;
                    Ok(CouponRow {
                        credits: row.get(0)?,
                        max_uses: row.get(1)?,
                        used_count: row.get(2)?,
                        expires_at: expires_at.as_deref().map(parse_ts),
                        active: status == "ACTIVE",
                    })
                },
            )
            .optional()?;
        let coupon = row.ok_or(StoreError::CouponInvalid)?;
        if !coupon.active {
            return Err(StoreError::CouponInvalid);
        }
        if let Some(expires_at) = coupon.expires_at {
            if expires_at < Utc::now() {
                return Err(StoreError::CouponExpired);
            }
        }

        let key = redeem_key(code, user_id);
        let outcome = apply_delta(
            &tx,
            user_id,
            coupon.credits,
            LedgerReason::CouponRedeem,
            None,
            &key,
        )?;
        if !outcome.applied {
            // This user already redeemed; report the prior grant.
            return Ok(RedeemOutcome {
                granted: 0,
                balance: outcome.balance,
                replayed: true,
            });
        }
        if let Some(max_uses) = coupon.max_uses {
            if coupon.used_count >= max_uses {
                // Roll the grant back by dropping the transaction.
                return Err(StoreError::CouponExhausted);
            }
        }
        tx.execute(
            "UPDATE coupon_codes SET used_count = used_count + 1, updated_at = ?1 \
             WHERE code = ?2",
            params![now_iso(), code],
        )?;
        tx.commit()?;
        info!(user_id, code, credits = coupon.credits, "coupon redeemed");
        Ok(RedeemOutcome {
            granted: coupon.credits,
            balance: outcome.balance,
            replayed: false,
        })
    }
}
