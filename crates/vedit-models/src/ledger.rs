//! Credit ledger types.
//!
//! The ledger is append-only; a user's wallet balance always equals the sum
//! of their deltas. Idempotency keys are deterministic so a retried
//! operation replays its prior outcome instead of moving money twice.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::job::JobId;

/// Why a ledger entry exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerReason {
    /// One-time signup grant
    WelcomeGrant,
    /// Coupon code redemption
    CouponRedeem,
    /// Metered stage consumption (at most one per job)
    StageConsume,
}

impl LedgerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerReason::WelcomeGrant => "WELCOME_GRANT",
            LedgerReason::CouponRedeem => "COUPON_REDEEM",
            LedgerReason::StageConsume => "STAGE_CONSUME",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "WELCOME_GRANT" => LedgerReason::WelcomeGrant,
            "COUPON_REDEEM" => LedgerReason::CouponRedeem,
            "STAGE_CONSUME" => LedgerReason::StageConsume,
            _ => return None,
        })
    }
}

impl fmt::Display for LedgerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One immutable credit movement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: i64,
    pub user_id: String,
    /// Signed credit delta (positive grant, negative consumption)
    pub delta: i64,
    pub reason: LedgerReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

/// Idempotency key for the metered stage-1 consumption of a job.
pub fn stage_consume_key(job_id: &JobId) -> String {
    format!("stage1:{job_id}")
}

/// Idempotency key for a user's one-time welcome grant.
pub fn welcome_key(user_id: &str) -> String {
    format!("welcome:{user_id}")
}

/// Idempotency key for a coupon redemption by a user.
pub fn redeem_key(code: &str, user_id: &str) -> String {
    format!("redeem:{code}:{user_id}")
}
