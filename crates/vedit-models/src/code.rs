//! Stable error codes surfaced to clients.
//!
//! Clients branch on the `code` field of the error envelope; the strings
//! here are a compatibility contract and must not change.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Operation illegal from the job's current status; caller should
    /// re-fetch the job
    InvalidState,
    /// Duplicate trigger while a stage is in flight; benign, poll status
    AlreadyRunning,
    /// Edit submitted against a stale revision; re-fetch and retry
    RevisionConflict,
    /// Balance too low for the metered operation
    InsufficientCredits,
    /// Caller does not own the job
    Forbidden,
    NotFound,
    /// Collaborator failed after the retry budget; the stage trigger
    /// remains available
    TransientCollaboratorFailure,
    /// Coupon code unknown or disabled
    CouponInvalid,
    CouponExpired,
    CouponExhausted,
    Unauthorized,
    BadRequest,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidState => "INVALID_STATE",
            ErrorCode::AlreadyRunning => "ALREADY_RUNNING",
            ErrorCode::RevisionConflict => "REVISION_CONFLICT",
            ErrorCode::InsufficientCredits => "INSUFFICIENT_CREDITS",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::TransientCollaboratorFailure => "TRANSIENT_COLLABORATOR_FAILURE",
            ErrorCode::CouponInvalid => "COUPON_INVALID",
            ErrorCode::CouponExpired => "COUPON_EXPIRED",
            ErrorCode::CouponExhausted => "COUPON_EXHAUSTED",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
