//! Store error types.

use thiserror::Error;

use vedit_models::{ErrorCode, JobStatus};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid state: current status {current}, expected {expected}")]
    InvalidState { current: JobStatus, expected: String },

    #[error("stage already running for this job")]
    AlreadyRunning,

    #[error("revision conflict: expected {expected}, stored {actual}")]
    RevisionConflict { expected: u64, actual: u64 },

    #[error("insufficient credits: balance {balance}, required {required}")]
    InsufficientCredits { balance: i64, required: i64 },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("coupon code invalid")]
    CouponInvalid,

    #[error("coupon code expired")]
    CouponExpired,

    #[error("coupon code exhausted")]
    CouponExhausted,

    #[error("sqlite error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Stable client-facing code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            StoreError::NotFound(_) => ErrorCode::NotFound,
            StoreError::Forbidden(_) => ErrorCode::Forbidden,
            StoreError::InvalidState { .. } => ErrorCode::InvalidState,
            StoreError::AlreadyRunning => ErrorCode::AlreadyRunning,
            StoreError::RevisionConflict { .. } => ErrorCode::RevisionConflict,
            StoreError::InsufficientCredits { .. } => ErrorCode::InsufficientCredits,
            StoreError::InvalidInput(_) => ErrorCode::BadRequest,
            StoreError::CouponInvalid => ErrorCode::CouponInvalid,
            StoreError::CouponExpired => ErrorCode::CouponExpired,
            StoreError::CouponExhausted => ErrorCode::CouponExhausted,
            StoreError::Sql(_) | StoreError::Serialization(_) => ErrorCode::InternalError,
        }
    }
}
