//! Durable SQLite store for the orchestration core.
//!
//! One `Store` owns the jobs, stage-results, ledger and coupon tables.
//! Every cross-field invariant (status edges, revision monotonicity,
//! balance = sum of deltas, one STAGE_CONSUME per job) is maintained inside
//! a single transaction per operation; status changes are compare-and-set,
//! never read-then-write.

mod coupons;
mod db;
mod error;
mod jobs;
mod ledger;
mod results;

pub use coupons::RedeemOutcome;
pub use db::Store;
pub use error::{StoreError, StoreResult};
pub use ledger::LedgerOutcome;
pub use results::ConfirmOutcome;
