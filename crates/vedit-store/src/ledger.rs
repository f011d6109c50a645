//! Credit ledger operations.
//!
//! Every movement is an append to `credit_ledger` plus a wallet upsert in
//! the same transaction, keyed by a deterministic idempotency key. A replay
//! (same key) changes nothing and reports the current balance.

use rusqlite::{params, OptionalExtension, Row, Transaction, TransactionBehavior};
use tracing::info;

use vedit_models::{JobId, LedgerEntry, LedgerReason};

use crate::db::{now_iso, parse_ts, Store};
use crate::error::{StoreError, StoreResult};

/// Result of a ledger movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerOutcome {
    /// False when the idempotency key had already been spent.
    pub applied: bool,
    /// Wallet balance after the call.
    pub balance: i64,
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let reason_raw: String = row.get("reason")?;
    let job_id: Option<String> = row.get("job_id")?;
    let created_at: String = row.get("created_at")?;
    Ok(LedgerEntry {
        entry_id: row.get("entry_id")?,
        user_id: row.get("user_id")?,
        delta: row.get("delta")?,
        reason: LedgerReason::parse(&reason_raw).unwrap_or(LedgerReason::WelcomeGrant),
        job_id: job_id.map(JobId::from_string),
        idempotency_key: row.get("idempotency_key")?,
        created_at: parse_ts(&created_at),
    })
}

fn wallet_balance(tx: &Transaction<'_>, user_id: &str) -> StoreResult<i64> {
    let balance: Option<i64> = tx
        .query_row(
            "SELECT balance FROM credit_wallets WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(balance.unwrap_or(0))
}

/// Apply one signed delta inside the caller's transaction.
///
/// A previously spent idempotency key short-circuits to a replay. A
/// negative delta that would take the balance below zero aborts with
/// `InsufficientCredits` before any row is written.
pub(crate) fn apply_delta(
    tx: &Transaction<'_>,
    user_id: &str,
    delta: i64,
    reason: LedgerReason,
    job_id: Option<&JobId>,
    idempotency_key: &str,
) -> StoreResult<LedgerOutcome> {
    let spent: Option<i64> = tx
        .query_row(
            "SELECT entry_id FROM credit_ledger WHERE idempotency_key = ?1",
            params![idempotency_key],
            |row| row.get(0),
        )
        .optional()?;
    if spent.is_some() {
        return Ok(LedgerOutcome {
            applied: false,
            balance: wallet_balance(tx, user_id)?,
        });
    }

    let balance = wallet_balance(tx, user_id)?;
    let next = balance + delta;
    if next < 0 {
        return Err(StoreError::InsufficientCredits {
            balance,
            required: -delta,
        });
    }

    let now = now_iso();
    tx.execute(
        "INSERT INTO credit_ledger(user_id, delta, reason, job_id, idempotency_key, created_at) \
         VALUES(?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            user_id,
            delta,
            reason.as_str(),
            job_id.map(JobId::as_str),
            idempotency_key,
            now,
        ],
    )?;
    tx.execute(
        "INSERT INTO credit_wallets(user_id, balance, updated_at) VALUES(?1, ?2, ?3) \
         ON CONFLICT(user_id) DO UPDATE SET \
             balance = balance + ?4, updated_at = excluded.updated_at",
        params![user_id, next, now, delta],
    )?;
    Ok(LedgerOutcome {
        applied: true,
        balance: next,
    })
}

impl Store {
    /// Grant credits to a user. Replay-safe via the idempotency key.
    pub fn credit(
        &self,
        user_id: &str,
        amount: i64,
        reason: LedgerReason,
        job_id: Option<&JobId>,
        idempotency_key: &str,
    ) -> StoreResult<LedgerOutcome> {
        if amount <= 0 {
            return Err(StoreError::invalid_input("credit amount must be positive"));
        }
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let outcome = apply_delta(&tx, user_id, amount, reason, job_id, idempotency_key)?;
        tx.commit()?;
        if outcome.applied {
            info!(user_id, amount, reason = %reason, "credits granted");
        }
        Ok(outcome)
    }

    /// Consume credits from a user. Replay-safe; fails with
    /// `InsufficientCredits` without writing anything.
    pub fn debit(
        &self,
        user_id: &str,
        amount: i64,
        reason: LedgerReason,
        job_id: Option<&JobId>,
        idempotency_key: &str,
    ) -> StoreResult<LedgerOutcome> {
        if amount <= 0 {
            return Err(StoreError::invalid_input("debit amount must be positive"));
        }
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let outcome = apply_delta(&tx, user_id, -amount, reason, job_id, idempotency_key)?;
        tx.commit()?;
        if outcome.applied {
            info!(user_id, amount, reason = %reason, "credits consumed");
        }
        Ok(outcome)
    }

    /// Current wallet balance (0 for a user with no wallet row).
    pub fn balance(&self, user_id: &str) -> StoreResult<i64> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let balance = wallet_balance(&tx, user_id)?;
        tx.commit()?;
        Ok(balance)
    }

    /// Most recent ledger entries for a user, newest first.
    pub fn recent_entries(&self, user_id: &str, limit: u32) -> StoreResult<Vec<LedgerEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM credit_ledger WHERE user_id = ?1 \
             ORDER BY entry_id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit], entry_from_row)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    #[cfg(test)]
    pub(crate) fn ledger_sum(&self, user_id: &str) -> StoreResult<i64> {
        let sum: Option<i64> = self.conn().query_row(
            "SELECT SUM(delta) FROM credit_ledger WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(sum.unwrap_or(0))
    }
}
