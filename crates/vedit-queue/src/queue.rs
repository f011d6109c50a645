//! SQLite-backed task queue.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use tracing::{debug, info, warn};

use vedit_models::{JobId, Task, TaskId, TaskKind, TaskStatus};

use crate::error::{QueueError, QueueResult};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Path to the queue database file
    pub db_path: String,
    /// Max delivery attempts before a task goes terminally FAILED
    pub max_attempts: u32,
    /// How long a claim holds the task before it becomes reclaimable
    pub lease_ttl: Duration,
    /// First retry delay; doubles per attempt
    pub backoff_base: Duration,
    /// Ceiling on the retry delay
    pub backoff_cap: Duration,
    /// Worker poll interval when the queue is empty
    pub poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            db_path: "data/vedit-queue.db".to_string(),
            max_attempts: 3,
            lease_ttl: Duration::from_secs(120),
            backoff_base: Duration::from_secs(5),
            backoff_cap: Duration::from_secs(300),
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            db_path: std::env::var("QUEUE_DB_PATH").unwrap_or(defaults.db_path),
            max_attempts: env_parse("QUEUE_MAX_ATTEMPTS").unwrap_or(defaults.max_attempts),
            lease_ttl: env_parse("QUEUE_LEASE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.lease_ttl),
            backoff_base: env_parse("QUEUE_BACKOFF_BASE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.backoff_base),
            backoff_cap: env_parse("QUEUE_BACKOFF_CAP_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.backoff_cap),
            poll_interval: env_parse("QUEUE_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

/// What `fail` decided about a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailOutcome {
    /// True when the retry budget is spent and the task is terminally FAILED.
    pub exhausted: bool,
    /// When the requeued task becomes claimable again (None if exhausted).
    pub retry_at: Option<DateTime<Utc>>,
}

/// Queue depth snapshot for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct QueueCounts {
    pub pending: u64,
    pub claimed: u64,
    pub done: u64,
    pub failed: u64,
}

/// Durable task queue client.
///
/// Safe to share via `Arc` between the API (enqueue) and workers (claim,
/// complete, fail); separate processes may open the same file.
pub struct TaskQueue {
    conn: Mutex<Connection>,
    config: QueueConfig,
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn iso_after(delay: Duration) -> (DateTime<Utc>, String) {
    let at = Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);
    (at, at.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let payload: String = row.get("payload_json")?;
    let kind: TaskKind = serde_json::from_str(&payload).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let status_raw: String = row.get("status")?;
    let available_at: String = row.get("available_at")?;
    let lease_expires_at: Option<String> = row.get("lease_expires_at")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(Task {
        task_id: TaskId(row.get("task_id")?),
        job_id: JobId::from_string(row.get::<_, String>("job_id")?),
        kind,
        status: TaskStatus::parse(&status_raw).unwrap_or_default(),
        attempt_count: row.get::<_, i64>("attempt_count")?.max(0) as u32,
        available_at: parse_ts(&available_at),
        lease_expires_at: lease_expires_at.as_deref().map(parse_ts),
        worker_id: row.get("worker_id")?,
        error_message: row.get("error_message")?,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

impl TaskQueue {
    /// Open (and migrate) the queue database at `config.db_path`.
    pub fn open(config: QueueConfig) -> QueueResult<Self> {
        let path = Path::new(&config.db_path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok();
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn, config)
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::open(QueueConfig::from_env())
    }

    /// In-memory queue (tests).
    pub fn in_memory(config: QueueConfig) -> QueueResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, config)
    }

    fn from_connection(conn: Connection, config: QueueConfig) -> QueueResult<Self> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA busy_timeout=30000;

            CREATE TABLE IF NOT EXISTS tasks (
                task_id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'PENDING',
                attempt_count INTEGER NOT NULL DEFAULT 0,
                available_at TEXT NOT NULL,
                lease_expires_at TEXT,
                worker_id TEXT,
                error_message TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_tasks_live_job
            ON tasks(job_id) WHERE status IN ('PENDING', 'CLAIMED');

            CREATE INDEX IF NOT EXISTS idx_tasks_claimable
            ON tasks(status, available_at);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            config,
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("queue mutex poisoned")
    }

    /// Enqueue stage work for a job.
    ///
    /// The live-task unique index turns a duplicate into `DuplicateTask`
    /// without a read-then-write race, even across processes.
    pub fn enqueue(&self, job_id: &JobId, kind: &TaskKind) -> QueueResult<Task> {
        let payload = serde_json::to_string(kind)?;
        let now = now_iso();
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let inserted = tx.execute(
            "INSERT INTO tasks(job_id, kind, payload_json, status, available_at, created_at, updated_at) \
             VALUES(?1, ?2, ?3, 'PENDING', ?4, ?4, ?4)",
            params![job_id.as_str(), kind.as_str(), payload, now],
        );
        match inserted {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => return Err(QueueError::DuplicateTask),
            Err(err) => return Err(err.into()),
        }
        let task_id = tx.last_insert_rowid();
        let task = tx.query_row(
            "SELECT * FROM tasks WHERE task_id = ?1",
            params![task_id],
            task_from_row,
        )?;
        tx.commit()?;
        info!(job_id = %job_id, task_id, kind = %kind, "task enqueued");
        Ok(task)
    }

    /// Claim the next due task for `worker_id`, taking a lease.
    ///
    /// Eligible tasks are PENDING past their `available_at`, or CLAIMED
    /// with an expired lease (worker crashed mid-run). Returns `None` when
    /// nothing is due.
    pub fn claim(&self, worker_id: &str) -> QueueResult<Option<Task>> {
        let now = now_iso();
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let candidate: Option<i64> = tx
            .query_row(
                "SELECT task_id FROM tasks \
                 WHERE (status = 'PENDING' AND available_at <= ?1) \
                    OR (status = 'CLAIMED' AND lease_expires_at IS NOT NULL \
                        AND lease_expires_at <= ?1) \
                 ORDER BY available_at ASC LIMIT 1",
                params![now],
                |row| row.get(0),
            )
            .optional()?;
        let Some(task_id) = candidate else {
            return Ok(None);
        };
        let (_, lease) = iso_after(self.config.lease_ttl);
        // Compare-and-set on eligibility, not just the id, so the claim
        // stays correct even if the select and update ever stop sharing a
        // transaction.
        let changed = tx.execute(
            "UPDATE tasks SET status = 'CLAIMED', worker_id = ?1, \
             attempt_count = attempt_count + 1, lease_expires_at = ?2, updated_at = ?3 \
             WHERE task_id = ?4 \
               AND (status = 'PENDING' \
                    OR (status = 'CLAIMED' AND lease_expires_at IS NOT NULL \
                        AND lease_expires_at <= ?5))",
            params![worker_id, lease, now, task_id, now],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        let task = tx.query_row(
            "SELECT * FROM tasks WHERE task_id = ?1",
            params![task_id],
            task_from_row,
        )?;
        tx.commit()?;
        debug!(task_id, worker_id, attempt = task.attempt_count, "task claimed");
        Ok(Some(task))
    }

    /// Renew the lease while work is still in progress. `LeaseLost` means
    /// the task was reclaimed or finished elsewhere; the worker must stop.
    pub fn extend_lease(&self, task_id: TaskId, worker_id: &str) -> QueueResult<()> {
        let (_, lease) = iso_after(self.config.lease_ttl);
        let changed = self.conn().execute(
            "UPDATE tasks SET lease_expires_at = ?1, updated_at = ?2 \
             WHERE task_id = ?3 AND status = 'CLAIMED' AND worker_id = ?4",
            params![lease, now_iso(), task_id.0, worker_id],
        )?;
        if changed == 0 {
            return Err(QueueError::LeaseLost(task_id.0));
        }
        Ok(())
    }

    /// Mark a claimed task DONE.
    pub fn complete(&self, task_id: TaskId, worker_id: &str) -> QueueResult<()> {
        let changed = self.conn().execute(
            "UPDATE tasks SET status = 'DONE', lease_expires_at = NULL, updated_at = ?1 \
             WHERE task_id = ?2 AND status = 'CLAIMED' AND worker_id = ?3",
            params![now_iso(), task_id.0, worker_id],
        )?;
        if changed == 0 {
            return Err(QueueError::LeaseLost(task_id.0));
        }
        debug!(task_id = task_id.0, worker_id, "task done");
        Ok(())
    }

    /// Record a failed attempt.
    ///
    /// With budget left the task goes back to PENDING after an exponential
    /// backoff; otherwise it is terminally FAILED and the caller must fail
    /// the job itself.
    pub fn fail(
        &self,
        task_id: TaskId,
        worker_id: &str,
        error: &str,
    ) -> QueueResult<FailOutcome> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let row: Option<(i64, String, Option<String>)> = tx
            .query_row(
                "SELECT attempt_count, status, worker_id FROM tasks WHERE task_id = ?1",
                params![task_id.0],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let Some((attempts, status, holder)) = row else {
            return Err(QueueError::NotFound(task_id.0));
        };
        if status != TaskStatus::Claimed.as_str() || holder.as_deref() != Some(worker_id) {
            return Err(QueueError::LeaseLost(task_id.0));
        }

        let outcome = if attempts >= self.config.max_attempts as i64 {
            tx.execute(
                "UPDATE tasks SET status = 'FAILED', lease_expires_at = NULL, \
                 error_message = ?1, updated_at = ?2 WHERE task_id = ?3",
                params![error, now_iso(), task_id.0],
            )?;
            warn!(task_id = task_id.0, attempts, error, "task retry budget exhausted");
            FailOutcome {
                exhausted: true,
                retry_at: None,
            }
        } else {
            let exp = attempts.max(1) as u32 - 1;
            let delay = self
                .config
                .backoff_base
                .saturating_mul(2u32.saturating_pow(exp))
                .min(self.config.backoff_cap);
            let (retry_at, retry_iso) = iso_after(delay);
            tx.execute(
                "UPDATE tasks SET status = 'PENDING', worker_id = NULL, \
                 lease_expires_at = NULL, available_at = ?1, error_message = ?2, \
                 updated_at = ?3 WHERE task_id = ?4",
                params![retry_iso, error, now_iso(), task_id.0],
            )?;
            warn!(task_id = task_id.0, attempts, error, "task requeued");
            FailOutcome {
                exhausted: false,
                retry_at: Some(retry_at),
            }
        };
        tx.commit()?;
        Ok(outcome)
    }

    /// Terminally fail a claimed task regardless of remaining budget
    /// (permanent errors where another attempt cannot succeed).
    pub fn fail_permanent(
        &self,
        task_id: TaskId,
        worker_id: &str,
        error: &str,
    ) -> QueueResult<()> {
        let changed = self.conn().execute(
            "UPDATE tasks SET status = 'FAILED', lease_expires_at = NULL, \
             error_message = ?1, updated_at = ?2 \
             WHERE task_id = ?3 AND status = 'CLAIMED' AND worker_id = ?4",
            params![error, now_iso(), task_id.0, worker_id],
        )?;
        if changed == 0 {
            return Err(QueueError::LeaseLost(task_id.0));
        }
        warn!(task_id = task_id.0, error, "task failed permanently");
        Ok(())
    }

    /// Fetch a task by id.
    pub fn task(&self, task_id: TaskId) -> QueueResult<Task> {
        self.conn()
            .query_row(
                "SELECT * FROM tasks WHERE task_id = ?1",
                params![task_id.0],
                task_from_row,
            )
            .optional()?
            .ok_or(QueueError::NotFound(task_id.0))
    }

    /// The job's live (PENDING or CLAIMED) task, if any.
    pub fn live_task_for_job(&self, job_id: &JobId) -> QueueResult<Option<Task>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT * FROM tasks WHERE job_id = ?1 \
                 AND status IN ('PENDING', 'CLAIMED') LIMIT 1",
                params![job_id.as_str()],
                task_from_row,
            )
            .optional()?)
    }

    /// Queue depth by status.
    pub fn counts(&self) -> QueueResult<QueueCounts> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT status, COUNT(1) FROM tasks GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut counts = QueueCounts {
            pending: 0,
            claimed: 0,
            done: 0,
            failed: 0,
        };
        for row in rows {
            let (status, n) = row?;
            let n = n.max(0) as u64;
            match TaskStatus::parse(&status) {
                Some(TaskStatus::Pending) => counts.pending = n,
                Some(TaskStatus::Claimed) => counts.claimed = n,
                Some(TaskStatus::Done) => counts.done = n,
                Some(TaskStatus::Failed) => counts.failed = n,
                None => {}
            }
        }
        Ok(counts)
    }
}
