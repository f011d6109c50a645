//! Job state machine operations.
//!
//! Transitions happen as compare-and-set updates inside immediate
//! transactions, so two racing callers (API process vs worker process, or
//! two API requests) can never both move the same job.

use rusqlite::{params, OptionalExtension, Row, Transaction, TransactionBehavior};
use tracing::{info, warn};

use vedit_models::{ErrorCode, Job, JobError, JobId, JobStatus, Stage, StageItems};

use crate::db::{now_iso, parse_ts, Store};
use crate::error::{StoreError, StoreResult};

pub(crate) fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    let status_raw: String = row.get("status")?;
    let error_code: Option<String> = row.get("error_code")?;
    let error_message: Option<String> = row.get("error_message")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(Job {
        job_id: JobId::from_string(row.get::<_, String>("job_id")?),
        owner: row.get("owner")?,
        status: JobStatus::parse(&status_raw).unwrap_or_default(),
        progress: row.get::<_, i64>("progress")?.clamp(0, 100) as u8,
        error: error_code.map(|code| JobError {
            code,
            message: error_message.unwrap_or_default(),
        }),
        media_ref: row.get("media_ref")?,
        artifact_ref: row.get("artifact_ref")?,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
    })
}

pub(crate) fn fetch_job(tx: &Transaction<'_>, job_id: &JobId) -> StoreResult<Job> {
    tx.query_row(
        "SELECT * FROM jobs WHERE job_id = ?1",
        params![job_id.as_str()],
        job_from_row,
    )
    .optional()?
    .ok_or_else(|| StoreError::not_found(format!("job not found: {job_id}")))
}

fn fetch_failed_stage(tx: &Transaction<'_>, job_id: &JobId) -> StoreResult<Option<Stage>> {
    let raw: Option<String> = tx.query_row(
        "SELECT failed_stage FROM jobs WHERE job_id = ?1",
        params![job_id.as_str()],
        |row| row.get(0),
    )?;
    Ok(raw.as_deref().and_then(Stage::parse))
}

/// Ownership guard: every job-scoped operation checks this before reading
/// any further state. An existing job under another owner is FORBIDDEN,
/// not NOT_FOUND.
pub(crate) fn check_owner(job: &Job, caller: &str) -> StoreResult<()> {
    if job.owner != caller {
        return Err(StoreError::forbidden("job belongs to another user"));
    }
    Ok(())
}

impl Store {
    /// Create a new CREATED job owned by `owner`.
    pub fn create_job(&self, owner: &str) -> StoreResult<Job> {
        let job_id = JobId::new();
        let now = now_iso();
        let status = JobStatus::Created;
        self.conn().execute(
            "INSERT INTO jobs(job_id, owner, status, progress, created_at, updated_at) \
             VALUES(?1, ?2, ?3, 0, ?4, ?4)",
            params![job_id.as_str(), owner, status.as_str(), now],
        )?;
        info!(job_id = %job_id, owner, "created job");
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let job = fetch_job(&tx, &job_id)?;
        tx.commit()?;
        Ok(job)
    }

    /// Fetch a job on behalf of `caller`, enforcing ownership.
    pub fn get_job(&self, job_id: &JobId, caller: &str) -> StoreResult<Job> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let job = fetch_job(&tx, job_id)?;
        tx.commit()?;
        check_owner(&job, caller)?;
        Ok(job)
    }

    /// Fetch a job without an ownership check (worker-side use only).
    pub fn get_job_unchecked(&self, job_id: &JobId) -> StoreResult<Job> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let job = fetch_job(&tx, job_id)?;
        tx.commit()?;
        Ok(job)
    }

    /// CREATED -> UPLOAD_READY, recording the signed media reference.
    pub fn mark_uploaded(&self, job_id: &JobId, caller: &str, media_ref: &str) -> StoreResult<Job> {
        if media_ref.trim().is_empty() {
            return Err(StoreError::invalid_input("media_ref cannot be empty"));
        }
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let job = fetch_job(&tx, job_id)?;
        check_owner(&job, caller)?;
        if job.status != JobStatus::Created {
            return Err(StoreError::InvalidState {
                current: job.status,
                expected: JobStatus::Created.as_str().to_string(),
            });
        }
        let target = JobStatus::UploadReady;
        let changed = tx.execute(
            "UPDATE jobs SET status = ?1, progress = ?2, media_ref = ?3, updated_at = ?4 \
             WHERE job_id = ?5 AND status = ?6",
            params![
                target.as_str(),
                target.default_progress() as i64,
                media_ref,
                now_iso(),
                job_id.as_str(),
                JobStatus::Created.as_str(),
            ],
        )?;
        if changed == 0 {
            let current = fetch_job(&tx, job_id)?;
            return Err(StoreError::InvalidState {
                current: current.status,
                expected: JobStatus::Created.as_str().to_string(),
            });
        }
        let job = fetch_job(&tx, job_id)?;
        tx.commit()?;
        Ok(job)
    }

    /// Move a job into `stage.running()` on behalf of a trigger request.
    ///
    /// Legal from the stage's precondition status, or from FAILED when this
    /// exact stage is the one that failed (retry path). A job already in
    /// the target running state yields the benign `AlreadyRunning`.
    pub fn begin_stage(&self, job_id: &JobId, caller: &str, stage: Stage) -> StoreResult<Job> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let job = fetch_job(&tx, job_id)?;
        check_owner(&job, caller)?;

        let running = stage.running();
        if job.status == running {
            return Err(StoreError::AlreadyRunning);
        }
        // The edge table admits the precondition status and FAILED; a failed
        // job may only restart the stage that failed.
        let may_start = job.status.can_transition(running)
            && (job.status != JobStatus::Failed
                || fetch_failed_stage(&tx, job_id)? == Some(stage));
        if !may_start {
            return Err(StoreError::InvalidState {
                current: job.status,
                expected: stage.precondition().as_str().to_string(),
            });
        }

        let changed = tx.execute(
            "UPDATE jobs SET status = ?1, progress = ?2, error_code = NULL, \
             error_message = NULL, failed_stage = NULL, updated_at = ?3 \
             WHERE job_id = ?4 AND status = ?5",
            params![
                running.as_str(),
                running.default_progress() as i64,
                now_iso(),
                job_id.as_str(),
                job.status.as_str(),
            ],
        )?;
        if changed == 0 {
            // Lost the race to a concurrent trigger.
            return Err(StoreError::AlreadyRunning);
        }
        let job = fetch_job(&tx, job_id)?;
        tx.commit()?;
        info!(job_id = %job_id, stage = %stage, "stage triggered");
        Ok(job)
    }

    /// Compensation for a trigger whose enqueue failed: put the job back
    /// where `begin_stage` found it. Best effort; the queue's per-job dedup
    /// keeps a lost revert from spawning duplicate tasks later.
    pub fn revert_stage_trigger(&self, job_id: &JobId, stage: Stage) -> StoreResult<()> {
        let previous = stage.precondition();
        let changed = self.conn().execute(
            "UPDATE jobs SET status = ?1, progress = ?2, updated_at = ?3 \
             WHERE job_id = ?4 AND status = ?5",
            params![
                previous.as_str(),
                previous.default_progress() as i64,
                now_iso(),
                job_id.as_str(),
                stage.running().as_str(),
            ],
        )?;
        if changed == 0 {
            warn!(job_id = %job_id, stage = %stage, "trigger revert found job already moved");
        }
        Ok(())
    }

    /// Worker-only: persist a stage's collaborator output and move
    /// `*_RUNNING -> *_READY` in one transaction.
    ///
    /// A rewritten result (stage re-run after failure) bumps the revision
    /// so confirms read before the re-run still conflict.
    pub fn apply_stage_output(
        &self,
        job_id: &JobId,
        stage: Stage,
        items: &StageItems,
    ) -> StoreResult<Job> {
        match (stage, items) {
            (Stage::Suggestion, StageItems::Lines(_)) => {}
            (Stage::Chapters, StageItems::Chapters(_)) => {}
            _ => {
                return Err(StoreError::invalid_input(format!(
                    "items do not match stage {stage}"
                )))
            }
        }
        if items.is_empty() {
            return Err(StoreError::invalid_input(format!(
                "stage {stage} produced an empty item list"
            )));
        }

        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let ready = stage.ready();
        let changed = tx.execute(
            "UPDATE jobs SET status = ?1, progress = ?2, updated_at = ?3 \
             WHERE job_id = ?4 AND status = ?5",
            params![
                ready.as_str(),
                ready.default_progress() as i64,
                now_iso(),
                job_id.as_str(),
                stage.running().as_str(),
            ],
        )?;
        if changed == 0 {
            let current = fetch_job(&tx, job_id)?;
            return Err(StoreError::InvalidState {
                current: current.status,
                expected: stage.running().as_str().to_string(),
            });
        }

        let items_json = serde_json::to_string(items)?;
        tx.execute(
            "INSERT INTO stage_results(job_id, stage, revision, items_json, confirmed, updated_at) \
             VALUES(?1, ?2, 0, ?3, 0, ?4) \
             ON CONFLICT(job_id, stage) DO UPDATE SET \
                 revision = revision + 1, items_json = excluded.items_json, \
                 confirmed = 0, updated_at = excluded.updated_at",
            params![job_id.as_str(), stage.as_str(), items_json, now_iso()],
        )?;

        let job = fetch_job(&tx, job_id)?;
        tx.commit()?;
        info!(job_id = %job_id, stage = %stage, items = items.len(), "stage output applied");
        Ok(job)
    }

    /// Worker-only: RENDER_RUNNING -> SUCCEEDED with the artifact ref.
    pub fn complete_render(&self, job_id: &JobId, artifact_ref: &str) -> StoreResult<Job> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let target = JobStatus::Succeeded;
        let changed = tx.execute(
            "UPDATE jobs SET status = ?1, progress = 100, artifact_ref = ?2, updated_at = ?3 \
             WHERE job_id = ?4 AND status = ?5",
            params![
                target.as_str(),
                artifact_ref,
                now_iso(),
                job_id.as_str(),
                JobStatus::RenderRunning.as_str(),
            ],
        )?;
        if changed == 0 {
            let current = fetch_job(&tx, job_id)?;
            return Err(StoreError::InvalidState {
                current: current.status,
                expected: JobStatus::RenderRunning.as_str().to_string(),
            });
        }
        let job = fetch_job(&tx, job_id)?;
        tx.commit()?;
        info!(job_id = %job_id, "render complete");
        Ok(job)
    }

    /// Worker-only: `*_RUNNING -> FAILED` with a stable error recorded.
    /// The failed stage is remembered so a retry trigger is legal.
    pub fn fail_stage(
        &self,
        job_id: &JobId,
        stage: Stage,
        code: ErrorCode,
        message: &str,
    ) -> StoreResult<Job> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "UPDATE jobs SET status = ?1, error_code = ?2, error_message = ?3, \
             failed_stage = ?4, updated_at = ?5 \
             WHERE job_id = ?6 AND status = ?7",
            params![
                JobStatus::Failed.as_str(),
                code.as_str(),
                message,
                stage.as_str(),
                now_iso(),
                job_id.as_str(),
                stage.running().as_str(),
            ],
        )?;
        if changed == 0 {
            let current = fetch_job(&tx, job_id)?;
            return Err(StoreError::InvalidState {
                current: current.status,
                expected: stage.running().as_str().to_string(),
            });
        }
        let job = fetch_job(&tx, job_id)?;
        tx.commit()?;
        warn!(job_id = %job_id, stage = %stage, code = %code, "stage failed");
        Ok(job)
    }

    /// Advisory progress push while a stage runs. Monotonic, clamped, and
    /// silently ignored once the job has moved on.
    pub fn push_progress(&self, job_id: &JobId, stage: Stage, progress: u8) -> StoreResult<()> {
        self.conn().execute(
            "UPDATE jobs SET progress = MAX(progress, MIN(?1, 99)), updated_at = ?2 \
             WHERE job_id = ?3 AND status = ?4",
            params![
                progress as i64,
                now_iso(),
                job_id.as_str(),
                stage.running().as_str(),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vedit_models::SubtitleLine;

    fn lines() -> StageItems {
        StageItems::Lines(vec![SubtitleLine {
            line_id: 1,
            start: 0.0,
            end: 1.0,
            original_text: "uh hello".into(),
            optimized_text: "Hello".into(),
            suggest_remove: false,
            user_remove: false,
        }])
    }

    fn ready_job(store: &Store) -> Job {
        let job = store.create_job("alice").expect("create");
        store
            .mark_uploaded(&job.job_id, "alice", "signed://media/a.mp4")
            .expect("upload");
        store
            .begin_stage(&job.job_id, "alice", Stage::Suggestion)
            .expect("trigger");
        store
            .apply_stage_output(&job.job_id, Stage::Suggestion, &lines())
            .expect("output")
    }

    #[test]
    fn create_and_fetch() {
        let store = Store::open_in_memory().expect("open");
        let job = store.create_job("alice").expect("create");
        assert_eq!(job.status, JobStatus::Created);
        assert_eq!(job.progress, 0);

        let fetched = store.get_job(&job.job_id, "alice").expect("get");
        assert_eq!(fetched.owner, "alice");
    }

    #[test]
    fn ownership_guard_is_forbidden_not_missing() {
        let store = Store::open_in_memory().expect("open");
        let job = store.create_job("alice").expect("create");

        let err = store.get_job(&job.job_id, "bob").expect_err("must fail");
        assert!(matches!(err, StoreError::Forbidden(_)));

        let err = store
            .get_job(&JobId::from_string("job_missing"), "bob")
            .expect_err("must fail");
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn upload_then_trigger_happy_path() {
        let store = Store::open_in_memory().expect("open");
        let job = store.create_job("alice").expect("create");
        let job = store
            .mark_uploaded(&job.job_id, "alice", "signed://media/a.mp4")
            .expect("upload");
        assert_eq!(job.status, JobStatus::UploadReady);
        assert_eq!(job.media_ref.as_deref(), Some("signed://media/a.mp4"));

        let job = store
            .begin_stage(&job.job_id, "alice", Stage::Suggestion)
            .expect("trigger");
        assert_eq!(job.status, JobStatus::Stage1Running);
        assert_eq!(job.progress, JobStatus::Stage1Running.default_progress());
    }

    #[test]
    fn trigger_out_of_order_is_invalid_state() {
        let store = Store::open_in_memory().expect("open");
        let job = store.create_job("alice").expect("create");

        let err = store
            .begin_stage(&job.job_id, "alice", Stage::Suggestion)
            .expect_err("must fail");
        assert!(matches!(err, StoreError::InvalidState { .. }));

        let err = store
            .begin_stage(&job.job_id, "alice", Stage::Chapters)
            .expect_err("must fail");
        assert!(matches!(err, StoreError::InvalidState { .. }));
    }

    #[test]
    fn duplicate_trigger_is_already_running() {
        let store = Store::open_in_memory().expect("open");
        let job = store.create_job("alice").expect("create");
        store
            .mark_uploaded(&job.job_id, "alice", "signed://m")
            .expect("upload");
        store
            .begin_stage(&job.job_id, "alice", Stage::Suggestion)
            .expect("first");
        let err = store
            .begin_stage(&job.job_id, "alice", Stage::Suggestion)
            .expect_err("second must fail");
        assert!(matches!(err, StoreError::AlreadyRunning));
    }

    #[test]
    fn concurrent_triggers_elect_one_winner() {
        use std::sync::Arc;

        let store = Arc::new(Store::open_in_memory().expect("open"));
        let job = store.create_job("alice").expect("create");
        store
            .mark_uploaded(&job.job_id, "alice", "signed://m")
            .expect("upload");

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let store = Arc::clone(&store);
                let job_id = job.job_id.clone();
                std::thread::spawn(move || store.begin_stage(&job_id, "alice", Stage::Suggestion))
            })
            .collect();
        let results: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().expect("join"))
            .collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(StoreError::AlreadyRunning))));
        let job = store.get_job(&job.job_id, "alice").expect("get");
        assert_eq!(job.status, JobStatus::Stage1Running);
    }

    #[test]
    fn output_moves_to_ready_and_stores_result() {
        let store = Store::open_in_memory().expect("open");
        let job = ready_job(&store);
        assert_eq!(job.status, JobStatus::Stage1Ready);

        let result = store
            .get_stage_result(&job.job_id, "alice", Stage::Suggestion)
            .expect("result");
        assert_eq!(result.revision, 0);
        assert!(!result.confirmed);
    }

    #[test]
    fn output_for_idle_job_is_invalid_state() {
        let store = Store::open_in_memory().expect("open");
        let job = store.create_job("alice").expect("create");
        let err = store
            .apply_stage_output(&job.job_id, Stage::Suggestion, &lines())
            .expect_err("must fail");
        assert!(matches!(err, StoreError::InvalidState { .. }));
    }

    #[test]
    fn mismatched_items_rejected() {
        let store = Store::open_in_memory().expect("open");
        let job = store.create_job("alice").expect("create");
        let err = store
            .apply_stage_output(&job.job_id, Stage::Chapters, &lines())
            .expect_err("must fail");
        assert!(matches!(err, StoreError::InvalidInput(_)));
    }

    #[test]
    fn failure_records_error_and_allows_retry_of_same_stage_only() {
        let store = Store::open_in_memory().expect("open");
        let job = store.create_job("alice").expect("create");
        store
            .mark_uploaded(&job.job_id, "alice", "signed://m")
            .expect("upload");
        store
            .begin_stage(&job.job_id, "alice", Stage::Suggestion)
            .expect("trigger");
        let job = store
            .fail_stage(
                &job.job_id,
                Stage::Suggestion,
                ErrorCode::TransientCollaboratorFailure,
                "asr timed out",
            )
            .expect("fail");
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.error.as_ref().map(|e| e.code.as_str()),
            Some("TRANSIENT_COLLABORATOR_FAILURE")
        );

        // A different stage cannot be started out of a failure.
        let err = store
            .begin_stage(&job.job_id, "alice", Stage::Chapters)
            .expect_err("must fail");
        assert!(matches!(err, StoreError::InvalidState { .. }));

        // Retrying the failed stage clears the error.
        let job = store
            .begin_stage(&job.job_id, "alice", Stage::Suggestion)
            .expect("retry");
        assert_eq!(job.status, JobStatus::Stage1Running);
        assert!(job.error.is_none());
    }

    #[test]
    fn rerun_after_failure_bumps_revision() {
        let store = Store::open_in_memory().expect("open");
        let job = ready_job(&store);
        let first = store
            .get_stage_result(&job.job_id, "alice", Stage::Suggestion)
            .expect("result");
        assert_eq!(first.revision, 0);

        // Stage 1 re-runs (crash recovery path); the rewritten result must
        // not reuse a revision a client may already hold.
        store
            .conn()
            .execute(
                "UPDATE jobs SET status = ?1 WHERE job_id = ?2",
                params![JobStatus::Stage1Running.as_str(), job.job_id.as_str()],
            )
            .expect("force running");
        store
            .apply_stage_output(&job.job_id, Stage::Suggestion, &lines())
            .expect("second output");
        let second = store
            .get_stage_result(&job.job_id, "alice", Stage::Suggestion)
            .expect("result");
        assert_eq!(second.revision, 1);
        assert!(!second.confirmed);
    }

    #[test]
    fn render_retry_after_failure_completes() {
        let store = Store::open_in_memory().expect("open");
        let job = ready_job(&store);
        store
            .confirm_stage(&job.job_id, "alice", Stage::Suggestion, 0, None, 0)
            .expect("confirm 1");
        store
            .begin_stage(&job.job_id, "alice", Stage::Chapters)
            .expect("trigger 2");
        let chapters = StageItems::Chapters(vec![vedit_models::Chapter {
            chapter_id: 1,
            title: "Intro".into(),
            summary: "Opening".into(),
            start: 0.0,
            end: 1.0,
            line_ids: vec![1],
        }]);
        store
            .apply_stage_output(&job.job_id, Stage::Chapters, &chapters)
            .expect("output 2");
        store
            .confirm_stage(&job.job_id, "alice", Stage::Chapters, 0, None, 0)
            .expect("confirm 2");
        store
            .begin_stage(&job.job_id, "alice", Stage::Render)
            .expect("render trigger");
        store
            .fail_stage(&job.job_id, Stage::Render, ErrorCode::InternalError, "boom")
            .expect("fail render");
        store
            .begin_stage(&job.job_id, "alice", Stage::Render)
            .expect("retry render");
        let job2 = store
            .complete_render(&job.job_id, "signed://artifact/out.mp4")
            .expect("complete");
        assert_eq!(job2.status, JobStatus::Succeeded);
        assert_eq!(job2.progress, 100);
        assert_eq!(job2.artifact_ref.as_deref(), Some("signed://artifact/out.mp4"));
    }

    #[test]
    fn progress_is_monotonic_and_scoped_to_running() {
        let store = Store::open_in_memory().expect("open");
        let job = store.create_job("alice").expect("create");
        store
            .mark_uploaded(&job.job_id, "alice", "signed://m")
            .expect("upload");
        store
            .begin_stage(&job.job_id, "alice", Stage::Suggestion)
            .expect("trigger");

        store
            .push_progress(&job.job_id, Stage::Suggestion, 25)
            .expect("push");
        store
            .push_progress(&job.job_id, Stage::Suggestion, 15)
            .expect("push lower");
        let job = store.get_job(&job.job_id, "alice").expect("get");
        assert_eq!(job.progress, 25);

        // Pushes against a stage that is not running are ignored.
        store
            .push_progress(&job.job_id, Stage::Chapters, 90)
            .expect("push other stage");
        let job = store.get_job(&job.job_id, "alice").expect("get");
        assert_eq!(job.progress, 25);
    }

    #[test]
    fn revert_restores_precondition() {
        let store = Store::open_in_memory().expect("open");
        let job = store.create_job("alice").expect("create");
        store
            .mark_uploaded(&job.job_id, "alice", "signed://m")
            .expect("upload");
        store
            .begin_stage(&job.job_id, "alice", Stage::Suggestion)
            .expect("trigger");
        store
            .revert_stage_trigger(&job.job_id, Stage::Suggestion)
            .expect("revert");
        let job = store.get_job(&job.job_id, "alice").expect("get");
        assert_eq!(job.status, JobStatus::UploadReady);
    }
}
