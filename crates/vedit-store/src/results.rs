//! Stage result reads and the revision-guarded confirm operation.
//!
//! Confirmation is the single write path for human edits. It checks
//! ownership, the `*_READY` status, and the expected revision, applies the
//! submitted edits, freezes the result, debits the metered stage, and moves
//! the job to `*_CONFIRMED`, all inside one transaction. Any failure rolls
//! the whole thing back.

use rusqlite::{params, OptionalExtension, Transaction, TransactionBehavior};
use tracing::info;

use vedit_models::ledger::stage_consume_key;
use vedit_models::{
    Chapter, Job, JobId, LedgerReason, Stage, StageEdits, StageItems, StageResult, SubtitleLine,
};

use crate::db::{now_iso, Store};
use crate::error::{StoreError, StoreResult};
use crate::jobs::{check_owner, fetch_job};
use crate::ledger::apply_delta;

/// What a successful confirmation produced.
#[derive(Debug, Clone)]
pub struct ConfirmOutcome {
    /// The job after its status advanced.
    pub job: Job,
    /// Revision of the frozen result.
    pub revision: u64,
    /// Wallet balance after the debit, when one applied to this stage.
    pub balance: Option<i64>,
}

struct ResultRow {
    revision: u64,
    items: StageItems,
    confirmed: bool,
}

fn fetch_result(
    tx: &Transaction<'_>,
    job_id: &JobId,
    stage: Stage,
) -> StoreResult<Option<ResultRow>> {
    let row: Option<(i64, String, i64)> = tx
        .query_row(
            "SELECT revision, items_json, confirmed FROM stage_results \
             WHERE job_id = ?1 AND stage = ?2",
            params![job_id.as_str(), stage.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    match row {
        None => Ok(None),
        Some((revision, items_json, confirmed)) => Ok(Some(ResultRow {
            revision: revision.max(0) as u64,
            items: serde_json::from_str(&items_json)?,
            confirmed: confirmed != 0,
        })),
    }
}

/// Build the replacement line list from the submitted records. The list is
/// last-writer-wins wholesale; a line the client leaves out is gone.
fn apply_line_edits(edits: &[vedit_models::LineEdit]) -> StoreResult<Vec<SubtitleLine>> {
    if edits.is_empty() {
        return Err(StoreError::invalid_input("line edit list cannot be empty"));
    }
    let mut seen = std::collections::HashSet::with_capacity(edits.len());
    let mut lines = Vec::with_capacity(edits.len());
    for edit in edits {
        if !seen.insert(edit.line_id) {
            return Err(StoreError::invalid_input(format!(
                "duplicate line_id {}",
                edit.line_id
            )));
        }
        if edit.end <= edit.start {
            return Err(StoreError::invalid_input(format!(
                "line {} has end <= start",
                edit.line_id
            )));
        }
        lines.push(SubtitleLine {
            line_id: edit.line_id,
            start: edit.start,
            end: edit.end,
            original_text: edit.original_text.clone(),
            optimized_text: edit.optimized_text.clone(),
            suggest_remove: edit.suggest_remove,
            user_remove: edit.remove,
        });
    }
    Ok(lines)
}

/// Build the replacement chapter list from the submitted records. Chapters
/// are last-writer-wins wholesale, with blank titles defaulted.
fn apply_chapter_edits(edits: &[vedit_models::ChapterEdit]) -> StoreResult<Vec<Chapter>> {
    if edits.is_empty() {
        return Err(StoreError::invalid_input(
            "chapter edit list cannot be empty",
        ));
    }
    let mut chapters = Vec::with_capacity(edits.len());
    for (idx, edit) in edits.iter().enumerate() {
        if edit.end <= edit.start {
            return Err(StoreError::invalid_input(format!(
                "chapter {} has end <= start",
                edit.chapter_id
            )));
        }
        let title = if edit.title.trim().is_empty() {
            format!("Chapter {}", idx + 1)
        } else {
            edit.title.clone()
        };
        chapters.push(Chapter {
            chapter_id: edit.chapter_id,
            title,
            summary: edit.summary.clone(),
            start: edit.start,
            end: edit.end,
            line_ids: edit.line_ids.clone(),
        });
    }
    Ok(chapters)
}

impl Store {
    /// Fetch the reviewable result of a stage, enforcing ownership.
    pub fn get_stage_result(
        &self,
        job_id: &JobId,
        caller: &str,
        stage: Stage,
    ) -> StoreResult<StageResult> {
        if !stage.has_result() {
            return Err(StoreError::invalid_input(format!(
                "stage {stage} has no reviewable result"
            )));
        }
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let job = fetch_job(&tx, job_id)?;
        check_owner(&job, caller)?;
        let row = fetch_result(&tx, job_id, stage)?.ok_or_else(|| {
            StoreError::not_found(format!("no {stage} result for job {job_id}"))
        })?;
        tx.commit()?;
        Ok(StageResult {
            job_id: job_id.clone(),
            stage,
            revision: row.revision,
            items: row.items,
            confirmed: row.confirmed,
        })
    }

    /// Confirm a stage's result at `expected_revision`, optionally applying
    /// edits first, and advance the job to the stage's confirmed status.
    ///
    /// `debit_amount > 0` consumes that many credits from the owner under
    /// the job's stage-consume key; a retried confirmation replays the
    /// prior debit instead of charging again. `InsufficientCredits` aborts
    /// everything, leaving result and status untouched.
    pub fn confirm_stage(
        &self,
        job_id: &JobId,
        caller: &str,
        stage: Stage,
        expected_revision: u64,
        edits: Option<&StageEdits>,
        debit_amount: i64,
    ) -> StoreResult<ConfirmOutcome> {
        let confirmed_status = stage.confirmed().ok_or_else(|| {
            StoreError::invalid_input(format!("stage {stage} cannot be confirmed"))
        })?;

        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let job = fetch_job(&tx, job_id)?;
        check_owner(&job, caller)?;
        if job.status != stage.ready() {
            return Err(StoreError::InvalidState {
                current: job.status,
                expected: stage.ready().as_str().to_string(),
            });
        }

        let row = fetch_result(&tx, job_id, stage)?.ok_or_else(|| {
            StoreError::not_found(format!("no {stage} result for job {job_id}"))
        })?;
        if row.revision != expected_revision {
            return Err(StoreError::RevisionConflict {
                expected: expected_revision,
                actual: row.revision,
            });
        }

        let items = match edits {
            None => row.items,
            Some(edits) => {
                if edits.stage() != stage {
                    return Err(StoreError::invalid_input(format!(
                        "edits do not match stage {stage}"
                    )));
                }
                match (edits, &row.items) {
                    (StageEdits::Lines(line_edits), StageItems::Lines(_)) => {
                        StageItems::Lines(apply_line_edits(line_edits)?)
                    }
                    (StageEdits::Chapters(chapter_edits), StageItems::Chapters(_)) => {
                        StageItems::Chapters(apply_chapter_edits(chapter_edits)?)
                    }
                    _ => {
                        return Err(StoreError::invalid_input(
                            "stored result does not match edit kind",
                        ))
                    }
                }
            }
        };

        let new_revision = row.revision + 1;
        let items_json = serde_json::to_string(&items)?;
        tx.execute(
            "UPDATE stage_results SET revision = ?1, items_json = ?2, confirmed = 1, \
             updated_at = ?3 WHERE job_id = ?4 AND stage = ?5 AND revision = ?6",
            params![
                new_revision as i64,
                items_json,
                now_iso(),
                job_id.as_str(),
                stage.as_str(),
                row.revision as i64,
            ],
        )?;

        let balance = if debit_amount > 0 {
            let outcome = apply_delta(
                &tx,
                &job.owner,
                -debit_amount,
                LedgerReason::StageConsume,
                Some(job_id),
                &stage_consume_key(job_id),
            )?;
            Some(outcome.balance)
        } else {
            None
        };

        let changed = tx.execute(
            "UPDATE jobs SET status = ?1, progress = ?2, updated_at = ?3 \
             WHERE job_id = ?4 AND status = ?5",
            params![
                confirmed_status.as_str(),
                confirmed_status.default_progress() as i64,
                now_iso(),
                job_id.as_str(),
                stage.ready().as_str(),
            ],
        )?;
        if changed == 0 {
            let current = fetch_job(&tx, job_id)?;
            return Err(StoreError::InvalidState {
                current: current.status,
                expected: stage.ready().as_str().to_string(),
            });
        }

        let job = fetch_job(&tx, job_id)?;
        tx.commit()?;
        info!(job_id = %job_id, stage = %stage, revision = new_revision, "stage confirmed");
        Ok(ConfirmOutcome {
            job,
            revision: new_revision,
            balance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vedit_models::ledger::welcome_key;
    use vedit_models::{ChapterEdit, JobStatus, LineEdit};

    fn lines() -> StageItems {
        StageItems::Lines(vec![
            SubtitleLine {
                line_id: 1,
                start: 0.0,
                end: 1.5,
                original_text: "um so hello".into(),
                optimized_text: "Hello".into(),
                suggest_remove: false,
                user_remove: false,
            },
            SubtitleLine {
                line_id: 2,
                start: 1.5,
                end: 2.0,
                original_text: "uh".into(),
                optimized_text: String::new(),
                suggest_remove: true,
                user_remove: true,
            },
        ])
    }

    fn stage1_ready(store: &Store) -> Job {
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
    fn confirm_replaces_lines_wholesale_and_advances() {
        let store = Store::open_in_memory().expect("open");
        let job = stage1_ready(&store);
        // The client keeps only line 1, with its own rewrite.
        let edits = StageEdits::Lines(vec![LineEdit {
            line_id: 1,
            start: 0.0,
            end: 1.5,
            original_text: "um so hello".into(),
            optimized_text: "Hello!".into(),
            suggest_remove: false,
            remove: false,
        }]);
        let outcome = store
            .confirm_stage(&job.job_id, "alice", Stage::Suggestion, 0, Some(&edits), 0)
            .expect("confirm");
        assert_eq!(outcome.job.status, JobStatus::Stage1Confirmed);
        assert_eq!(outcome.revision, 1);

        let result = store
            .get_stage_result(&job.job_id, "alice", Stage::Suggestion)
            .expect("result");
        assert!(result.confirmed);
        assert_eq!(result.revision, 1);
        let stored = result.items.as_lines().expect("lines");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].optimized_text, "Hello!");
    }

    #[test]
    fn stale_revision_conflicts_and_changes_nothing() {
        let store = Store::open_in_memory().expect("open");
        let job = stage1_ready(&store);
        let err = store
            .confirm_stage(&job.job_id, "alice", Stage::Suggestion, 7, None, 0)
            .expect_err("must fail");
        assert!(matches!(
            err,
            StoreError::RevisionConflict {
                expected: 7,
                actual: 0
            }
        ));

        let job = store.get_job(&job.job_id, "alice").expect("get");
        assert_eq!(job.status, JobStatus::Stage1Ready);
        let result = store
            .get_stage_result(&job.job_id, "alice", Stage::Suggestion)
            .expect("result");
        assert_eq!(result.revision, 0);
        assert!(!result.confirmed);
    }

    #[test]
    fn confirm_debits_exactly_once() {
        let store = Store::open_in_memory().expect("open");
        store
            .credit(
                "alice",
                5,
                LedgerReason::WelcomeGrant,
                None,
                &welcome_key("alice"),
            )
            .expect("grant");
        let job = stage1_ready(&store);
        let outcome = store
            .confirm_stage(&job.job_id, "alice", Stage::Suggestion, 0, None, 1)
            .expect("confirm");
        assert_eq!(outcome.balance, Some(4));

        // A stage-1 re-run after a later failure reaches READY again; the
        // second confirm replays the debit instead of charging twice.
        store
            .conn()
            .execute(
                "UPDATE jobs SET status = ?1 WHERE job_id = ?2",
                params![JobStatus::Stage1Running.as_str(), job.job_id.as_str()],
            )
            .expect("force running");
        store
            .apply_stage_output(&job.job_id, Stage::Suggestion, &lines())
            .expect("rerun output");
        let result = store
            .get_stage_result(&job.job_id, "alice", Stage::Suggestion)
            .expect("result");
        let outcome = store
            .confirm_stage(
                &job.job_id,
                "alice",
                Stage::Suggestion,
                result.revision,
                None,
                1,
            )
            .expect("second confirm");
        assert_eq!(outcome.balance, Some(4));
        assert_eq!(store.balance("alice").expect("balance"), 4);
    }

    #[test]
    fn broke_user_cannot_confirm_metered_stage() {
        let store = Store::open_in_memory().expect("open");
        let job = stage1_ready(&store);
        let err = store
            .confirm_stage(&job.job_id, "alice", Stage::Suggestion, 0, None, 1)
            .expect_err("must fail");
        assert!(matches!(err, StoreError::InsufficientCredits { .. }));

        // The whole confirmation rolled back.
        let job = store.get_job(&job.job_id, "alice").expect("get");
        assert_eq!(job.status, JobStatus::Stage1Ready);
        let result = store
            .get_stage_result(&job.job_id, "alice", Stage::Suggestion)
            .expect("result");
        assert_eq!(result.revision, 0);
        assert!(!result.confirmed);
        assert!(store.recent_entries("alice", 20).expect("entries").is_empty());
    }

    #[test]
    fn confirm_requires_ready_status() {
        let store = Store::open_in_memory().expect("open");
        let job = store.create_job("alice").expect("create");
        let err = store
            .confirm_stage(&job.job_id, "alice", Stage::Suggestion, 0, None, 0)
            .expect_err("must fail");
        assert!(matches!(err, StoreError::InvalidState { .. }));
    }

    #[test]
    fn double_confirm_is_invalid_state() {
        let store = Store::open_in_memory().expect("open");
        let job = stage1_ready(&store);
        store
            .confirm_stage(&job.job_id, "alice", Stage::Suggestion, 0, None, 0)
            .expect("confirm");
        let err = store
            .confirm_stage(&job.job_id, "alice", Stage::Suggestion, 1, None, 0)
            .expect_err("must fail");
        assert!(matches!(err, StoreError::InvalidState { .. }));
    }

    #[test]
    fn malformed_line_edits_rejected() {
        let store = Store::open_in_memory().expect("open");
        let job = stage1_ready(&store);

        let duplicate = StageEdits::Lines(vec![
            LineEdit {
                line_id: 1,
                start: 0.0,
                end: 1.0,
                original_text: "a".into(),
                optimized_text: String::new(),
                suggest_remove: false,
                remove: false,
            },
            LineEdit {
                line_id: 1,
                start: 1.0,
                end: 2.0,
                original_text: "b".into(),
                optimized_text: String::new(),
                suggest_remove: false,
                remove: false,
            },
        ]);
        let err = store
            .confirm_stage(
                &job.job_id,
                "alice",
                Stage::Suggestion,
                0,
                Some(&duplicate),
                0,
            )
            .expect_err("must fail");
        assert!(matches!(err, StoreError::InvalidInput(_)));

        let bad_bounds = StageEdits::Lines(vec![LineEdit {
            line_id: 1,
            start: 2.0,
            end: 1.0,
            original_text: "a".into(),
            optimized_text: String::new(),
            suggest_remove: false,
            remove: false,
        }]);
        let err = store
            .confirm_stage(
                &job.job_id,
                "alice",
                Stage::Suggestion,
                0,
                Some(&bad_bounds),
                0,
            )
            .expect_err("must fail");
        assert!(matches!(err, StoreError::InvalidInput(_)));

        // Nothing moved while the payloads were being rejected.
        let result = store
            .get_stage_result(&job.job_id, "alice", Stage::Suggestion)
            .expect("result");
        assert_eq!(result.revision, 0);
        assert!(!result.confirmed);
    }

    #[test]
    fn chapter_edits_replace_wholesale_with_defaults() {
        let store = Store::open_in_memory().expect("open");
        let job = stage1_ready(&store);
        store
            .confirm_stage(&job.job_id, "alice", Stage::Suggestion, 0, None, 0)
            .expect("confirm 1");
        store
            .begin_stage(&job.job_id, "alice", Stage::Chapters)
            .expect("trigger 2");
        let chapters = StageItems::Chapters(vec![
            Chapter {
                chapter_id: 1,
                title: "Intro".into(),
                summary: "Opening".into(),
                start: 0.0,
                end: 1.0,
                line_ids: vec![1],
            },
            Chapter {
                chapter_id: 2,
                title: "Body".into(),
                summary: "Middle".into(),
                start: 1.0,
                end: 2.0,
                line_ids: vec![2],
            },
        ]);
        store
            .apply_stage_output(&job.job_id, Stage::Chapters, &chapters)
            .expect("output 2");

        // Human merges everything into one untitled chapter.
        let edits = StageEdits::Chapters(vec![ChapterEdit {
            chapter_id: 1,
            title: "  ".into(),
            summary: "All of it".into(),
            start: 0.0,
            end: 2.0,
            line_ids: vec![1, 2],
        }]);
        let outcome = store
            .confirm_stage(&job.job_id, "alice", Stage::Chapters, 0, Some(&edits), 0)
            .expect("confirm 2");
        assert_eq!(outcome.job.status, JobStatus::Stage2Confirmed);

        let result = store
            .get_stage_result(&job.job_id, "alice", Stage::Chapters)
            .expect("result");
        let stored = result.items.as_chapters().expect("chapters");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].title, "Chapter 1");
    }

    #[test]
    fn invalid_chapter_bounds_rejected() {
        let store = Store::open_in_memory().expect("open");
        let job = stage1_ready(&store);
        store
            .confirm_stage(&job.job_id, "alice", Stage::Suggestion, 0, None, 0)
            .expect("confirm 1");
        store
            .begin_stage(&job.job_id, "alice", Stage::Chapters)
            .expect("trigger 2");
        store
            .apply_stage_output(
                &job.job_id,
                Stage::Chapters,
                &StageItems::Chapters(vec![Chapter {
                    chapter_id: 1,
                    title: "Intro".into(),
                    summary: String::new(),
                    start: 0.0,
                    end: 1.0,
                    line_ids: vec![1],
                }]),
            )
            .expect("output 2");
        let edits = StageEdits::Chapters(vec![ChapterEdit {
            chapter_id: 1,
            title: "Bad".into(),
            summary: String::new(),
            start: 2.0,
            end: 1.0,
            line_ids: vec![1],
        }]);
        let err = store
            .confirm_stage(&job.job_id, "alice", Stage::Chapters, 0, Some(&edits), 0)
            .expect_err("must fail");
        assert!(matches!(err, StoreError::InvalidInput(_)));
    }

    #[test]
    fn render_has_no_result_surface() {
        let store = Store::open_in_memory().expect("open");
        let job = store.create_job("alice").expect("create");
        let err = store
            .get_stage_result(&job.job_id, "alice", Stage::Render)
            .expect_err("must fail");
        assert!(matches!(err, StoreError::InvalidInput(_)));
        let err = store
            .confirm_stage(&job.job_id, "alice", Stage::Render, 0, None, 0)
            .expect_err("must fail");
        assert!(matches!(err, StoreError::InvalidInput(_)));
    }
}
