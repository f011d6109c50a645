//! End-to-end lifecycle tests: store + queue + runner with fake engines.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use vedit_engines::{
    ChapterEngine, EngineError, EngineResult, RenderEngine, SuggestionEngine,
};
use vedit_models::ledger::welcome_key;
use vedit_models::{
    Chapter, ErrorCode, Job, JobId, JobStatus, LedgerReason, Stage, SubtitleLine, TaskKind,
};
use vedit_queue::{QueueConfig, QueueError, TaskQueue};
use vedit_store::{Store, StoreError};
use vedit_worker::{EngineSet, StageRunner, WorkerConfig};

struct FakeSuggestion {
    fail_first: AtomicU32,
}

#[async_trait]
impl SuggestionEngine for FakeSuggestion {
    async fn transcribe_and_suggest(&self, _media_ref: &str) -> EngineResult<Vec<SubtitleLine>> {
        if self.fail_first.load(Ordering::SeqCst) > 0 {
            self.fail_first.fetch_sub(1, Ordering::SeqCst);
            return Err(EngineError::Transient("asr unavailable".into()));
        }
        Ok(vec![
            SubtitleLine {
                line_id: 1,
                start: 0.0,
                end: 2.0,
                original_text: "um hello everyone".into(),
                optimized_text: "Hello everyone".into(),
                suggest_remove: false,
                user_remove: false,
            },
            SubtitleLine {
                line_id: 2,
                start: 2.0,
                end: 2.5,
                original_text: "uh".into(),
                optimized_text: String::new(),
                suggest_remove: true,
                user_remove: true,
            },
            SubtitleLine {
                line_id: 3,
                start: 2.5,
                end: 5.0,
                original_text: "welcome to the show".into(),
                optimized_text: "Welcome to the show".into(),
                suggest_remove: false,
                user_remove: false,
            },
        ])
    }
}

struct FakeChapters;

#[async_trait]
impl ChapterEngine for FakeChapters {
    async fn segment_chapters(&self, lines: &[SubtitleLine]) -> EngineResult<Vec<Chapter>> {
        // Chapters must only cover lines the human kept.
        assert!(lines.iter().all(|line| !line.user_remove));
        Ok(vec![Chapter {
            chapter_id: 1,
            title: "Opening".into(),
            summary: "Greeting and intro".into(),
            start: lines.first().map(|l| l.start).unwrap_or(0.0),
            end: lines.last().map(|l| l.end).unwrap_or(0.0),
            line_ids: lines.iter().map(|l| l.line_id).collect(),
        }])
    }
}

struct FakeRender;

#[async_trait]
impl RenderEngine for FakeRender {
    async fn render(
        &self,
        media_ref: &str,
        lines: &[SubtitleLine],
        chapters: &[Chapter],
    ) -> EngineResult<String> {
        assert!(!lines.is_empty());
        assert!(!chapters.is_empty());
        Ok(format!("signed://artifacts/{}.mp4", media_ref.len()))
    }
}

struct Harness {
    store: Arc<Store>,
    queue: Arc<TaskQueue>,
    runner: StageRunner,
}

fn harness(fail_first_suggestions: u32) -> Harness {
    let store = Arc::new(Store::open_in_memory().expect("store"));
    let queue = Arc::new(
        TaskQueue::in_memory(QueueConfig {
            max_attempts: 2,
            backoff_base: Duration::from_millis(0),
            backoff_cap: Duration::from_millis(0),
            ..QueueConfig::default()
        })
        .expect("queue"),
    );
    let engines = Arc::new(EngineSet {
        suggestion: Arc::new(FakeSuggestion {
            fail_first: AtomicU32::new(fail_first_suggestions),
        }),
        chapters: Arc::new(FakeChapters),
        render: Arc::new(FakeRender),
    });
    let runner = StageRunner {
        store: Arc::clone(&store),
        queue: Arc::clone(&queue),
        engines,
        config: WorkerConfig::default(),
        worker_id: "worker-test".into(),
    };
    Harness { store, queue, runner }
}

impl Harness {
    /// The API-side trigger: status compare-and-set, then enqueue.
    fn trigger(&self, job_id: &JobId, owner: &str, stage: Stage) -> Result<Job, StoreError> {
        let job = self.store.begin_stage(job_id, owner, stage)?;
        let kind = match stage {
            Stage::Suggestion => TaskKind::RunStage1 {
                media_ref: job.media_ref.clone().expect("media_ref"),
            },
            Stage::Chapters => TaskKind::RunStage2,
            Stage::Render => TaskKind::RunRender {
                media_ref: job.media_ref.clone().expect("media_ref"),
            },
        };
        match self.queue.enqueue(job_id, &kind) {
            Ok(_) => Ok(job),
            Err(QueueError::DuplicateTask) => Ok(job),
            Err(err) => panic!("enqueue failed: {err}"),
        }
    }

    /// Run claimed tasks until the queue is drained.
    async fn drain(&self) {
        while let Some(task) = self.queue.claim(&self.runner.worker_id).expect("claim") {
            self.runner.run_task(task).await;
        }
    }

    fn grant(&self, user: &str, amount: i64) {
        self.store
            .credit(user, amount, LedgerReason::WelcomeGrant, None, &welcome_key(user))
            .expect("grant");
    }

    fn uploaded_job(&self, owner: &str) -> JobId {
        let job = self.store.create_job(owner).expect("create");
        self.store
            .mark_uploaded(&job.job_id, owner, "signed://media/talk.mp4")
            .expect("upload");
        job.job_id
    }
}

#[tokio::test]
async fn full_pipeline_happy_path() {
    let h = harness(0);
    h.grant("alice", 3);
    let job_id = h.uploaded_job("alice");

    // Stage 1: trigger, worker runs, human confirms with an override.
    h.trigger(&job_id, "alice", Stage::Suggestion).expect("trigger 1");
    assert_eq!(
        h.store.get_job(&job_id, "alice").expect("get").status,
        JobStatus::Stage1Running
    );
    h.drain().await;
    let job = h.store.get_job(&job_id, "alice").expect("get");
    assert_eq!(job.status, JobStatus::Stage1Ready);

    let result = h
        .store
        .get_stage_result(&job_id, "alice", Stage::Suggestion)
        .expect("result");
    assert_eq!(result.revision, 0);
    assert_eq!(result.items.as_lines().expect("lines").len(), 3);

    let outcome = h
        .store
        .confirm_stage(&job_id, "alice", Stage::Suggestion, 0, None, 1)
        .expect("confirm 1");
    assert_eq!(outcome.job.status, JobStatus::Stage1Confirmed);
    assert_eq!(outcome.balance, Some(2));

    // Stage 2.
    h.trigger(&job_id, "alice", Stage::Chapters).expect("trigger 2");
    h.drain().await;
    let result = h
        .store
        .get_stage_result(&job_id, "alice", Stage::Chapters)
        .expect("result");
    let chapters = result.items.as_chapters().expect("chapters");
    assert_eq!(chapters.len(), 1);
    // The removed filler line never reaches a chapter.
    assert!(!chapters[0].line_ids.contains(&2));

    h.store
        .confirm_stage(&job_id, "alice", Stage::Chapters, 0, None, 0)
        .expect("confirm 2");

    // Render.
    h.trigger(&job_id, "alice", Stage::Render).expect("trigger render");
    h.drain().await;
    let job = h.store.get_job(&job_id, "alice").expect("get");
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.progress, 100);
    assert!(job.artifact_ref.expect("artifact").starts_with("signed://artifacts/"));

    // Exactly one debit happened across the whole run.
    assert_eq!(h.store.balance("alice").expect("balance"), 2);
}

#[tokio::test]
async fn broke_user_blocked_at_confirmation_then_recovers() {
    let h = harness(0);
    let job_id = h.uploaded_job("bob");
    h.trigger(&job_id, "bob", Stage::Suggestion).expect("trigger");
    h.drain().await;

    let err = h
        .store
        .confirm_stage(&job_id, "bob", Stage::Suggestion, 0, None, 1)
        .expect_err("must fail");
    assert_eq!(err.code(), ErrorCode::InsufficientCredits);

    // Nothing moved: still reviewable at the same revision.
    let job = h.store.get_job(&job_id, "bob").expect("get");
    assert_eq!(job.status, JobStatus::Stage1Ready);
    let result = h
        .store
        .get_stage_result(&job_id, "bob", Stage::Suggestion)
        .expect("result");
    assert_eq!(result.revision, 0);
    assert!(!result.confirmed);

    // Topping up unblocks the same confirmation.
    h.store
        .redeem_coupon("TOPUP", "bob")
        .expect_err("unknown code");
    h.store.upsert_coupon("TOPUP", 2, None, None).expect("coupon");
    let redeemed = h.store.redeem_coupon("TOPUP", "bob").expect("redeem");
    assert_eq!(redeemed.balance, 2);

    let outcome = h
        .store
        .confirm_stage(&job_id, "bob", Stage::Suggestion, 0, None, 1)
        .expect("confirm");
    assert_eq!(outcome.balance, Some(1));
}

#[tokio::test]
async fn concurrent_editors_one_wins_on_revision() {
    let h = harness(0);
    h.grant("alice", 1);
    let job_id = h.uploaded_job("alice");
    h.trigger(&job_id, "alice", Stage::Suggestion).expect("trigger");
    h.drain().await;

    // Both clients fetched revision 0; the first confirm wins.
    h.store
        .confirm_stage(&job_id, "alice", Stage::Suggestion, 0, None, 1)
        .expect("first confirm");
    let err = h
        .store
        .confirm_stage(&job_id, "alice", Stage::Suggestion, 0, None, 1)
        .expect_err("second must fail");
    // The job already advanced, which surfaces before the revision check.
    assert!(matches!(
        err,
        StoreError::InvalidState { .. } | StoreError::RevisionConflict { .. }
    ));
    assert_eq!(h.store.balance("alice").expect("balance"), 0);
}

#[tokio::test]
async fn transient_engine_outage_consumes_budget_then_fails_job() {
    // Two failures against a budget of two attempts.
    let h = harness(2);
    h.grant("carol", 1);
    let job_id = h.uploaded_job("carol");
    h.trigger(&job_id, "carol", Stage::Suggestion).expect("trigger");

    // First attempt fails transiently: job stays RUNNING, task requeued.
    let task = h.queue.claim(&h.runner.worker_id).expect("claim").expect("due");
    h.runner.run_task(task).await;
    assert_eq!(
        h.store.get_job(&job_id, "carol").expect("get").status,
        JobStatus::Stage1Running
    );

    // Second attempt exhausts the budget: job FAILED with the stable code.
    let task = h.queue.claim(&h.runner.worker_id).expect("claim").expect("due");
    h.runner.run_task(task).await;
    let job = h.store.get_job(&job_id, "carol").expect("get");
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(
        job.error.as_ref().map(|e| e.code.as_str()),
        Some("TRANSIENT_COLLABORATOR_FAILURE")
    );

    // The failed stage can be re-triggered; the engine has recovered.
    h.trigger(&job_id, "carol", Stage::Suggestion).expect("retrigger");
    h.drain().await;
    assert_eq!(
        h.store.get_job(&job_id, "carol").expect("get").status,
        JobStatus::Stage1Ready
    );
}

#[tokio::test]
async fn duplicate_trigger_is_mutually_exclusive() {
    let h = harness(0);
    let job_id = h.uploaded_job("alice");
    h.trigger(&job_id, "alice", Stage::Suggestion).expect("first");

    let err = h
        .store
        .begin_stage(&job_id, "alice", Stage::Suggestion)
        .expect_err("second must fail");
    assert!(matches!(err, StoreError::AlreadyRunning));

    // Only one task exists for the job.
    let task = h.queue.claim(&h.runner.worker_id).expect("claim").expect("due");
    assert!(h.queue.claim("other").expect("claim").is_none());
    h.runner.run_task(task).await;
}

#[tokio::test]
async fn stale_task_after_crash_recovery_is_dropped() {
    let h = harness(0);
    let job_id = h.uploaded_job("alice");
    h.trigger(&job_id, "alice", Stage::Suggestion).expect("trigger");
    h.drain().await;

    // Re-enqueue the same stage by hand, as a crashed revert would leave
    // behind, while the job has already moved past RUNNING.
    h.queue
        .enqueue(
            &job_id,
            &TaskKind::RunStage1 {
                media_ref: "signed://media/talk.mp4".into(),
            },
        )
        .expect("orphan task");
    h.drain().await;

    // The stale task was completed without touching the job.
    let job = h.store.get_job(&job_id, "alice").expect("get");
    assert_eq!(job.status, JobStatus::Stage1Ready);
    let result = h
        .store
        .get_stage_result(&job_id, "alice", Stage::Suggestion)
        .expect("result");
    assert_eq!(result.revision, 0);
}

#[tokio::test]
async fn wrong_owner_cannot_see_or_move_a_job() {
    let h = harness(0);
    let job_id = h.uploaded_job("alice");

    let err = h.store.get_job(&job_id, "mallory").expect_err("must fail");
    assert!(matches!(err, StoreError::Forbidden(_)));
    let err = h
        .store
        .begin_stage(&job_id, "mallory", Stage::Suggestion)
        .expect_err("must fail");
    assert!(matches!(err, StoreError::Forbidden(_)));
}
