//! Stage execution.
//!
//! One claimed task is one attempt of one stage. The runner checks the job
//! is still in the stage's running status (a stale task after crash
//! recovery is completed without work), calls the collaborator engine
//! under the stage's wall-clock budget, and lands the output through the
//! store's compare-and-set transitions.
//!
//! Failure policy: transient errors consume queue retry budget and leave
//! the job RUNNING; once the budget is spent, or on a permanent error, the
//! job is failed with a stable code so the client can offer a re-trigger.

use std::sync::Arc;

use tracing::{info, warn};

use vedit_engines::{ChapterEngine, RenderEngine, SuggestionEngine};
use vedit_models::{
    Chapter, ErrorCode, JobId, Stage, StageItems, SubtitleLine, Task, TaskKind,
};
use vedit_queue::{QueueError, TaskQueue};
use vedit_store::{Store, StoreError};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};

/// The three collaborator engines a worker drives.
pub struct EngineSet {
    pub suggestion: Arc<dyn SuggestionEngine>,
    pub chapters: Arc<dyn ChapterEngine>,
    pub render: Arc<dyn RenderEngine>,
}

/// Executes claimed tasks against the store and engines.
pub struct StageRunner {
    pub store: Arc<Store>,
    pub queue: Arc<TaskQueue>,
    pub engines: Arc<EngineSet>,
    pub config: WorkerConfig,
    pub worker_id: String,
}

/// Advisory progress pushed once the engine call is underway.
fn midpoint_progress(stage: Stage) -> u8 {
    match stage {
        Stage::Suggestion => 20,
        Stage::Chapters => 50,
        Stage::Render => 85,
    }
}

impl StageRunner {
    /// Process one claimed task end to end, including its queue and job
    /// outcome. Never returns an error; every failure path is recorded.
    pub async fn run_task(&self, task: Task) {
        let stage = task.kind.stage();
        let job_id = task.job_id.clone();

        // A task can outlive its purpose: the enqueue-side revert lost the
        // race, or a re-claimed task already ran to completion elsewhere.
        let current = {
            let id = job_id.clone();
            self.with_store(move |store| store.get_job_unchecked(&id)).await
        };
        let job = match current {
            Ok(job) => job,
            Err(WorkerError::Store(StoreError::NotFound(_))) => {
                warn!(job_id = %job_id, "task references a missing job, dropping");
                self.finish_task(&task).await;
                return;
            }
            Err(err) => {
                warn!(job_id = %job_id, "could not load job, requeueing: {err}");
                self.record_failure(&task, stage, err).await;
                return;
            }
        };
        if job.status != stage.running() {
            info!(job_id = %job_id, status = %job.status, "task is stale, dropping");
            self.finish_task(&task).await;
            return;
        }

        let budget = self.config.stage_timeout(stage);
        let attempt = tokio::time::timeout(budget, self.execute(&task, stage));
        let result = match attempt.await {
            Ok(result) => result,
            Err(_) => Err(WorkerError::Timeout),
        };

        match result {
            Ok(()) => {
                info!(job_id = %job_id, stage = %stage, task_id = %task.task_id, "stage attempt succeeded");
                self.finish_task(&task).await;
            }
            Err(err) => self.record_failure(&task, stage, err).await,
        }
    }

    /// The stage work itself: engine call plus store write.
    async fn execute(&self, task: &Task, stage: Stage) -> WorkerResult<()> {
        let job_id = task.job_id.clone();
        {
            let id = job_id.clone();
            let progress = midpoint_progress(stage);
            self.with_store(move |store| store.push_progress(&id, stage, progress))
                .await?;
        }

        match &task.kind {
            TaskKind::RunStage1 { media_ref } => {
                let lines = self.engines.suggestion.transcribe_and_suggest(media_ref).await?;
                if lines.is_empty() {
                    return Err(WorkerError::bad_output("suggestion engine returned no lines"));
                }
                let id = job_id.clone();
                self.with_store(move |store| {
                    store.apply_stage_output(&id, Stage::Suggestion, &StageItems::Lines(lines))
                })
                .await?;
            }
            TaskKind::RunStage2 => {
                let kept = self.confirmed_lines(&job_id).await?;
                let chapters = self.engines.chapters.segment_chapters(&kept).await?;
                if chapters.is_empty() {
                    return Err(WorkerError::bad_output("chapter engine returned no chapters"));
                }
                let id = job_id.clone();
                self.with_store(move |store| {
                    store.apply_stage_output(&id, Stage::Chapters, &StageItems::Chapters(chapters))
                })
                .await?;
            }
            TaskKind::RunRender { media_ref } => {
                let kept = self.confirmed_lines(&job_id).await?;
                let chapters = self.confirmed_chapters(&job_id).await?;
                let artifact_ref = self
                    .engines
                    .render
                    .render(media_ref, &kept, &chapters)
                    .await?;
                if artifact_ref.trim().is_empty() {
                    return Err(WorkerError::bad_output("render engine returned no artifact"));
                }
                let id = job_id.clone();
                self.with_store(move |store| store.complete_render(&id, &artifact_ref))
                    .await?;
            }
        }
        Ok(())
    }

    /// The confirmed stage 1 lines the human kept.
    async fn confirmed_lines(&self, job_id: &JobId) -> WorkerResult<Vec<SubtitleLine>> {
        let id = job_id.clone();
        let result = self
            .with_store(move |store| {
                let job = store.get_job_unchecked(&id)?;
                store.get_stage_result(&id, &job.owner, Stage::Suggestion)
            })
            .await?;
        if !result.confirmed {
            return Err(WorkerError::bad_output("stage 1 result is not confirmed"));
        }
        let lines = result
            .items
            .as_lines()
            .ok_or_else(|| WorkerError::bad_output("stage 1 result holds no lines"))?;
        Ok(lines.iter().filter(|line| !line.user_remove).cloned().collect())
    }

    /// The confirmed stage 2 chapters.
    async fn confirmed_chapters(&self, job_id: &JobId) -> WorkerResult<Vec<Chapter>> {
        let id = job_id.clone();
        let result = self
            .with_store(move |store| {
                let job = store.get_job_unchecked(&id)?;
                store.get_stage_result(&id, &job.owner, Stage::Chapters)
            })
            .await?;
        if !result.confirmed {
            return Err(WorkerError::bad_output("stage 2 result is not confirmed"));
        }
        let chapters = result
            .items
            .as_chapters()
            .ok_or_else(|| WorkerError::bad_output("stage 2 result holds no chapters"))?;
        Ok(chapters.to_vec())
    }

    /// Route a failed attempt: requeue with budget left, otherwise fail
    /// the task and the job together.
    async fn record_failure(&self, task: &Task, stage: Stage, err: WorkerError) {
        let job_id = task.job_id.clone();
        let message = err.to_string();
        warn!(job_id = %job_id, stage = %stage, task_id = %task.task_id, "stage attempt failed: {message}");

        if err.is_transient() {
            let outcome = {
                let worker = self.worker_id.clone();
                let id = task.task_id;
                let msg = message.clone();
                self.with_queue(move |queue| queue.fail(id, &worker, &msg)).await
            };
            match outcome {
                Ok(outcome) if !outcome.exhausted => {
                    // Budget left: the job stays RUNNING and the retry is
                    // invisible to the client.
                    return;
                }
                Ok(_) => {
                    self.fail_job(&job_id, stage, ErrorCode::TransientCollaboratorFailure, &message)
                        .await;
                }
                Err(WorkerError::Queue(QueueError::LeaseLost(_))) => {
                    warn!(job_id = %job_id, "lease lost while failing task");
                }
                Err(other) => {
                    warn!(job_id = %job_id, "could not record task failure: {other}");
                }
            }
        } else {
            let dropped = {
                let worker = self.worker_id.clone();
                let id = task.task_id;
                let msg = message.clone();
                self.with_queue(move |queue| queue.fail_permanent(id, &worker, &msg))
                    .await
            };
            if let Err(err) = dropped {
                warn!(job_id = %job_id, "could not fail task permanently: {err}");
            }
            self.fail_job(&job_id, stage, ErrorCode::InternalError, &message)
                .await;
        }
    }

    async fn fail_job(&self, job_id: &JobId, stage: Stage, code: ErrorCode, message: &str) {
        let id = job_id.clone();
        let msg = message.to_string();
        let failed = self
            .with_store(move |store| store.fail_stage(&id, stage, code, &msg))
            .await;
        match failed {
            Ok(_) => info!(job_id = %job_id, stage = %stage, %code, "job failed"),
            // The job moved on while we were failing; leave it alone.
            Err(WorkerError::Store(StoreError::InvalidState { .. })) => {}
            Err(err) => warn!(job_id = %job_id, "could not fail job: {err}"),
        }
    }

    async fn finish_task(&self, task: &Task) {
        let worker = self.worker_id.clone();
        let id = task.task_id;
        if let Err(err) = self.with_queue(move |queue| queue.complete(id, &worker)).await {
            // Lease expired mid-run; the durable job state is already correct.
            warn!(task_id = %task.task_id, "could not complete task: {err}");
        }
    }

    pub(crate) async fn with_store<T, F>(&self, f: F) -> WorkerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Store) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| WorkerError::bad_output(format!("store task panicked: {e}")))?
            .map_err(WorkerError::from)
    }

    pub(crate) async fn with_queue<T, F>(&self, f: F) -> WorkerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&TaskQueue) -> Result<T, QueueError> + Send + 'static,
    {
        let queue = Arc::clone(&self.queue);
        tokio::task::spawn_blocking(move || f(&queue))
            .await
            .map_err(|e| WorkerError::bad_output(format!("queue task panicked: {e}")))?
            .map_err(WorkerError::from)
    }
}
