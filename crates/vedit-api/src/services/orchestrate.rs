//! Stage trigger orchestration.
//!
//! A trigger is two durable writes in two databases: the status
//! compare-and-set in the store, then the task insert in the queue. The
//! status move is the gate; if the enqueue fails the status is reverted so
//! the trigger stays available. A crash between the two leaves the job
//! RUNNING with no task, which an operator resolves by failing the stage.

use tracing::{info, warn};

use vedit_models::{Job, JobId, Stage, TaskKind};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Trigger `stage` for a job on behalf of `caller`.
///
/// A duplicate trigger while the stage is in flight fails `AlreadyRunning`
/// (409) so the caller can tell "started" from "already in flight"; the
/// job status is pollable either way.
pub async fn trigger_stage(
    state: &AppState,
    caller: &str,
    job_id: &JobId,
    stage: Stage,
) -> ApiResult<Job> {
    let owner = caller.to_string();
    let id = job_id.clone();
    let job = state
        .with_store(move |store| store.begin_stage(&id, &owner, stage))
        .await?;

    let kind = match stage {
        Stage::Suggestion => TaskKind::RunStage1 {
            media_ref: require_media_ref(&job)?,
        },
        Stage::Chapters => TaskKind::RunStage2,
        Stage::Render => TaskKind::RunRender {
            media_ref: require_media_ref(&job)?,
        },
    };

    let id = job_id.clone();
    let enqueued = state.with_queue(move |queue| queue.enqueue(&id, &kind)).await;
    match enqueued {
        Ok(task) => {
            info!(job_id = %job_id, stage = %stage, task_id = %task.task_id, "stage enqueued");
            Ok(job)
        }
        Err(ApiError::Queue(vedit_queue::QueueError::DuplicateTask)) => {
            // A live task already covers this job (crash between a previous
            // enqueue and its revert); the running status is truthful.
            warn!(job_id = %job_id, stage = %stage, "live task already queued");
            Ok(job)
        }
        Err(err) => {
            let id = job_id.clone();
            if let Err(revert_err) = state
                .with_store(move |store| store.revert_stage_trigger(&id, stage))
                .await
            {
                warn!(job_id = %job_id, "trigger revert failed: {revert_err}");
            }
            Err(err)
        }
    }
}

fn require_media_ref(job: &Job) -> ApiResult<String> {
    job.media_ref
        .clone()
        .ok_or_else(|| ApiError::internal(format!("job {} has no media_ref", job.job_id)))
}
