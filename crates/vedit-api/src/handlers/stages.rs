//! Stage result review and confirmation handlers.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use vedit_models::{ChapterEdit, Job, JobId, LineEdit, Stage, StageEdits, StageResult};

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::state::AppState;

/// Fetch the stage 1 (line suggestions) result.
pub async fn get_stage1_result(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<String>,
) -> ApiResult<Json<StageResult>> {
    get_result(state, user, job_id, Stage::Suggestion).await
}

/// Fetch the stage 2 (chapters) result.
pub async fn get_stage2_result(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<String>,
) -> ApiResult<Json<StageResult>> {
    get_result(state, user, job_id, Stage::Chapters).await
}

async fn get_result(
    state: AppState,
    user: AuthUser,
    job_id: String,
    stage: Stage,
) -> ApiResult<Json<StageResult>> {
    let id = JobId::from_string(job_id);
    let owner = user.user_id.clone();
    let result = state
        .with_store(move |store| store.get_stage_result(&id, &owner, stage))
        .await?;
    Ok(Json(result))
}

/// Stage 1 confirmation payload. `revision` must match the fetched result;
/// `edits`, when present, replace the stored line list wholesale.
#[derive(Debug, Deserialize)]
pub struct ConfirmStage1Request {
    pub revision: u64,
    #[serde(default)]
    pub edits: Option<Vec<LineEdit>>,
}

/// Stage 2 confirmation payload.
#[derive(Debug, Deserialize)]
pub struct ConfirmStage2Request {
    pub revision: u64,
    #[serde(default)]
    pub edits: Option<Vec<ChapterEdit>>,
}

/// What a confirmation returns to the client.
#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    pub job: Job,
    pub revision: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<i64>,
}

/// Confirm stage 1, applying line edits and consuming the metered credit.
pub async fn confirm_stage1(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<String>,
    Json(body): Json<ConfirmStage1Request>,
) -> ApiResult<Json<ConfirmResponse>> {
    let id = JobId::from_string(job_id);
    let owner = user.user_id.clone();
    let edits = body.edits.map(StageEdits::Lines);
    let cost = state.config.stage1_credit_cost;
    let outcome = state
        .with_store(move |store| {
            store.confirm_stage(
                &id,
                &owner,
                Stage::Suggestion,
                body.revision,
                edits.as_ref(),
                cost,
            )
        })
        .await?;
    Ok(Json(ConfirmResponse {
        job: outcome.job,
        revision: outcome.revision,
        balance: outcome.balance,
    }))
}

/// Confirm stage 2, applying chapter edits. Not metered.
pub async fn confirm_stage2(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<String>,
    Json(body): Json<ConfirmStage2Request>,
) -> ApiResult<Json<ConfirmResponse>> {
    let id = JobId::from_string(job_id);
    let owner = user.user_id.clone();
    let edits = body.edits.map(StageEdits::Chapters);
    let outcome = state
        .with_store(move |store| {
            store.confirm_stage(&id, &owner, Stage::Chapters, body.revision, edits.as_ref(), 0)
        })
        .await?;
    Ok(Json(ConfirmResponse {
        job: outcome.job,
        revision: outcome.revision,
        balance: outcome.balance,
    }))
}
