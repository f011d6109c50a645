//! Job lifecycle handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use vedit_models::{Job, JobId, Stage};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::services::orchestrate;
use crate::state::AppState;

/// Create a new job for the caller.
pub async fn create_job(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<(StatusCode, Json<Job>)> {
    let owner = user.user_id.clone();
    let job = state
        .with_store(move |store| store.create_job(&owner))
        .await?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// Poll a job's status.
pub async fn get_job(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Job>> {
    let id = JobId::from_string(job_id);
    let owner = user.user_id.clone();
    let job = state
        .with_store(move |store| store.get_job(&id, &owner))
        .await?;
    Ok(Json(job))
}

/// Upload handshake payload.
#[derive(Debug, Deserialize)]
pub struct UploadReadyRequest {
    pub media_ref: String,
}

/// Record the uploaded media reference and unlock stage 1.
pub async fn upload_ready(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<String>,
    Json(body): Json<UploadReadyRequest>,
) -> ApiResult<Json<Job>> {
    if body.media_ref.trim().is_empty() {
        return Err(ApiError::bad_request("media_ref cannot be empty"));
    }
    let id = JobId::from_string(job_id);
    let owner = user.user_id.clone();
    let job = state
        .with_store(move |store| store.mark_uploaded(&id, &owner, &body.media_ref))
        .await?;
    Ok(Json(job))
}

/// Trigger suggestion generation (stage 1).
pub async fn trigger_stage1(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Job>> {
    let id = JobId::from_string(job_id);
    let job = orchestrate::trigger_stage(&state, &user.user_id, &id, Stage::Suggestion).await?;
    Ok(Json(job))
}

/// Trigger chapter segmentation (stage 2).
pub async fn trigger_stage2(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Job>> {
    let id = JobId::from_string(job_id);
    let job = orchestrate::trigger_stage(&state, &user.user_id, &id, Stage::Chapters).await?;
    Ok(Json(job))
}

/// Trigger the final render.
pub async fn trigger_render(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Job>> {
    let id = JobId::from_string(job_id);
    let job = orchestrate::trigger_stage(&state, &user.user_id, &id, Stage::Render).await?;
    Ok(Json(job))
}
