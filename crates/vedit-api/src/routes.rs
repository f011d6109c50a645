//! API routes.

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::limit::RequestBodyLimitLayer;

use crate::handlers::credits::{get_profile, redeem_coupon};
use crate::handlers::jobs::{
    create_job, get_job, trigger_render, trigger_stage1, trigger_stage2, upload_ready,
};
use crate::handlers::stages::{
    confirm_stage1, confirm_stage2, get_stage1_result, get_stage2_result,
};
use crate::handlers::{health, ready};
use crate::middleware::{cors_layer, request_id, request_logging};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    let job_routes = Router::new()
        .route("/jobs", post(create_job))
        .route("/jobs/:job_id", get(get_job))
        .route("/jobs/:job_id/upload-ready", post(upload_ready))
        // Stage triggers
        .route("/jobs/:job_id/stage1", post(trigger_stage1))
        .route("/jobs/:job_id/stage2", post(trigger_stage2))
        .route("/jobs/:job_id/render", post(trigger_render))
        // Stage review
        .route("/jobs/:job_id/stage1/result", get(get_stage1_result))
        .route("/jobs/:job_id/stage1/confirm", post(confirm_stage1))
        .route("/jobs/:job_id/stage2/result", get(get_stage2_result))
        .route("/jobs/:job_id/stage2/confirm", post(confirm_stage2));

    let credit_routes = Router::new()
        .route("/me/profile", get(get_profile))
        .route("/credits/redeem", post(redeem_coupon));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    Router::new()
        .nest("/api", job_routes.merge(credit_routes))
        .merge(health_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
