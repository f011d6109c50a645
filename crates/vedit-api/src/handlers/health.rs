//! Health check handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use vedit_queue::QueueCounts;

use crate::state::AppState;

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
}

/// Health check endpoint (liveness probe).
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Readiness check response.
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub checks: ReadinessChecks,
}

#[derive(Serialize)]
pub struct ReadinessChecks {
    pub store: CheckStatus,
    pub queue: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_depth: Option<QueueCounts>,
}

#[derive(Serialize)]
pub struct CheckStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            error: None,
        }
    }

    fn error(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            error: Some(msg.into()),
        }
    }
}

/// Readiness probe: both databases must answer.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let store_check = match state.with_store(|store| store.balance("_ready")).await {
        Ok(_) => CheckStatus::ok(),
        Err(err) => CheckStatus::error(err.to_string()),
    };
    let (queue_check, depth) = match state.with_queue(|queue| queue.counts()).await {
        Ok(counts) => (CheckStatus::ok(), Some(counts)),
        Err(err) => (CheckStatus::error(err.to_string()), None),
    };

    let healthy = store_check.status == "ok" && queue_check.status == "ok";
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadinessResponse {
            status: if healthy { "ready" } else { "not_ready" }.to_string(),
            checks: ReadinessChecks {
                store: store_check,
                queue: queue_check,
                queue_depth: depth,
            },
        }),
    )
}
