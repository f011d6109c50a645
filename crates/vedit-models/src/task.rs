//! Queue task types.
//!
//! `TaskKind` is a tagged union (one variant per stage) so worker dispatch
//! is an exhaustive match rather than string branching.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::job::{JobId, Stage};

/// Unique identifier for a queued task (queue-assigned row id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stage work carried by a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    /// Run suggestion generation against the uploaded media
    RunStage1 { media_ref: String },
    /// Run chapter segmentation over the confirmed lines
    RunStage2,
    /// Run the final render against the uploaded media
    RunRender { media_ref: String },
}

impl TaskKind {
    /// The lifecycle stage this task executes.
    pub fn stage(&self) -> Stage {
        match self {
            TaskKind::RunStage1 { .. } => Stage::Suggestion,
            TaskKind::RunStage2 => Stage::Chapters,
            TaskKind::RunRender { .. } => Stage::Render,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::RunStage1 { .. } => "run_stage1",
            TaskKind::RunStage2 => "run_stage2",
            TaskKind::RunRender { .. } => "run_render",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Queue status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Waiting for a worker (or backing off after a transient failure)
    #[default]
    Pending,
    /// Held by exactly one worker under a lease
    Claimed,
    /// Completed successfully (terminal)
    Done,
    /// Retry budget exhausted or permanent failure (terminal)
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Claimed => "CLAIMED",
            TaskStatus::Done => "DONE",
            TaskStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "PENDING" => TaskStatus::Pending,
            "CLAIMED" => TaskStatus::Claimed,
            "DONE" => TaskStatus::Done,
            "FAILED" => TaskStatus::Failed,
            _ => return None,
        })
    }

    /// Terminal tasks no longer block another trigger for the same job.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A durable queue entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub kind: TaskKind,
    pub status: TaskStatus,
    /// Delivery attempts started (incremented on every claim)
    pub attempt_count: u32,
    /// Not eligible for claim before this instant (retry backoff)
    pub available_at: DateTime<Utc>,
    /// Lease expiry while CLAIMED; a crashed worker's task becomes
    /// reclaimable once this passes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
