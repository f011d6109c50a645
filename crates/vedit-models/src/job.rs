//! Job lifecycle definitions.
//!
//! A job moves through four human-gated stages: suggestion generation,
//! chapter segmentation and final rendering, each with a `*_RUNNING` /
//! `*_READY` / `*_CONFIRMED` progression. `JobStatus::can_transition`
//! encodes the only legal edges; the store checks stage triggers against
//! it and guards the remaining moves with compare-and-set preconditions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(format!("job_{}", &Uuid::new_v4().simple().to_string()[..12]))
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Job created, no media yet
    #[default]
    Created,
    /// Media reference recorded, stage 1 may start
    UploadReady,
    /// Suggestion generation in flight
    Stage1Running,
    /// Suggestions ready for human review
    Stage1Ready,
    /// Suggestions confirmed (frozen), stage 2 may start
    Stage1Confirmed,
    /// Chapter segmentation in flight
    Stage2Running,
    /// Chapters ready for human review
    Stage2Ready,
    /// Chapters confirmed, render may start
    Stage2Confirmed,
    /// Final render in flight
    RenderRunning,
    /// Final artifact produced
    Succeeded,
    /// A running stage failed; retriable by re-triggering that stage
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "CREATED",
            JobStatus::UploadReady => "UPLOAD_READY",
            JobStatus::Stage1Running => "STAGE1_RUNNING",
            JobStatus::Stage1Ready => "STAGE1_READY",
            JobStatus::Stage1Confirmed => "STAGE1_CONFIRMED",
            JobStatus::Stage2Running => "STAGE2_RUNNING",
            JobStatus::Stage2Ready => "STAGE2_READY",
            JobStatus::Stage2Confirmed => "STAGE2_CONFIRMED",
            JobStatus::RenderRunning => "RENDER_RUNNING",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "CREATED" => JobStatus::Created,
            "UPLOAD_READY" => JobStatus::UploadReady,
            "STAGE1_RUNNING" => JobStatus::Stage1Running,
            "STAGE1_READY" => JobStatus::Stage1Ready,
            "STAGE1_CONFIRMED" => JobStatus::Stage1Confirmed,
            "STAGE2_RUNNING" => JobStatus::Stage2Running,
            "STAGE2_READY" => JobStatus::Stage2Ready,
            "STAGE2_CONFIRMED" => JobStatus::Stage2Confirmed,
            "RENDER_RUNNING" => JobStatus::RenderRunning,
            "SUCCEEDED" => JobStatus::Succeeded,
            "FAILED" => JobStatus::Failed,
            _ => return None,
        })
    }

    /// Check if this is a terminal state. `Failed` is terminal but
    /// retriable by re-triggering the failed stage.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    /// Check if a stage is currently in flight.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            JobStatus::Stage1Running | JobStatus::Stage2Running | JobStatus::RenderRunning
        )
    }

    /// Whether `self -> to` is a legal lifecycle edge.
    ///
    /// `Failed -> *_RUNNING` is legal only for the stage that failed; the
    /// store enforces that extra condition with the recorded failed stage.
    pub fn can_transition(&self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Created, UploadReady)
                | (UploadReady, Stage1Running)
                | (Stage1Running, Stage1Ready)
                | (Stage1Running, Failed)
                | (Stage1Ready, Stage1Confirmed)
                | (Stage1Confirmed, Stage2Running)
                | (Stage2Running, Stage2Ready)
                | (Stage2Running, Failed)
                | (Stage2Ready, Stage2Confirmed)
                | (Stage2Confirmed, RenderRunning)
                | (RenderRunning, Succeeded)
                | (RenderRunning, Failed)
                | (Failed, Stage1Running)
                | (Failed, Stage2Running)
                | (Failed, RenderRunning)
        )
    }

    /// Canonical advisory progress value for a status (0-100).
    ///
    /// Never used for control decisions; workers may push higher values
    /// while a stage runs.
    pub fn default_progress(&self) -> u8 {
        match self {
            JobStatus::Created => 0,
            JobStatus::UploadReady => 5,
            JobStatus::Stage1Running => 10,
            JobStatus::Stage1Ready => 30,
            JobStatus::Stage1Confirmed => 40,
            JobStatus::Stage2Running => 45,
            JobStatus::Stage2Ready => 60,
            JobStatus::Stage2Confirmed => 70,
            JobStatus::RenderRunning => 75,
            JobStatus::Succeeded => 100,
            JobStatus::Failed => 0,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One of the sequential pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// ASR + LLM line suggestions (stage 1)
    Suggestion,
    /// Chapter segmentation (stage 2)
    Chapters,
    /// Final render
    Render,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Suggestion => "suggestion",
            Stage::Chapters => "chapters",
            Stage::Render => "render",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "suggestion" => Stage::Suggestion,
            "chapters" => Stage::Chapters,
            "render" => Stage::Render,
            _ => return None,
        })
    }

    /// Status a job must hold for this stage to be triggered.
    pub fn precondition(&self) -> JobStatus {
        match self {
            Stage::Suggestion => JobStatus::UploadReady,
            Stage::Chapters => JobStatus::Stage1Confirmed,
            Stage::Render => JobStatus::Stage2Confirmed,
        }
    }

    /// Status while this stage's task is in flight.
    pub fn running(&self) -> JobStatus {
        match self {
            Stage::Suggestion => JobStatus::Stage1Running,
            Stage::Chapters => JobStatus::Stage2Running,
            Stage::Render => JobStatus::RenderRunning,
        }
    }

    /// Status after the stage's collaborator output lands. Render has no
    /// review step and completes the job directly.
    pub fn ready(&self) -> JobStatus {
        match self {
            Stage::Suggestion => JobStatus::Stage1Ready,
            Stage::Chapters => JobStatus::Stage2Ready,
            Stage::Render => JobStatus::Succeeded,
        }
    }

    /// Status after human confirmation. `None` for render.
    pub fn confirmed(&self) -> Option<JobStatus> {
        match self {
            Stage::Suggestion => Some(JobStatus::Stage1Confirmed),
            Stage::Chapters => Some(JobStatus::Stage2Confirmed),
            Stage::Render => None,
        }
    }

    /// Whether this stage produces a reviewable result.
    pub fn has_result(&self) -> bool {
        !matches!(self, Stage::Render)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stable error recorded on a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub code: String,
    pub message: String,
}

/// The authoritative copy of a job. Mutated only through the store's
/// state-machine operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    /// Owning user; every job-scoped operation checks this first
    pub owner: String,
    pub status: JobStatus,
    /// Advisory progress (0-100)
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    /// Signed reference to the uploaded media, set by the upload handshake
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_ref: Option<String>,
    /// Signed reference to the rendered artifact, set on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
