//! Shared data models for the VEdit backend.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs and the lifecycle state machine
//! - Stage results (subtitle lines, chapters) with revision counters
//! - Queue tasks with tagged payloads
//! - Credit ledger entries and wallets
//! - The stable error-code taxonomy exposed to clients

pub mod code;
pub mod job;
pub mod ledger;
pub mod stage;
pub mod task;

// Re-export common types
pub use code::ErrorCode;
pub use job::{Job, JobError, JobId, JobStatus, Stage};
pub use ledger::{LedgerEntry, LedgerReason};
pub use stage::{Chapter, ChapterEdit, LineEdit, StageEdits, StageItems, StageResult, SubtitleLine};
pub use task::{Task, TaskId, TaskKind, TaskStatus};
