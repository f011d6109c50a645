//! Stage result types: subtitle line suggestions and chapter segments.
//!
//! A `StageResult` carries a monotonic revision counter. Human edits are
//! accepted only against the expected revision (optimistic concurrency) and
//! fully replace the stored item list.

use serde::{Deserialize, Serialize};

use crate::job::{JobId, Stage};

/// One transcript line with the machine suggestion and the human decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleLine {
    pub line_id: u32,
    /// Start offset in seconds
    pub start: f64,
    /// End offset in seconds
    pub end: f64,
    pub original_text: String,
    pub optimized_text: String,
    /// Machine suggestion to drop this line
    pub suggest_remove: bool,
    /// Human's final decision; defaults to the machine suggestion
    pub user_remove: bool,
}

/// One chapter segment over the kept lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub chapter_id: u32,
    pub title: String,
    pub summary: String,
    pub start: f64,
    pub end: f64,
    pub line_ids: Vec<u32>,
}

/// Stage-specific item list stored in a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "items", rename_all = "snake_case")]
pub enum StageItems {
    Lines(Vec<SubtitleLine>),
    Chapters(Vec<Chapter>),
}

impl StageItems {
    pub fn len(&self) -> usize {
        match self {
            StageItems::Lines(lines) => lines.len(),
            StageItems::Chapters(chapters) => chapters.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_lines(&self) -> Option<&[SubtitleLine]> {
        match self {
            StageItems::Lines(lines) => Some(lines),
            StageItems::Chapters(_) => None,
        }
    }

    pub fn as_chapters(&self) -> Option<&[Chapter]> {
        match self {
            StageItems::Chapters(chapters) => Some(chapters),
            StageItems::Lines(_) => None,
        }
    }
}

/// Per-job, per-stage result with its revision counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub job_id: JobId,
    pub stage: Stage,
    /// Starts at 0, increments on every accepted mutation
    pub revision: u64,
    pub items: StageItems,
    /// Frozen once the stage is confirmed
    pub confirmed: bool,
}

/// Replacement record for one subtitle line. Confirmation payloads carry
/// the full list the client wants stored; omitting a line drops it.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LineEdit {
    pub line_id: u32,
    pub start: f64,
    pub end: f64,
    pub original_text: String,
    #[serde(default)]
    pub optimized_text: String,
    #[serde(default)]
    pub suggest_remove: bool,
    #[serde(default)]
    pub remove: bool,
}

/// Replacement record for one chapter.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChapterEdit {
    pub chapter_id: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub line_ids: Vec<u32>,
}

/// Edits submitted with a stage confirmation. The accepted list replaces
/// the stored one wholesale (last-writer-wins).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "edits", rename_all = "snake_case")]
pub enum StageEdits {
    Lines(Vec<LineEdit>),
    Chapters(Vec<ChapterEdit>),
}

impl StageEdits {
    /// The stage these edits apply to.
    pub fn stage(&self) -> Stage {
        match self {
            StageEdits::Lines(_) => Stage::Suggestion,
            StageEdits::Chapters(_) => Stage::Chapters,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            StageEdits::Lines(edits) => edits.is_empty(),
            StageEdits::Chapters(edits) => edits.is_empty(),
        }
    }
}
