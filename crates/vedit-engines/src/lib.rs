//! Clients for the stage collaborator services.
//!
//! Each pipeline stage delegates its heavy lifting to an external service:
//! transcription plus line suggestions, chapter segmentation, and the final
//! render. Workers talk to them through the engine traits so tests can
//! substitute fakes.

mod error;
mod http;

pub use error::{EngineError, EngineResult};
pub use http::{EngineConfig, HttpEngines};

use async_trait::async_trait;

use vedit_models::{Chapter, SubtitleLine};

/// Stage 1 collaborator: transcribe the media and propose per-line edits.
#[async_trait]
pub trait SuggestionEngine: Send + Sync {
    async fn transcribe_and_suggest(&self, media_ref: &str) -> EngineResult<Vec<SubtitleLine>>;
}

/// Stage 2 collaborator: segment the kept lines into chapters.
#[async_trait]
pub trait ChapterEngine: Send + Sync {
    async fn segment_chapters(&self, lines: &[SubtitleLine]) -> EngineResult<Vec<Chapter>>;
}

/// Render collaborator: cut the media per the confirmed edit decisions and
/// return a signed reference to the produced artifact.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    async fn render(
        &self,
        media_ref: &str,
        lines: &[SubtitleLine],
        chapters: &[Chapter],
    ) -> EngineResult<String>;
}
