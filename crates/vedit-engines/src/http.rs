//! HTTP implementations of the engine traits.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info};

use vedit_models::{Chapter, SubtitleLine};

use crate::error::{EngineError, EngineResult};
use crate::{ChapterEngine, RenderEngine, SuggestionEngine};

/// Engine endpoint configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL of the suggestion (ASR + line optimization) service
    pub suggestion_url: String,
    /// Base URL of the chapter segmentation service
    pub chapter_url: String,
    /// Base URL of the render service
    pub render_url: String,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            suggestion_url: "http://localhost:8081".to_string(),
            chapter_url: "http://localhost:8082".to_string(),
            render_url: "http://localhost:8083".to_string(),
            request_timeout: Duration::from_secs(300),
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            suggestion_url: std::env::var("ENGINE_SUGGESTION_URL")
                .unwrap_or(defaults.suggestion_url),
            chapter_url: std::env::var("ENGINE_CHAPTER_URL").unwrap_or(defaults.chapter_url),
            render_url: std::env::var("ENGINE_RENDER_URL").unwrap_or(defaults.render_url),
            request_timeout: std::env::var("ENGINE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
        }
    }
}

/// One reqwest client shared by all three engines.
pub struct HttpEngines {
    client: Client,
    config: EngineConfig,
}

#[derive(Debug, Serialize)]
struct SuggestRequest<'a> {
    media_ref: &'a str,
}

#[derive(Debug, Deserialize)]
struct SuggestResponse {
    lines: Vec<SubtitleLine>,
}

#[derive(Debug, Serialize)]
struct ChapterRequest<'a> {
    lines: &'a [SubtitleLine],
}

#[derive(Debug, Deserialize)]
struct ChapterResponse {
    chapters: Vec<Chapter>,
}

#[derive(Debug, Serialize)]
struct RenderRequest<'a> {
    media_ref: &'a str,
    lines: &'a [SubtitleLine],
    chapters: &'a [Chapter],
}

#[derive(Debug, Deserialize)]
struct RenderResponse {
    artifact_ref: String,
}

impl HttpEngines {
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> EngineResult<Self> {
        Self::new(EngineConfig::from_env())
    }

    async fn post_json<B: Serialize, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> EngineResult<R> {
        debug!(url, "engine request");
        let response = self.client.post(url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let message = format!("{url} returned {status}: {detail}");
            return Err(if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                EngineError::Transient(message)
            } else {
                EngineError::Permanent(message)
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl SuggestionEngine for HttpEngines {
    async fn transcribe_and_suggest(&self, media_ref: &str) -> EngineResult<Vec<SubtitleLine>> {
        let url = format!("{}/v1/suggest", self.config.suggestion_url);
        let response: SuggestResponse =
            self.post_json(&url, &SuggestRequest { media_ref }).await?;
        info!(lines = response.lines.len(), "suggestion engine responded");
        Ok(response.lines)
    }
}

#[async_trait]
impl ChapterEngine for HttpEngines {
    async fn segment_chapters(&self, lines: &[SubtitleLine]) -> EngineResult<Vec<Chapter>> {
        let url = format!("{}/v1/chapters", self.config.chapter_url);
        let response: ChapterResponse = self.post_json(&url, &ChapterRequest { lines }).await?;
        info!(chapters = response.chapters.len(), "chapter engine responded");
        Ok(response.chapters)
    }
}

#[async_trait]
impl RenderEngine for HttpEngines {
    async fn render(
        &self,
        media_ref: &str,
        lines: &[SubtitleLine],
        chapters: &[Chapter],
    ) -> EngineResult<String> {
        let url = format!("{}/v1/render", self.config.render_url);
        let response: RenderResponse = self
            .post_json(
                &url,
                &RenderRequest {
                    media_ref,
                    lines,
                    chapters,
                },
            )
            .await?;
        info!(artifact_ref = %response.artifact_ref, "render engine responded");
        Ok(response.artifact_ref)
    }
}
