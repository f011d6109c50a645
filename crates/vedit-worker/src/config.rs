//! Worker configuration.

use std::time::Duration;

use vedit_models::Stage;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent tasks
    pub max_concurrent_tasks: usize,
    /// Poll interval when the queue is empty
    pub poll_interval: Duration,
    /// Lease renewal interval while a task runs
    pub heartbeat_interval: Duration,
    /// Wall-clock budget for a suggestion run
    pub stage1_timeout: Duration,
    /// Wall-clock budget for a chapter run
    pub stage2_timeout: Duration,
    /// Wall-clock budget for a render
    pub render_timeout: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 2,
            poll_interval: Duration::from_millis(500),
            heartbeat_interval: Duration::from_secs(30),
            stage1_timeout: Duration::from_secs(900),
            stage2_timeout: Duration::from_secs(300),
            render_timeout: Duration::from_secs(1800),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_tasks: env_parse("WORKER_MAX_TASKS")
                .unwrap_or(defaults.max_concurrent_tasks),
            poll_interval: env_parse("WORKER_POLL_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            heartbeat_interval: env_parse("WORKER_HEARTBEAT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.heartbeat_interval),
            stage1_timeout: env_parse("WORKER_STAGE1_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.stage1_timeout),
            stage2_timeout: env_parse("WORKER_STAGE2_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.stage2_timeout),
            render_timeout: env_parse("WORKER_RENDER_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.render_timeout),
            shutdown_timeout: env_parse("WORKER_SHUTDOWN_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
        }
    }

    /// Wall-clock budget for one attempt of a stage.
    pub fn stage_timeout(&self, stage: Stage) -> Duration {
        match stage {
            Stage::Suggestion => self.stage1_timeout,
            Stage::Chapters => self.stage2_timeout,
            Stage::Render => self.render_timeout,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
