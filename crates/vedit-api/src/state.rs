//! Application state.

use std::sync::Arc;

use vedit_queue::{QueueConfig, QueueError, TaskQueue};
use vedit_store::{Store, StoreError};

use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ApiConfig>,
    pub store: Arc<Store>,
    pub queue: Arc<TaskQueue>,
}

impl AppState {
    /// Create application state, opening both databases.
    pub fn new(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let store = Store::open(&config.store_db_path)?;
        let queue = TaskQueue::open(QueueConfig::from_env())?;
        Ok(Self {
            config: Arc::new(config),
            store: Arc::new(store),
            queue: Arc::new(queue),
        })
    }

    /// State over pre-built components (tests).
    pub fn with_components(config: ApiConfig, store: Arc<Store>, queue: Arc<TaskQueue>) -> Self {
        Self {
            config: Arc::new(config),
            store,
            queue,
        }
    }

    /// Run a blocking store operation off the async runtime.
    pub async fn with_store<T, F>(&self, f: F) -> ApiResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Store) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| ApiError::internal(format!("store task panicked: {e}")))?
            .map_err(ApiError::from)
    }

    /// Run a blocking queue operation off the async runtime.
    pub async fn with_queue<T, F>(&self, f: F) -> ApiResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&TaskQueue) -> Result<T, QueueError> + Send + 'static,
    {
        let queue = Arc::clone(&self.queue);
        tokio::task::spawn_blocking(move || f(&queue))
            .await
            .map_err(|e| ApiError::internal(format!("queue task panicked: {e}")))?
            .map_err(ApiError::from)
    }
}
