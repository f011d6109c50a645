//! Queue error types.

use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The job already has a PENDING or CLAIMED task.
    #[error("job already has a live task")]
    DuplicateTask,

    #[error("task not found: {0}")]
    NotFound(i64),

    /// The caller's lease is gone (expired and reclaimed, or finished).
    #[error("lease lost for task {0}")]
    LeaseLost(i64),

    #[error("sqlite error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
