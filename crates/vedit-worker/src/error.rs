//! Worker error types.

use thiserror::Error;

use vedit_engines::EngineError;
use vedit_queue::QueueError;
use vedit_store::StoreError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Engine failure: {0}")]
    Engine(#[from] EngineError),

    #[error("Stage attempt exceeded its wall-clock budget")]
    Timeout,

    #[error("Engine produced unusable output: {0}")]
    BadOutput(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl WorkerError {
    pub fn bad_output(msg: impl Into<String>) -> Self {
        Self::BadOutput(msg.into())
    }

    /// Whether another attempt of the same task may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            WorkerError::Engine(err) => err.is_transient(),
            WorkerError::Timeout => true,
            WorkerError::BadOutput(_) => false,
            // Store and queue failures are local infrastructure trouble;
            // retrying the attempt is the right default.
            WorkerError::Store(err) => !matches!(err, StoreError::InvalidState { .. }),
            WorkerError::Queue(_) => true,
        }
    }
}
