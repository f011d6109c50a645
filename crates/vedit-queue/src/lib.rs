//! Durable task queue for stage work.
//!
//! Backed by its own SQLite file, separate from the orchestration store.
//! At most one live task per job, at-least-once delivery under worker
//! leases, and bounded retries with exponential backoff.

mod error;
mod queue;

pub use error::{QueueError, QueueResult};
pub use queue::{FailOutcome, QueueConfig, QueueCounts, TaskQueue};
