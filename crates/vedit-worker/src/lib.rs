//! Worker library.
//!
//! The binary wires configuration and the engine clients; the executor and
//! stage runner live here so the lifecycle tests can drive them with fake
//! engines.

pub mod config;
pub mod error;
pub mod executor;
pub mod stages;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::TaskExecutor;
pub use stages::{EngineSet, StageRunner};
