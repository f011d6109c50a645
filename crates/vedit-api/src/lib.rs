//! API server library.
//!
//! The binary in `main.rs` wires configuration, state and the router;
//! everything else lives here so integration tests can drive the router
//! in-process.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
