//! API request handlers.

pub mod credits;
pub mod health;
pub mod jobs;
pub mod stages;

pub use health::{health, ready};
