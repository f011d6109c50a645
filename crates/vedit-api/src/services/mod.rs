//! Request-level orchestration services shared by the handlers.

pub mod orchestrate;
pub mod profile;
