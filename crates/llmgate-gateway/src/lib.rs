//! llmgate — request gatekeeper pipeline for LLM provider calls.
//!
//! Re-exports the pipeline types and handlers so integration tests and
//! embedding services can construct a gateway router programmatically.

pub mod auth;
pub mod pipeline;
pub mod policy;
pub mod provider;
pub mod rate_limit;
pub mod validate;

// Re-export key types for convenience
pub use pipeline::{build_app_state, build_router, AppState};
pub use rate_limit::RateLimiter;
