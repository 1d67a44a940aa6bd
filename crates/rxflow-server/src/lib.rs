//! HTTP surface of rxflow.
//!
//! An axum router over the `rxflow-core` services, a background processor
//! that keeps model calls off the database lock, and a maintenance loop.

pub mod config;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod maintenance;
pub mod processing;
pub mod router;
pub mod state;

pub use config::{Config, ProcessingMode};
pub use error::{ApiError, ApiResult};
pub use router::build_router;
pub use state::AppState;
