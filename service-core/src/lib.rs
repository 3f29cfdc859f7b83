//! service-core: Shared infrastructure for the line monitor workspace.
pub mod config;
pub mod error;
pub mod observability;
pub mod retry;

pub use axum;
pub use serde;
pub use serde_json;
pub use tokio;
pub use tracing;
pub use validator;
