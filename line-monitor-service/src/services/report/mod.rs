//! Report assembly: joining connections with their latest figures, then
//! rendering the rows for a delivery channel or a file.

pub mod aggregate;
pub mod render;

pub use aggregate::aggregate;
pub use render::{render, RenderedReport};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("no connections configured")]
    NoConnections,

    #[error("failed to serialise report: {0}")]
    Serialization(#[from] serde_json::Error),
}
