//! Per-connection pipelines run in parallel: portal collection under a
//! concurrency bound with one retry pass, speed measurement unbounded.

pub mod scrape;
pub mod speed;

pub use scrape::{ScrapeFailure, ScrapeOrchestrator, ScrapeOutcome};
pub use speed::{SpeedOrchestrator, SpeedOutcome};

use thiserror::Error;

/// Faults in the orchestrator itself. Per-connection failures are never
/// reported this way.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("concurrency limit must be at least 1")]
    ZeroConcurrency,

    #[error("concurrency semaphore closed")]
    SemaphoreClosed,
}
