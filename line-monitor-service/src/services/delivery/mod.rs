//! Report delivery: a primary channel tried with exponential backoff, and a
//! local artifact when every attempt fails.

pub mod email;
pub mod local;
pub mod mock;
pub mod pipeline;
pub mod webhook;

pub use email::SmtpChannel;
pub use local::LocalArtifactStore;
pub use mock::MockReportChannel;
pub use pipeline::DeliveryPipeline;
pub use webhook::WebhookChannel;

use crate::models::ReportFormat;
use crate::services::report::{RenderedReport, ReportError};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Rejected with status {0}")]
    Rejected(u16),
}

#[async_trait]
pub trait ReportChannel: Send + Sync {
    fn name(&self) -> &str;

    /// Rendering this channel consumes.
    fn format(&self) -> ReportFormat;

    async fn deliver(&self, report: &RenderedReport) -> Result<(), ChannelError>;
}

/// One try against the primary channel. Lives only for the current run.
#[derive(Debug, Clone)]
pub struct DeliveryAttempt {
    pub channel: String,
    pub attempt: u32,
    pub latency: Duration,
    pub error: Option<String>,
}

impl DeliveryAttempt {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug)]
pub enum DeliveryOutcome {
    Delivered {
        channel: String,
        attempts: Vec<DeliveryAttempt>,
    },
    /// The channel never accepted the report; it was written locally instead.
    DeliveredLocally {
        path: PathBuf,
        last_error: String,
        attempts: Vec<DeliveryAttempt>,
    },
}

impl DeliveryOutcome {
    pub fn attempts(&self) -> &[DeliveryAttempt] {
        match self {
            DeliveryOutcome::Delivered { attempts, .. }
            | DeliveryOutcome::DeliveredLocally { attempts, .. } => attempts,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, DeliveryOutcome::DeliveredLocally { .. })
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Failed to render report: {0}")]
    Render(#[from] ReportError),

    #[error("Local fallback failed after {attempts} delivery attempts: {source}")]
    FallbackFailed {
        attempts: usize,
        #[source]
        source: std::io::Error,
    },
}
