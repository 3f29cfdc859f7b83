use super::{
    DeliveryAttempt, DeliveryError, DeliveryOutcome, LocalArtifactStore, ReportChannel,
};
use crate::models::Report;
use crate::services::metrics;
use crate::services::report::{render, RenderedReport};
use service_core::retry::{retry_with_backoff, AttemptRecord, RetryPolicy};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Delivers a report through the primary channel, falling back to a local
/// file once the retry budget is spent. Every channel error consumes an
/// attempt; there is no early exit for permanent failures.
pub struct DeliveryPipeline {
    channel: Arc<dyn ReportChannel>,
    retry: RetryPolicy,
    fallback: LocalArtifactStore,
}

impl DeliveryPipeline {
    pub fn new(
        channel: Arc<dyn ReportChannel>,
        retry: RetryPolicy,
        fallback: LocalArtifactStore,
    ) -> Self {
        Self {
            channel,
            retry,
            fallback,
        }
    }

    pub fn channel_name(&self) -> &str {
        self.channel.name()
    }

    pub async fn deliver(&self, report: &Report) -> Result<DeliveryOutcome, DeliveryError> {
        let rendered = render(report, self.channel.format())?;
        self.deliver_rendered(&rendered).await
    }

    /// Deliver an already rendered report; the same rendering is what lands
    /// on disk if the channel never accepts it.
    pub async fn deliver_rendered(
        &self,
        rendered: &RenderedReport,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let channel = &self.channel;
        let name = channel.name().to_string();

        let result = retry_with_backoff(&self.retry, "report_delivery", move |_| async move {
            let result = channel.deliver(rendered).await;
            metrics::record_delivery_attempt(channel.name(), result.is_ok());
            result
        })
        .await;

        match result {
            Ok(delivered) => {
                let attempts = to_attempts(&name, delivered.attempts);
                info!(channel = %name, attempts = attempts.len(), "Report delivered");
                Ok(DeliveryOutcome::Delivered {
                    channel: name,
                    attempts,
                })
            }
            Err(exhausted) => {
                let attempts = to_attempts(&name, exhausted.attempts);
                warn!(
                    channel = %name,
                    attempts = attempts.len(),
                    error = %exhausted.last_error,
                    "Delivery attempts exhausted, saving report locally"
                );

                let path = self.fallback.persist(rendered).await.map_err(|source| {
                    error!(error = %source, "Local report fallback failed");
                    DeliveryError::FallbackFailed {
                        attempts: attempts.len(),
                        source,
                    }
                })?;

                Ok(DeliveryOutcome::DeliveredLocally {
                    path,
                    last_error: exhausted.last_error.to_string(),
                    attempts,
                })
            }
        }
    }
}

fn to_attempts(channel: &str, records: Vec<AttemptRecord>) -> Vec<DeliveryAttempt> {
    records
        .into_iter()
        .map(|record| DeliveryAttempt {
            channel: channel.to_string(),
            attempt: record.attempt,
            latency: record.latency,
            error: record.error,
        })
        .collect()
}
