use crate::models::{Connection, ConnectionId, MeasurementResult};
use crate::services::metrics;
use crate::services::speedtest::{MeasurementError, Measurer};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

#[derive(Debug)]
pub struct SpeedOutcome {
    pub connection_id: ConnectionId,
    pub result: Result<MeasurementResult, MeasurementError>,
}

/// Measures every connection at once. Failures stay with their connection
/// and are not retried; a failed line simply has no result this cycle.
pub struct SpeedOrchestrator {
    measurer: Arc<dyn Measurer>,
}

impl SpeedOrchestrator {
    pub fn new(measurer: Arc<dyn Measurer>) -> Self {
        Self { measurer }
    }

    /// One outcome per input connection, in input order.
    #[instrument(skip_all, fields(connections = connections.len()))]
    pub async fn run(&self, connections: &[Connection]) -> Vec<SpeedOutcome> {
        let handles: Vec<_> = connections
            .iter()
            .cloned()
            .map(|connection| {
                let measurer = self.measurer.clone();
                tokio::spawn(async move {
                    let started = Instant::now();
                    let result = measurer.measure(&connection).await;
                    let outcome = if result.is_ok() { "success" } else { "failure" };
                    metrics::record_measurement(outcome, started.elapsed());
                    result
                })
            })
            .collect();

        let mut outcomes = Vec::with_capacity(connections.len());
        for (connection, handle) in connections.iter().zip(handles) {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(MeasurementError::Aborted(e.to_string())),
            };
            if let Err(e) = &result {
                warn!(connection = %connection, error = %e, "Speed measurement failed");
            }
            outcomes.push(SpeedOutcome {
                connection_id: connection.id,
                result,
            });
        }

        let measured = outcomes.iter().filter(|o| o.result.is_ok()).count();
        info!(
            measured,
            failed = outcomes.len() - measured,
            "Speed measurements finished"
        );
        outcomes
    }
}
