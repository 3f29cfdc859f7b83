use crate::models::{CheckMode, ConnectionId, MeasurementResult, QuotaSnapshot, ReportFormat};
use crate::services::delivery::{DeliveryError, DeliveryOutcome, DeliveryPipeline};
use crate::services::metrics;
use crate::services::orchestrator::{
    OrchestratorError, ScrapeOrchestrator, ScrapeOutcome, SpeedOrchestrator, SpeedOutcome,
};
use crate::services::report::{aggregate, render, ReportError};
use crate::services::store::{Store, StoreError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("no connections configured")]
    NoConnections,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("Report error: {0}")]
    Report(ReportError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Failed to write report to {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<ReportError> for CycleError {
    fn from(err: ReportError) -> Self {
        match err {
            ReportError::NoConnections => CycleError::NoConnections,
            other => CycleError::Report(other),
        }
    }
}

/// Where the cycle's report ended up.
#[derive(Debug)]
pub enum ReportDestination {
    Delivery(DeliveryOutcome),
    File(PathBuf),
}

#[derive(Debug)]
pub struct CycleSummary {
    pub connections: usize,
    pub collected: usize,
    pub collection_failures: usize,
    pub measured: usize,
    pub measurement_failures: usize,
    pub destination: ReportDestination,
}

/// One monitoring run: collect and measure every connection in parallel,
/// record the results, then report on the latest figures.
pub struct MonitorCycle {
    store: Arc<dyn Store>,
    scrape: ScrapeOrchestrator,
    speed: SpeedOrchestrator,
    delivery: DeliveryPipeline,
    mode: CheckMode,
    output: Option<(PathBuf, ReportFormat)>,
}

impl MonitorCycle {
    pub fn new(
        store: Arc<dyn Store>,
        scrape: ScrapeOrchestrator,
        speed: SpeedOrchestrator,
        delivery: DeliveryPipeline,
    ) -> Self {
        Self {
            store,
            scrape,
            speed,
            delivery,
            mode: CheckMode::Full,
            output: None,
        }
    }

    pub fn with_mode(mut self, mode: CheckMode) -> Self {
        self.mode = mode;
        self
    }

    /// Write the report to `path` instead of delivering it.
    pub fn with_output(mut self, path: PathBuf, format: ReportFormat) -> Self {
        self.output = Some((path, format));
        self
    }

    #[instrument(skip(self), fields(mode = %self.mode))]
    pub async fn run(&self) -> Result<CycleSummary, CycleError> {
        let started = Instant::now();
        let result = self.run_inner().await;

        let outcome = match &result {
            Ok(summary) => match &summary.destination {
                ReportDestination::Delivery(d) if d.is_local() => "local",
                ReportDestination::Delivery(_) => "delivered",
                ReportDestination::File(_) => "file",
            },
            Err(_) => "failed",
        };
        metrics::record_cycle(outcome, started.elapsed());

        match &result {
            Ok(summary) => info!(
                connections = summary.connections,
                collected = summary.collected,
                measured = summary.measured,
                outcome,
                duration_ms = started.elapsed().as_millis() as u64,
                "Monitoring cycle finished"
            ),
            Err(e) => error!(error = %e, "Monitoring cycle failed"),
        }
        result
    }

    async fn run_inner(&self) -> Result<CycleSummary, CycleError> {
        let connections = self.store.connections().await?;
        if connections.is_empty() {
            return Err(CycleError::NoConnections);
        }
        info!(connections = connections.len(), "Monitoring cycle started");

        let collect = async {
            if self.mode.includes_quota() {
                self.scrape.run(&connections).await
            } else {
                Ok(Vec::new())
            }
        };
        let measure = async {
            if self.mode.includes_speed() {
                self.speed.run(&connections).await
            } else {
                Vec::new()
            }
        };
        let (scrape_outcomes, speed_outcomes) = tokio::join!(collect, measure);
        let scrape_outcomes = scrape_outcomes?;

        let (snapshots, measurements) = self.record(scrape_outcomes, speed_outcomes).await;

        let report = aggregate(
            &connections,
            &snapshots.latest,
            &measurements.latest,
            self.mode,
        )?;

        let destination = match &self.output {
            Some((path, format)) => {
                let rendered = render(&report, *format)?;
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|source| CycleError::Output {
                            path: path.clone(),
                            source,
                        })?;
                }
                tokio::fs::write(path, rendered.body.as_bytes())
                    .await
                    .map_err(|source| CycleError::Output {
                        path: path.clone(),
                        source,
                    })?;
                info!(path = %path.display(), format = %format, "Report written");
                ReportDestination::File(path.clone())
            }
            None => ReportDestination::Delivery(self.delivery.deliver(&report).await?),
        };

        Ok(CycleSummary {
            connections: connections.len(),
            collected: snapshots.fresh,
            collection_failures: snapshots.failed,
            measured: measurements.fresh,
            measurement_failures: measurements.failed,
            destination,
        })
    }

    /// Append this cycle's results and return the latest figures per
    /// connection. A failed append is logged; the fresh value still makes it
    /// into this cycle's report.
    async fn record(
        &self,
        scrape_outcomes: Vec<ScrapeOutcome>,
        speed_outcomes: Vec<SpeedOutcome>,
    ) -> (Latest<QuotaSnapshot>, Latest<MeasurementResult>) {
        let mut snapshots = Latest::new(self.store.latest_snapshots().await.unwrap_or_else(|e| {
            warn!(error = %e, "Could not read previous snapshots");
            HashMap::new()
        }));
        let mut measurements =
            Latest::new(self.store.latest_measurements().await.unwrap_or_else(|e| {
                warn!(error = %e, "Could not read previous measurements");
                HashMap::new()
            }));

        for outcome in scrape_outcomes {
            match outcome.result {
                Ok(snapshot) => {
                    if let Err(e) = self.store.append_snapshot(snapshot.clone()).await {
                        warn!(connection_id = outcome.connection_id, error = %e, "Failed to store snapshot");
                    }
                    snapshots.insert_fresh(outcome.connection_id, snapshot);
                }
                Err(_) => snapshots.failed += 1,
            }
        }

        for outcome in speed_outcomes {
            match outcome.result {
                Ok(result) => {
                    if let Err(e) = self.store.append_measurement(result.clone()).await {
                        warn!(connection_id = outcome.connection_id, error = %e, "Failed to store measurement");
                    }
                    measurements.insert_fresh(outcome.connection_id, result);
                }
                Err(_) => measurements.failed += 1,
            }
        }

        (snapshots, measurements)
    }
}

struct Latest<T> {
    latest: HashMap<ConnectionId, T>,
    fresh: usize,
    failed: usize,
}

impl<T> Latest<T> {
    fn new(latest: HashMap<ConnectionId, T>) -> Self {
        Self {
            latest,
            fresh: 0,
            failed: 0,
        }
    }

    fn insert_fresh(&mut self, id: ConnectionId, value: T) {
        self.latest.insert(id, value);
        self.fresh += 1;
    }
}
