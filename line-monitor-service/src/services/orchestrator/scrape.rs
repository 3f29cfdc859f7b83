use super::OrchestratorError;
use crate::models::{Connection, ConnectionId, QuotaSnapshot};
use crate::services::collectors::{CollectorRegistry, PortalCollector};
use crate::services::metrics;
use crate::services::vault::CredentialVault;
use service_core::retry::RetryPolicy;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone, Error)]
pub enum ScrapeFailure {
    #[error("credentials could not be decrypted: {0}")]
    Credentials(String),

    #[error("no collector registered for provider '{0}'")]
    NoCollector(String),

    #[error("collection timed out after {0:?}")]
    TimedOut(Duration),

    #[error("collection failed: {0}")]
    Collector(String),

    #[error("collection task aborted: {0}")]
    Aborted(String),
}

impl ScrapeFailure {
    fn label(&self) -> &'static str {
        match self {
            ScrapeFailure::Credentials(_) => "credentials",
            ScrapeFailure::NoCollector(_) => "no_collector",
            ScrapeFailure::TimedOut(_) => "timeout",
            ScrapeFailure::Collector(_) => "failure",
            ScrapeFailure::Aborted(_) => "aborted",
        }
    }
}

/// Final result for one connection after every pass.
#[derive(Debug, Clone)]
pub struct ScrapeOutcome {
    pub connection_id: ConnectionId,
    /// Passes this connection took part in.
    pub passes: u32,
    pub result: Result<QuotaSnapshot, ScrapeFailure>,
}

impl ScrapeOutcome {
    pub fn snapshot(&self) -> Option<&QuotaSnapshot> {
        self.result.as_ref().ok()
    }
}

/// Runs portal collectors for a batch of connections.
///
/// At most `concurrency_limit` collections are in flight. After the first
/// pass settles, every connection that failed gets exactly one more pass
/// under the same limit, whatever the reason it failed.
pub struct ScrapeOrchestrator {
    vault: Arc<CredentialVault>,
    collectors: CollectorRegistry,
    concurrency_limit: usize,
    collect_timeout: Duration,
    retry: RetryPolicy,
}

impl ScrapeOrchestrator {
    pub fn new(
        vault: Arc<CredentialVault>,
        collectors: CollectorRegistry,
        concurrency_limit: usize,
        collect_timeout: Duration,
    ) -> Self {
        Self {
            vault,
            collectors,
            concurrency_limit,
            collect_timeout,
            retry: RetryPolicy::single_retry(Duration::ZERO),
        }
    }

    /// Pass count and inter-pass delay. `max_attempts` is the number of passes.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// One outcome per input connection, in input order.
    #[instrument(skip_all, fields(connections = connections.len(), limit = self.concurrency_limit))]
    pub async fn run(
        &self,
        connections: &[Connection],
    ) -> Result<Vec<ScrapeOutcome>, OrchestratorError> {
        if self.concurrency_limit == 0 {
            return Err(OrchestratorError::ZeroConcurrency);
        }
        let semaphore = Arc::new(Semaphore::new(self.concurrency_limit));

        let mut outcomes: Vec<Option<ScrapeOutcome>> = vec![None; connections.len()];
        let mut pending: Vec<usize> = (0..connections.len()).collect();

        for pass in 1..=self.retry.attempts() {
            if pass > 1 {
                pending.retain(|&idx| {
                    matches!(&outcomes[idx], Some(ScrapeOutcome { result: Err(_), .. }))
                });
                if pending.is_empty() {
                    break;
                }
                let delay = self.retry.delay_after(pass - 1);
                info!(
                    pass,
                    retrying = pending.len(),
                    delay_ms = delay.as_millis() as u64,
                    "Retrying failed collections"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }

            let results = self.run_pass(&semaphore, connections, &pending).await?;
            for (idx, result) in results {
                outcomes[idx] = Some(ScrapeOutcome {
                    connection_id: connections[idx].id,
                    passes: pass,
                    result,
                });
            }
        }

        let outcomes: Vec<ScrapeOutcome> = outcomes.into_iter().flatten().collect();
        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        info!(
            succeeded = outcomes.len() - failed,
            failed, "Collection batch finished"
        );
        for outcome in &outcomes {
            let label = match &outcome.result {
                Ok(_) => "success",
                Err(e) => e.label(),
            };
            metrics::record_collection(provider_of(connections, outcome.connection_id), label);
        }
        Ok(outcomes)
    }

    async fn run_pass(
        &self,
        semaphore: &Arc<Semaphore>,
        connections: &[Connection],
        indices: &[usize],
    ) -> Result<Vec<(usize, Result<QuotaSnapshot, ScrapeFailure>)>, OrchestratorError> {
        let mut handles: Vec<(usize, JoinHandle<Result<QuotaSnapshot, ScrapeFailure>>)> =
            Vec::with_capacity(indices.len());

        for &idx in indices {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| OrchestratorError::SemaphoreClosed)?;

            let connection = connections[idx].clone();
            let collector = self.collectors.get(&connection.provider);
            let vault = self.vault.clone();
            let timeout = self.collect_timeout;

            handles.push((
                idx,
                tokio::spawn(async move {
                    let _permit = permit;
                    collect_one(&vault, collector, &connection, timeout).await
                }),
            ));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (idx, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(ScrapeFailure::Aborted(e.to_string())),
            };
            if let Err(e) = &result {
                warn!(connection = %connections[idx], error = %e, "Collection failed");
            }
            results.push((idx, result));
        }
        Ok(results)
    }
}

async fn collect_one(
    vault: &CredentialVault,
    collector: Option<Arc<dyn PortalCollector>>,
    connection: &Connection,
    timeout: Duration,
) -> Result<QuotaSnapshot, ScrapeFailure> {
    let collector =
        collector.ok_or_else(|| ScrapeFailure::NoCollector(connection.provider.clone()))?;
    let credentials = vault
        .open_credentials(&connection.credentials)
        .map_err(|e| ScrapeFailure::Credentials(e.to_string()))?;

    match tokio::time::timeout(timeout, collector.collect(&credentials, connection)).await {
        Ok(Ok(snapshot)) => {
            info!(connection = %connection, usage = snapshot.usage_percentage, "Quota collected");
            Ok(snapshot)
        }
        Ok(Err(e)) => Err(ScrapeFailure::Collector(e.to_string())),
        Err(_) => Err(ScrapeFailure::TimedOut(timeout)),
    }
}

fn provider_of(connections: &[Connection], id: ConnectionId) -> &str {
    connections
        .iter()
        .find(|c| c.id == id)
        .map_or("unknown", |c| c.provider.as_str())
}
