use super::{CollectorError, PortalCollector};
use crate::models::{Connection, ConnectionId, QuotaSnapshot};
use crate::services::vault::PortalCredentials;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Mock portal collector for testing and dry runs.
///
/// Succeeds with a synthetic snapshot unless a connection was scripted to
/// fail, and records how many calls were in flight at once.
pub struct MockPortalCollector {
    provider: String,
    delay: Duration,
    failures: Mutex<HashMap<ConnectionId, u32>>,
    calls: Mutex<HashMap<ConnectionId, u32>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockPortalCollector {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            delay: Duration::ZERO,
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Time each collection takes.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the next `times` collections for `connection_id`.
    pub fn failing(self, connection_id: ConnectionId, times: u32) -> Self {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(connection_id, times);
        self
    }

    pub fn call_count(&self, connection_id: ConnectionId) -> u32 {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&connection_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .sum()
    }

    /// Highest number of simultaneous collections observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PortalCollector for MockPortalCollector {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn collect(
        &self,
        credentials: &PortalCredentials,
        connection: &Connection,
    ) -> Result<QuotaSnapshot, CollectorError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        *self
            .calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(connection.id)
            .or_default() += 1;

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let should_fail = {
            let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
            match failures.get_mut(&connection.id) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };

        tracing::info!(
            connection = %connection,
            user = %credentials.username,
            failed = should_fail,
            "[MOCK] Portal collection"
        );

        if should_fail {
            return Err(CollectorError::Unavailable(format!(
                "scripted failure for {connection}"
            )));
        }

        let used = connection.id as f64 * 10.0;
        Ok(QuotaSnapshot::new(connection.id, used, 100.0).with_balance(50.0))
    }
}
