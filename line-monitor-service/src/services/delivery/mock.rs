use super::{ChannelError, ReportChannel};
use crate::models::ReportFormat;
use crate::services::report::RenderedReport;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use tokio::time::Instant;

/// Mock delivery channel for testing and dry runs.
pub struct MockReportChannel {
    format: ReportFormat,
    failures_left: AtomicU32,
    attempts: Mutex<Vec<Instant>>,
    delivered: Mutex<Vec<String>>,
}

impl MockReportChannel {
    pub fn new(format: ReportFormat) -> Self {
        Self {
            format,
            failures_left: AtomicU32::new(0),
            attempts: Mutex::new(Vec::new()),
            delivered: Mutex::new(Vec::new()),
        }
    }

    /// Fail the next `times` deliveries.
    pub fn failing(self, times: u32) -> Self {
        self.failures_left.store(times, Ordering::SeqCst);
        self
    }

    pub fn always_failing(format: ReportFormat) -> Self {
        Self::new(format).failing(u32::MAX)
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// When each attempt started, on the tokio clock.
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Bodies that were accepted.
    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ReportChannel for MockReportChannel {
    fn name(&self) -> &str {
        "mock"
    }

    fn format(&self) -> ReportFormat {
        self.format
    }

    async fn deliver(&self, report: &RenderedReport) -> Result<(), ChannelError> {
        self.attempts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Instant::now());

        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(ChannelError::SendFailed("[MOCK] channel unavailable".to_string()));
        }

        self.delivered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(report.body.clone());
        tracing::info!(bytes = report.body.len(), "[MOCK] Report would be delivered");
        Ok(())
    }
}
