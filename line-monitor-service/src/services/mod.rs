pub mod collectors;
pub mod cycle;
pub mod delivery;
pub mod metrics;
pub mod orchestrator;
pub mod report;
pub mod speedtest;
pub mod store;
pub mod vault;

pub use collectors::{
    CollectorError, CollectorRegistry, HttpPortalCollector, MockPortalCollector, PortalCollector,
};
pub use cycle::{CycleError, CycleSummary, MonitorCycle, ReportDestination};
pub use delivery::{
    ChannelError, DeliveryAttempt, DeliveryError, DeliveryOutcome, DeliveryPipeline,
    LocalArtifactStore, MockReportChannel, ReportChannel, SmtpChannel, WebhookChannel,
};
pub use metrics::{get_metrics, init_metrics};
pub use orchestrator::{
    OrchestratorError, ScrapeFailure, ScrapeOrchestrator, ScrapeOutcome, SpeedOrchestrator,
    SpeedOutcome,
};
pub use report::{aggregate, render, RenderedReport, ReportError};
pub use speedtest::{MeasurementClient, MeasurementError, Measurer};
pub use store::{JsonFileStore, Store, StoreError};
pub use vault::{CredentialVault, PortalCredentials, VaultError};
