//! Application startup and lifecycle management.
//!
//! Wires the store, vault, collectors, measurement client and delivery
//! pipeline into a [`MonitorCycle`], then either runs it once or on a fixed
//! interval next to a small health/metrics HTTP server.

use crate::config::{ChannelKind, MonitorConfig};
use crate::services::{
    get_metrics, CollectorRegistry, CredentialVault, CycleError, CycleSummary, DeliveryPipeline,
    HttpPortalCollector, JsonFileStore, LocalArtifactStore, MeasurementClient, MonitorCycle,
    ReportChannel, ReportDestination, ScrapeOrchestrator, SmtpChannel, SpeedOrchestrator, Store,
    WebhookChannel,
};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use service_core::error::AppError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tower_http::trace::TraceLayer;

/// Result of the most recent cycle, as shown on `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct CycleStatus {
    pub finished_at: DateTime<Utc>,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CycleStatus {
    fn from_result(result: &Result<CycleSummary, CycleError>) -> Self {
        let (outcome, error) = match result {
            Ok(summary) => match &summary.destination {
                ReportDestination::Delivery(d) if d.is_local() => ("delivered_locally", None),
                ReportDestination::Delivery(_) => ("delivered", None),
                ReportDestination::File(_) => ("written", None),
            },
            Err(e) => ("failed", Some(e.to_string())),
        };
        Self {
            finished_at: Utc::now(),
            outcome: outcome.to_string(),
            error,
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<JsonFileStore>,
    pub last_cycle: Arc<RwLock<Option<CycleStatus>>>,
}

/// Health check endpoint for liveness probes.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let last_cycle = state.last_cycle.read().await.clone();
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": "line-monitor-service",
            "version": env!("CARGO_PKG_VERSION"),
            "last_cycle": last_cycle,
        })),
    )
}

/// Ready once the store answers and holds at least one connection.
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.connections().await {
        Ok(connections) if !connections.is_empty() => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn metrics_endpoint() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_endpoint))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Application container for managing the monitor's lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    cycle: Arc<MonitorCycle>,
    state: AppState,
    interval: Duration,
    run_once: bool,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: MonitorConfig) -> Result<Self, AppError> {
        let vault = Arc::new(CredentialVault::new(&config.store.key_file));
        let store = Arc::new(
            JsonFileStore::open(&config.store.data_file, vault.clone())
                .await
                .map_err(|e| {
                    tracing::error!("Failed to open data store: {}", e);
                    AppError::StorageError(anyhow::Error::new(e))
                })?,
        );

        store
            .import_connections(&config.connections)
            .await
            .map_err(|e| AppError::StorageError(anyhow::Error::new(e)))?;
        store
            .seal_plaintext_credentials()
            .await
            .map_err(|e| AppError::StorageError(anyhow::Error::new(e)))?;

        let mut collectors = CollectorRegistry::new();
        for endpoint in &config.collectors {
            let collector = HttpPortalCollector::new(endpoint.clone())
                .map_err(|e| AppError::ConfigError(anyhow::Error::new(e)))?;
            tracing::info!(provider = %endpoint.provider, "Portal collector registered");
            collectors = collectors.register(Arc::new(collector));
        }
        if collectors.is_empty() && config.execution.mode.includes_quota() {
            tracing::warn!("No portal collectors configured; quota collection will fail");
        }

        let scrape = ScrapeOrchestrator::new(
            vault,
            collectors,
            config.execution.concurrency_limit,
            config.execution.collect_timeout(),
        )
        .with_retry_policy(config.execution.retry_policy());
        let speed = SpeedOrchestrator::new(Arc::new(MeasurementClient::new(
            config.speedtest.clone(),
        )));

        let channel: Arc<dyn ReportChannel> = match config.delivery.channel {
            ChannelKind::Email => Arc::new(
                SmtpChannel::new(config.smtp.clone())
                    .map_err(|e| AppError::ConfigError(anyhow::Error::new(e)))?,
            ),
            ChannelKind::Webhook => Arc::new(
                WebhookChannel::new(config.webhook.clone())
                    .map_err(|e| AppError::ConfigError(anyhow::Error::new(e)))?,
            ),
        };
        tracing::info!(channel = channel.name(), "Delivery channel initialized");

        let delivery = DeliveryPipeline::new(
            channel,
            config.delivery.retry_policy(),
            LocalArtifactStore::new(&config.delivery.fallback_dir),
        );

        let mut cycle = MonitorCycle::new(store.clone(), scrape, speed, delivery)
            .with_mode(config.execution.mode);
        if let Some(output) = &config.report.output {
            cycle = cycle.with_output(output.clone(), config.report.format);
        }

        // Port 0 picks a random port for testing.
        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(
            port,
            interval_secs = config.schedule.interval_secs,
            run_once = config.schedule.run_once,
            "Line monitor built"
        );

        Ok(Self {
            port,
            listener,
            cycle: Arc::new(cycle),
            state: AppState {
                store,
                last_cycle: Arc::new(RwLock::new(None)),
            },
            interval: Duration::from_secs(config.schedule.interval_secs.max(1)),
            run_once: config.schedule.run_once,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run one monitoring cycle and record its status.
    pub async fn run_cycle(&self) -> Result<CycleSummary, CycleError> {
        run_and_record(&self.cycle, &self.state).await
    }

    /// Run the application until stopped.
    ///
    /// In run-once mode a single cycle runs and its error, if any, is
    /// returned. Otherwise cycles run on the configured interval next to the
    /// HTTP server until a shutdown signal arrives.
    pub async fn run_until_stopped(self) -> Result<(), AppError> {
        if self.run_once {
            return self
                .run_cycle()
                .await
                .map(|_| ())
                .map_err(|e| AppError::InternalError(anyhow::Error::new(e)));
        }

        let scheduler = {
            let cycle = self.cycle.clone();
            let state = self.state.clone();
            let interval = self.interval;
            async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    // Failures are logged and surfaced on /health; the next tick retries.
                    let _ = run_and_record(&cycle, &state).await;
                }
            }
        };

        let app = router(self.state);
        let listener = self.listener;
        let server = async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
        };

        tokio::select! {
            result = server => {
                if let Err(e) = result {
                    tracing::error!("HTTP server error: {}", e);
                    return Err(AppError::from(e));
                }
            }
            _ = scheduler => {}
        }

        tracing::info!("Line monitor stopped");
        Ok(())
    }
}

async fn run_and_record(
    cycle: &MonitorCycle,
    state: &AppState,
) -> Result<CycleSummary, CycleError> {
    let result = cycle.run().await;
    *state.last_cycle.write().await = Some(CycleStatus::from_result(&result));
    result
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
