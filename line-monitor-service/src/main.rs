use line_monitor_service::config::MonitorConfig;
use line_monitor_service::services::init_metrics;
use line_monitor_service::startup::Application;
use service_core::observability::init_tracing;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = MonitorConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    init_tracing(
        "line-monitor-service",
        &config.common.log_level,
        config.common.otlp_endpoint.as_deref(),
    );

    if let Err(e) = init_metrics() {
        tracing::warn!("Metrics disabled: {}", e);
    }

    let app = Application::build(config).await.map_err(|e| {
        tracing::error!("Failed to build application: {}", e);
        std::io::Error::other(e.to_string())
    })?;

    app.run_until_stopped().await.map_err(|e| {
        tracing::error!("Line monitor exited with error: {}", e);
        std::io::Error::other(e.to_string())
    })
}
