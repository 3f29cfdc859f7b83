use super::{ChannelError, ReportChannel};
use crate::config::WebhookConfig;
use crate::models::ReportFormat;
use crate::services::report::RenderedReport;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;

/// Posts the JSON report to an HTTP endpoint.
pub struct WebhookChannel {
    config: WebhookConfig,
    client: Client,
}

impl WebhookChannel {
    pub fn new(config: WebhookConfig) -> Result<Self, ChannelError> {
        if config.url.is_empty() {
            return Err(ChannelError::Configuration(
                "webhook channel needs a URL".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ChannelError::Configuration(format!("HTTP client setup failed: {e}")))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl ReportChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    fn format(&self) -> ReportFormat {
        ReportFormat::Json
    }

    async fn deliver(&self, report: &RenderedReport) -> Result<(), ChannelError> {
        let response = self
            .client
            .post(&self.config.url)
            .header(CONTENT_TYPE, report.content_type())
            .body(report.body.clone())
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChannelError::Rejected(status.as_u16()));
        }

        tracing::info!(status = status.as_u16(), "Report posted to webhook");
        Ok(())
    }
}
