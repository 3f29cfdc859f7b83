use super::{CollectorError, PortalCollector};
use crate::config::CollectorEndpointConfig;
use crate::models::{Connection, QuotaSnapshot};
use crate::services::vault::PortalCredentials;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

/// Collector backed by an external scraping service.
///
/// The service receives the line's login as JSON and answers with the quota
/// figures it read from the provider portal.
pub struct HttpPortalCollector {
    config: CollectorEndpointConfig,
    client: Client,
}

#[derive(Serialize)]
struct CollectRequest<'a> {
    line_number: &'a str,
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct CollectResponse {
    used: f64,
    remaining: f64,
    #[serde(default)]
    balance: Option<f64>,
    #[serde(default)]
    renewal_date: Option<NaiveDate>,
    #[serde(default)]
    renewal_cost: Option<f64>,
    #[serde(default)]
    days_to_renewal: Option<i64>,
}

impl HttpPortalCollector {
    pub fn new(config: CollectorEndpointConfig) -> Result<Self, CollectorError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| CollectorError::Unavailable(format!("HTTP client setup failed: {e}")))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl PortalCollector for HttpPortalCollector {
    fn provider(&self) -> &str {
        &self.config.provider
    }

    async fn collect(
        &self,
        credentials: &PortalCredentials,
        connection: &Connection,
    ) -> Result<QuotaSnapshot, CollectorError> {
        let request = CollectRequest {
            line_number: &connection.line_number,
            username: &credentials.username,
            password: credentials.password.expose_secret(),
        };

        let response = self
            .client
            .post(&self.config.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| CollectorError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(CollectorError::LoginRejected(format!(
                "{} answered {status}",
                self.config.provider
            )));
        }
        if !status.is_success() {
            return Err(CollectorError::Unavailable(format!(
                "{} answered {status}",
                self.config.provider
            )));
        }

        let body: CollectResponse = response
            .json()
            .await
            .map_err(|e| CollectorError::InvalidResponse(e.to_string()))?;

        let mut snapshot = QuotaSnapshot::new(connection.id, body.used, body.remaining);
        if let Some(balance) = body.balance {
            snapshot = snapshot.with_balance(balance);
        }
        if let Some(date) = body.renewal_date {
            snapshot = snapshot.with_renewal(date, body.renewal_cost);
        } else {
            snapshot.renewal_cost = body.renewal_cost;
        }
        if let Some(days) = body.days_to_renewal {
            snapshot = snapshot.with_days_to_renewal(days);
        }

        tracing::debug!(
            connection = %connection,
            usage = snapshot.usage_percentage,
            "Quota collected"
        );
        Ok(snapshot)
    }
}
