use super::protocol::{self, Endpoint, ServiceConfiguration};
use super::selection::nearest_endpoint;
use super::{MeasurementError, Measurer};
use crate::config::SpeedtestConfig;
use crate::models::{Connection, ConnectionId, MeasurementResult};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use reqwest::Client;
use std::net::{IpAddr, TcpListener};
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, instrument};

const BYTES_PER_MEGABIT: f64 = 1024.0 * 1024.0 / 8.0;

/// Runs speed measurements for one egress address at a time.
///
/// Holds no per-measurement state, so a single client can serve every
/// connection concurrently.
#[derive(Debug, Clone)]
pub struct MeasurementClient {
    settings: SpeedtestConfig,
}

impl MeasurementClient {
    pub fn new(settings: SpeedtestConfig) -> Self {
        Self { settings }
    }

    #[instrument(skip(self), fields(egress = %egress))]
    pub async fn measure_from(
        &self,
        connection_id: ConnectionId,
        egress: IpAddr,
    ) -> Result<MeasurementResult, MeasurementError> {
        let http = self.bound_client(egress)?;

        let (configuration, catalog) = self.fetch_configuration(&http).await?;
        let endpoint = nearest_endpoint(&catalog, configuration.latitude, configuration.longitude)
            .ok_or(MeasurementError::NoEndpointsAvailable)?;
        debug!(endpoint = %endpoint.id, name = %endpoint.name, "Selected measurement endpoint");

        let latency_ms = self.measure_latency(&http, endpoint).await?;
        let download_mbps = self.measure_download(&http, endpoint).await?;
        let upload_mbps = self.measure_upload(&http, endpoint).await?;

        info!(
            public_address = %configuration.public_address,
            latency_ms,
            download_mbps,
            upload_mbps,
            "Measurement complete"
        );

        Ok(MeasurementResult {
            connection_id,
            latency_ms,
            download_mbps,
            upload_mbps,
            public_address: configuration.public_address,
            isp: configuration.isp,
            endpoint_id: endpoint.id.clone(),
            endpoint_name: endpoint.name.clone(),
            captured_at: Utc::now(),
        })
    }

    /// Fetch the service configuration and endpoint catalog. An empty catalog
    /// is returned as-is; selection turns it into `NoEndpointsAvailable`.
    pub async fn fetch_configuration(
        &self,
        http: &Client,
    ) -> Result<(ServiceConfiguration, Vec<Endpoint>), MeasurementError> {
        let config_doc = self.fetch_document(http, &self.settings.config_url).await?;
        let configuration = protocol::parse_configuration(&config_doc).ok_or_else(|| {
            MeasurementError::ConfigUnavailable("configuration has no client element".to_string())
        })?;

        let catalog_doc = self.fetch_document(http, &self.settings.servers_url).await?;
        Ok((configuration, protocol::parse_catalog(&catalog_doc)))
    }

    /// HTTP client whose sockets all originate from `egress`. Fails before any
    /// network I/O when the address is not assignable on this host.
    pub fn bound_client(&self, egress: IpAddr) -> Result<Client, MeasurementError> {
        TcpListener::bind((egress, 0)).map_err(|source| MeasurementError::BindError {
            address: egress,
            source,
        })?;

        Client::builder()
            .local_address(egress)
            .connect_timeout(self.settings.connect_timeout())
            .no_proxy()
            .user_agent(concat!("line-monitor/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MeasurementError::ClientSetup(e.to_string()))
    }

    async fn fetch_document(&self, http: &Client, url: &str) -> Result<String, MeasurementError> {
        let unavailable = |e: reqwest::Error| MeasurementError::ConfigUnavailable(e.to_string());
        http.get(url)
            .timeout(self.settings.request_timeout())
            .send()
            .await
            .map_err(unavailable)?
            .error_for_status()
            .map_err(unavailable)?
            .text()
            .await
            .map_err(unavailable)
    }

    /// Minimum round trip over the configured number of probes.
    async fn measure_latency(
        &self,
        http: &Client,
        endpoint: &Endpoint,
    ) -> Result<f64, MeasurementError> {
        let url = endpoint.latency_url();
        let probes = self.settings.latency_probe_count.max(1);
        let mut best: Option<Duration> = None;

        for probe in 1..=probes {
            let started = Instant::now();
            let outcome = async {
                let response = http
                    .post(&url)
                    .timeout(self.settings.request_timeout())
                    .send()
                    .await?
                    .error_for_status()?;
                response.bytes().await?;
                Ok::<_, reqwest::Error>(())
            }
            .await;
            let round_trip = started.elapsed();

            match outcome {
                Ok(()) => {
                    best = Some(best.map_or(round_trip, |b| b.min(round_trip)));
                }
                Err(e) => debug!(probe, error = %e, "Latency probe failed"),
            }
        }

        best.map(|rtt| rtt.as_secs_f64() * 1000.0)
            .ok_or(MeasurementError::LatencyProbeFailed(probes))
    }

    async fn measure_download(
        &self,
        http: &Client,
        endpoint: &Endpoint,
    ) -> Result<f64, MeasurementError> {
        let url = endpoint.download_url(self.settings.download_size);
        let started = Instant::now();
        let deadline = started + self.settings.max_download_time();

        let streams =
            (0..self.settings.download_streams.max(1)).map(|_| download_stream(http, &url, deadline));
        let total: u64 = join_all(streams).await.into_iter().sum();

        throughput("download", total, started.elapsed())
    }

    async fn measure_upload(
        &self,
        http: &Client,
        endpoint: &Endpoint,
    ) -> Result<f64, MeasurementError> {
        let url = endpoint.upload_url();
        let payload = vec![b'0'; self.settings.upload_chunk_size];
        let started = Instant::now();
        let deadline = started + self.settings.max_upload_time();

        let workers = (0..self.settings.upload_streams.max(1))
            .map(|_| upload_worker(http, &url, &payload, deadline));
        let total: u64 = join_all(workers).await.into_iter().sum();

        throughput("upload", total, started.elapsed())
    }
}

#[async_trait]
impl Measurer for MeasurementClient {
    async fn measure(&self, connection: &Connection) -> Result<MeasurementResult, MeasurementError> {
        self.measure_from(connection.id, connection.egress_address)
            .await
    }
}

/// Bytes received from one download before completion, error or the shared
/// deadline, whichever comes first.
async fn download_stream(http: &Client, url: &str, deadline: Instant) -> u64 {
    let mut response = match timeout_at(deadline, http.get(url).send()).await {
        Ok(Ok(response)) => match response.error_for_status() {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "Download rejected");
                return 0;
            }
        },
        Ok(Err(e)) => {
            debug!(error = %e, "Download request failed");
            return 0;
        }
        Err(_) => return 0,
    };

    let mut received = 0u64;
    loop {
        match timeout_at(deadline, response.chunk()).await {
            Ok(Ok(Some(chunk))) => received += chunk.len() as u64,
            Ok(Ok(None)) => break,
            Ok(Err(e)) => {
                debug!(error = %e, received, "Download interrupted");
                break;
            }
            // Cap reached: the stream is truncated, not failed.
            Err(_) => break,
        }
    }
    received
}

/// Bytes of fully acknowledged chunks posted before the deadline. A chunk
/// still in flight at the deadline is not counted.
async fn upload_worker(http: &Client, url: &str, payload: &[u8], deadline: Instant) -> u64 {
    let mut sent = 0u64;
    while Instant::now() < deadline {
        let post = async {
            let response = http
                .post(url)
                .body(payload.to_vec())
                .send()
                .await?
                .error_for_status()?;
            response.bytes().await?;
            Ok::<_, reqwest::Error>(())
        };
        match timeout_at(deadline, post).await {
            Ok(Ok(())) => sent += payload.len() as u64,
            Ok(Err(e)) => {
                debug!(error = %e, sent, "Upload chunk failed");
                break;
            }
            Err(_) => break,
        }
    }
    sent
}

fn throughput(direction: &'static str, bytes: u64, elapsed: Duration) -> Result<f64, MeasurementError> {
    if bytes == 0 {
        return Err(MeasurementError::TransferFailed(direction));
    }
    Ok(to_mbps(bytes, elapsed))
}

/// `bytes * 8 / 2^20 / seconds`.
pub fn to_mbps(bytes: u64, elapsed: Duration) -> f64 {
    let seconds = elapsed.as_secs_f64().max(f64::EPSILON);
    bytes as f64 / BYTES_PER_MEGABIT / seconds
}
