use crate::models::{CheckMode, Connection, ReportFormat};
use secrecy::Secret;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use service_core::retry::RetryPolicy;
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MonitorConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    #[serde(default)]
    #[validate(nested)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    #[validate(nested)]
    pub speedtest: SpeedtestConfig,
    #[serde(default)]
    #[validate(nested)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub report: ReportConfig,
    /// External scraping services, one per provider.
    #[serde(default)]
    #[validate(nested)]
    pub collectors: Vec<CollectorEndpointConfig>,
    /// Connections imported into the store at startup. Plaintext credentials
    /// are sealed on import.
    #[serde(default)]
    pub connections: Vec<Connection>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ExecutionConfig {
    /// Maximum portal collections in flight.
    #[serde(default = "default_concurrency_limit")]
    #[validate(range(min = 1))]
    pub concurrency_limit: usize,
    #[serde(default = "default_collect_timeout_secs")]
    #[validate(range(min = 1))]
    pub collect_timeout_secs: u64,
    /// Pause between the first collection pass and the retry pass.
    #[serde(default)]
    pub retry_delay_secs: u64,
    #[serde(default)]
    pub mode: CheckMode,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            collect_timeout_secs: default_collect_timeout_secs(),
            retry_delay_secs: 0,
            mode: CheckMode::default(),
        }
    }
}

impl ExecutionConfig {
    pub fn collect_timeout(&self) -> Duration {
        Duration::from_secs(self.collect_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::single_retry(Duration::from_secs(self.retry_delay_secs))
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SpeedtestConfig {
    #[serde(default = "default_config_url")]
    pub config_url: String,
    #[serde(default = "default_servers_url")]
    pub servers_url: String,
    #[serde(default = "default_latency_probe_count")]
    #[validate(range(min = 1, max = 20))]
    pub latency_probe_count: u32,
    #[serde(default = "default_download_streams")]
    #[validate(range(min = 1, max = 64))]
    pub download_streams: usize,
    /// Edge length of the `random{N}x{N}.jpg` download resource.
    #[serde(default = "default_download_size")]
    pub download_size: u32,
    #[serde(default = "default_max_download_secs")]
    #[validate(range(min = 1))]
    pub max_download_secs: u64,
    #[serde(default = "default_upload_streams")]
    #[validate(range(min = 1, max = 64))]
    pub upload_streams: usize,
    #[serde(default = "default_upload_chunk_size")]
    #[validate(range(min = 1))]
    pub upload_chunk_size: usize,
    #[serde(default = "default_max_upload_secs")]
    #[validate(range(min = 1))]
    pub max_upload_secs: u64,
    /// Timeout for configuration fetches and latency probes.
    #[serde(default = "default_request_timeout_secs")]
    #[validate(range(min = 1))]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    #[validate(range(min = 1))]
    pub connect_timeout_secs: u64,
}

impl Default for SpeedtestConfig {
    fn default() -> Self {
        Self {
            config_url: default_config_url(),
            servers_url: default_servers_url(),
            latency_probe_count: default_latency_probe_count(),
            download_streams: default_download_streams(),
            download_size: default_download_size(),
            max_download_secs: default_max_download_secs(),
            upload_streams: default_upload_streams(),
            upload_chunk_size: default_upload_chunk_size(),
            max_upload_secs: default_max_upload_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl SpeedtestConfig {
    pub fn max_download_time(&self) -> Duration {
        Duration::from_secs(self.max_download_secs)
    }

    pub fn max_upload_time(&self) -> Duration {
        Duration::from_secs(self.max_upload_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    #[default]
    Email,
    Webhook,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub channel: ChannelKind,
    #[serde(default = "default_max_attempts")]
    #[validate(range(min = 1, max = 10))]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Ceiling for a single backoff delay. Unset keeps the doubling uncapped.
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
    /// Directory that receives the report when every delivery attempt fails.
    #[serde(default = "default_fallback_dir")]
    pub fallback_dir: PathBuf,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            channel: ChannelKind::default(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: None,
            fallback_dir: default_fallback_dir(),
        }
    }
}

impl DeliveryConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        let max_delay = self.max_delay_ms.map_or(Duration::MAX, Duration::from_millis);
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
            .with_max_delay(max_delay)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    #[serde(default = "default_smtp_host")]
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default = "empty_secret")]
    pub password: Secret<String>,
    #[serde(default = "default_from_email")]
    pub from_email: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub cc: Option<String>,
    #[serde(default = "default_subject")]
    pub subject: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            user: String::new(),
            password: empty_secret(),
            from_email: default_from_email(),
            from_name: default_from_name(),
            recipients: Vec::new(),
            cc: None,
            subject: default_subject(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct WebhookConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_webhook_timeout_secs")]
    pub timeout_secs: u64,
}

impl WebhookConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_data_file")]
    pub data_file: PathBuf,
    #[serde(default = "default_key_file")]
    pub key_file: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_file: default_data_file(),
            key_file: default_key_file(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds between cycles.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Run a single cycle and exit instead of scheduling.
    #[serde(default)]
    pub run_once: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            run_once: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CollectorEndpointConfig {
    #[validate(length(min = 1))]
    pub provider: String,
    #[validate(url)]
    pub url: String,
    #[serde(default = "default_collector_timeout_secs")]
    pub timeout_secs: u64,
}

impl CollectorEndpointConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Writing the report to a file replaces delivery for the cycle.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ReportConfig {
    #[serde(default)]
    pub output: Option<PathBuf>,
    #[serde(default)]
    pub format: ReportFormat,
}

impl MonitorConfig {
    pub fn load() -> Result<Self, AppError> {
        let config: MonitorConfig =
            core_config::load_layered("configuration", &["smtp.recipients"])?;
        config.validate()?;
        Ok(config)
    }
}

fn default_concurrency_limit() -> usize {
    2
}

fn default_collect_timeout_secs() -> u64 {
    180
}

fn default_config_url() -> String {
    "https://www.speedtest.net/speedtest-config.php".to_string()
}

fn default_servers_url() -> String {
    "https://www.speedtest.net/speedtest-servers-static.php".to_string()
}

fn default_latency_probe_count() -> u32 {
    3
}

fn default_download_streams() -> usize {
    10
}

fn default_download_size() -> u32 {
    4000
}

fn default_max_download_secs() -> u64 {
    15
}

fn default_upload_streams() -> usize {
    2
}

fn default_upload_chunk_size() -> usize {
    4 * 1024 * 1024
}

fn default_max_upload_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_fallback_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn empty_secret() -> Secret<String> {
    Secret::new(String::new())
}

fn default_from_email() -> String {
    "noreply@example.com".to_string()
}

fn default_from_name() -> String {
    "Line Monitor".to_string()
}

fn default_subject() -> String {
    "Internet Lines Usage Report".to_string()
}

fn default_webhook_timeout_secs() -> u64 {
    30
}

fn default_collector_timeout_secs() -> u64 {
    120
}

fn default_data_file() -> PathBuf {
    PathBuf::from("line-monitor.json")
}

fn default_key_file() -> PathBuf {
    PathBuf::from(".secret.key")
}

fn default_interval_secs() -> u64 {
    24 * 60 * 60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_tuning() {
        let speedtest = SpeedtestConfig::default();
        assert_eq!(speedtest.latency_probe_count, 3);
        assert_eq!(speedtest.download_streams, 10);
        assert_eq!(speedtest.upload_chunk_size, 4_194_304);
        assert_eq!(speedtest.max_download_time(), Duration::from_secs(15));

        let delivery = DeliveryConfig::default();
        let policy = delivery.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
    }

    #[test]
    fn test_delivery_backoff_keeps_doubling() {
        let delivery = DeliveryConfig {
            max_attempts: 10,
            ..Default::default()
        };
        let policy = delivery.retry_policy();
        assert_eq!(policy.delay_after(7), Duration::from_secs(64));
        assert_eq!(policy.delay_after(9), Duration::from_secs(256));

        let capped = DeliveryConfig {
            max_delay_ms: Some(5_000),
            ..delivery
        };
        assert_eq!(capped.retry_policy().delay_after(9), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let execution = ExecutionConfig {
            concurrency_limit: 0,
            ..Default::default()
        };
        assert!(execution.validate().is_err());
    }

    #[test]
    fn test_execution_retry_policy_is_single_retry() {
        let policy = ExecutionConfig::default().retry_policy();
        assert_eq!(policy.attempts(), 2);
        assert_eq!(policy.delay_after(1), Duration::ZERO);
    }
}
