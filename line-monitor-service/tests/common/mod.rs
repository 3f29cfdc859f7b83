#![allow(dead_code)]

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use line_monitor_service::config::SpeedtestConfig;
use line_monitor_service::models::{Connection, ConnectionId, StoredCredentials};
use futures::StreamExt;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

/// Coordinates the fake service reports for every caller (Amsterdam).
pub const CLIENT_LAT: f64 = 52.37;
pub const CLIENT_LON: f64 = 4.89;

/// Bytes served per download request.
pub const DOWNLOAD_BYTES: usize = 256 * 1024;

/// Bytes a stalled download sends before going quiet.
pub const STALLED_CHUNK_BYTES: usize = 64 * 1024;

#[derive(Default)]
pub struct ServerState {
    config_status: AtomicU16,
    omit_client: AtomicBool,
    empty_catalog: AtomicBool,
    latency_delays: Mutex<VecDeque<Duration>>,
    fail_latency: AtomicBool,
    stall_downloads: AtomicBool,
    latency_probes: AtomicU64,
    downloads: AtomicU64,
    uploaded_bytes: AtomicU64,
    address: Mutex<Option<SocketAddr>>,
}

/// In-process stand-in for a speedtest.net style measurement service.
///
/// The configuration document echoes the caller's source address as the
/// client IP, so tests can tell which egress address a request came from.
pub struct SpeedtestServer {
    pub address: SocketAddr,
    pub state: Arc<ServerState>,
}

impl SpeedtestServer {
    pub async fn spawn() -> Self {
        let state = Arc::new(ServerState::default());
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .expect("Failed to bind speedtest server");
        let address = listener.local_addr().expect("Failed to read local address");
        *state.address.lock().unwrap() = Some(address);

        let app = Router::new()
            .route("/speedtest-config.php", get(configuration))
            .route("/speedtest-servers-static.php", get(catalog))
            .route("/speedtest/latency.txt", post(latency))
            .route("/speedtest/upload.php", post(upload))
            .route("/speedtest/:file", get(download))
            .layer(DefaultBodyLimit::disable())
            .with_state(state.clone());

        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .ok();
        });

        Self { address, state }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.address, path)
    }

    /// Client settings tuned for loopback: small transfers, short caps.
    pub fn speedtest_config(&self) -> SpeedtestConfig {
        SpeedtestConfig {
            config_url: self.url("/speedtest-config.php"),
            servers_url: self.url("/speedtest-servers-static.php"),
            latency_probe_count: 3,
            download_streams: 3,
            download_size: 350,
            max_download_secs: 2,
            upload_streams: 2,
            upload_chunk_size: 32 * 1024,
            max_upload_secs: 1,
            request_timeout_secs: 5,
            connect_timeout_secs: 2,
        }
    }

    pub fn fail_configuration(&self, status: StatusCode) {
        self.state
            .config_status
            .store(status.as_u16(), Ordering::SeqCst);
    }

    pub fn omit_client_element(&self) {
        self.state.omit_client.store(true, Ordering::SeqCst);
    }

    pub fn serve_empty_catalog(&self) {
        self.state.empty_catalog.store(true, Ordering::SeqCst);
    }

    /// Answer every latency probe with a server error.
    pub fn fail_latency_probes(&self) {
        self.state.fail_latency.store(true, Ordering::SeqCst);
    }

    /// Send the first `STALLED_CHUNK_BYTES` of every download, then hang.
    pub fn stall_downloads(&self) {
        self.state.stall_downloads.store(true, Ordering::SeqCst);
    }

    /// Delay the next latency probes by the given amounts, in order.
    pub fn delay_latency_probes(&self, delays: &[Duration]) {
        self.state
            .latency_delays
            .lock()
            .unwrap()
            .extend(delays.iter().copied());
    }

    pub fn latency_probes(&self) -> u64 {
        self.state.latency_probes.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> u64 {
        self.state.downloads.load(Ordering::SeqCst)
    }

    pub fn uploaded_bytes(&self) -> u64 {
        self.state.uploaded_bytes.load(Ordering::SeqCst)
    }
}

async fn configuration(
    State(state): State<Arc<ServerState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    let status = state.config_status.load(Ordering::SeqCst);
    if status != 0 {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, String::new());
    }
    if state.omit_client.load(Ordering::SeqCst) {
        return (StatusCode::OK, "<settings></settings>".to_string());
    }

    let body = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<settings>
<client ip="{}" lat="{CLIENT_LAT}" lon="{CLIENT_LON}" isp="Loopback &amp; Co" isprating="3.7" />
<times dl1="5000000" />
</settings>"#,
        peer.ip()
    );
    (StatusCode::OK, body)
}

async fn catalog(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.empty_catalog.load(Ordering::SeqCst) {
        return "<settings><servers></servers></settings>".to_string();
    }

    let address = state.address.lock().unwrap().expect("server address");
    let url = format!("http://{address}/speedtest/upload.php");
    // Catalog order matters: "Haarlem" and its twin share coordinates.
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<settings>
<servers>
<server url="{url}" lat="40.7128" lon="-74.0060" name="New York" country="United States" cc="US" sponsor="Far" id="101" />
<server url="{url}" lat="52.3874" lon="4.6462" name="Haarlem" country="Netherlands" cc="NL" sponsor="Near" id="202" />
<server url="{url}" lat="52.3874" lon="4.6462" name="Haarlem Twin" country="Netherlands" cc="NL" sponsor="Twin" id="303" />
<server url="{url}" lat="48.8566" lon="2.3522" name="Paris" country="France" cc="FR" sponsor="Mid" id="404" />
</servers>
</settings>"#
    )
}

async fn latency(State(state): State<Arc<ServerState>>) -> (StatusCode, &'static str) {
    state.latency_probes.fetch_add(1, Ordering::SeqCst);
    if state.fail_latency.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "");
    }
    let delay = state.latency_delays.lock().unwrap().pop_front();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    (StatusCode::OK, "test=test\n")
}

async fn download(
    State(state): State<Arc<ServerState>>,
    Path(file): Path<String>,
) -> Response {
    if !file.starts_with("random") {
        return StatusCode::NOT_FOUND.into_response();
    }
    state.downloads.fetch_add(1, Ordering::SeqCst);

    if state.stall_downloads.load(Ordering::SeqCst) {
        let first = Bytes::from(vec![b'x'; STALLED_CHUNK_BYTES]);
        let body = futures::stream::once(async move { Ok::<_, Infallible>(first) })
            .chain(futures::stream::pending());
        return Body::from_stream(body).into_response();
    }
    (StatusCode::OK, vec![b'x'; DOWNLOAD_BYTES]).into_response()
}

async fn upload(State(state): State<Arc<ServerState>>, body: Bytes) -> String {
    state
        .uploaded_bytes
        .fetch_add(body.len() as u64, Ordering::SeqCst);
    format!("size={}", body.len())
}

/// Loopback address usable as a distinct egress address on Linux.
pub fn loopback(last_octet: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, last_octet))
}

/// Connection with plaintext credentials; the store seals them on import.
pub fn connection(id: ConnectionId, provider: &str, egress: IpAddr) -> Connection {
    Connection {
        id,
        line_number: format!("0500{id:05}"),
        name: format!("Line {id}"),
        description: format!("Test line {id}"),
        provider: provider.to_string(),
        egress_address: egress,
        credentials: StoredCredentials {
            username: format!("user{id}"),
            password: format!("secret{id}"),
        },
    }
}

/// A running application: scheduler plus HTTP server on a random port.
pub struct TestApp {
    pub address: String,
    pub data_dir: tempfile::TempDir,
    pub speedtest: SpeedtestServer,
}

impl TestApp {
    /// Spawn the monitor with a webhook channel pointed at `webhook_url`.
    pub async fn spawn(webhook_url: String, connections: Vec<Connection>) -> Self {
        use line_monitor_service::config::{
            ChannelKind, DeliveryConfig, ExecutionConfig, MonitorConfig, ReportConfig,
            ScheduleConfig, SmtpConfig, StoreConfig, WebhookConfig,
        };
        use line_monitor_service::models::CheckMode;
        use line_monitor_service::startup::Application;
        use service_core::config::Config as CoreConfig;

        let data_dir = tempfile::TempDir::new().expect("Failed to create data dir");
        let speedtest = SpeedtestServer::spawn().await;

        let config = MonitorConfig {
            common: CoreConfig {
                port: 0,
                ..Default::default()
            },
            execution: ExecutionConfig {
                mode: CheckMode::SpeedTestOnly,
                ..Default::default()
            },
            speedtest: speedtest.speedtest_config(),
            delivery: DeliveryConfig {
                channel: ChannelKind::Webhook,
                max_attempts: 2,
                base_delay_ms: 10,
                max_delay_ms: None,
                fallback_dir: data_dir.path().join("reports"),
            },
            smtp: SmtpConfig::default(),
            webhook: WebhookConfig {
                url: webhook_url,
                timeout_secs: 5,
            },
            store: StoreConfig {
                data_file: data_dir.path().join("monitor.json"),
                key_file: data_dir.path().join("secret.key"),
            },
            schedule: ScheduleConfig {
                interval_secs: 3600,
                run_once: false,
            },
            report: ReportConfig::default(),
            collectors: Vec::new(),
            connections,
        };

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");
        let address = format!("http://127.0.0.1:{}", app.http_port());

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for HTTP server to be ready by polling health endpoint
        let client = reqwest::Client::new();
        for _ in 0..50 {
            if client
                .get(format!("{address}/health"))
                .send()
                .await
                .is_ok()
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            data_dir,
            speedtest,
        }
    }

    /// Poll `/health` until the first cycle has reported.
    pub async fn wait_for_first_cycle(&self) -> serde_json::Value {
        let client = reqwest::Client::new();
        for _ in 0..200 {
            let health: serde_json::Value = client
                .get(format!("{}/health", self.address))
                .send()
                .await
                .expect("health request failed")
                .json()
                .await
                .expect("health body is not JSON");
            if !health["last_cycle"].is_null() {
                return health;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("first monitoring cycle never finished");
    }
}
