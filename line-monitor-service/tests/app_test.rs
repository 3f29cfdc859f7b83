mod common;

use common::{connection, loopback, TestApp};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_health_reports_first_cycle_delivery() {
    let webhook = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/reports"))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&webhook)
        .await;

    let app = TestApp::spawn(
        format!("{}/reports", webhook.uri()),
        vec![connection(1, "alpha", loopback(21))],
    )
    .await;

    let health = app.wait_for_first_cycle().await;

    assert_eq!(health["status"], "ok");
    assert_eq!(health["service"], "line-monitor-service");
    assert_eq!(health["last_cycle"]["outcome"], "delivered");
    assert!(health["last_cycle"]["error"].is_null());
}

#[tokio::test]
async fn test_rejected_webhook_falls_back_to_local_file() {
    let webhook = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&webhook)
        .await;

    let app = TestApp::spawn(webhook.uri(), vec![connection(1, "alpha", loopback(22))]).await;

    let health = app.wait_for_first_cycle().await;
    assert_eq!(health["last_cycle"]["outcome"], "delivered_locally");

    let mut entries = std::fs::read_dir(app.data_dir.path().join("reports")).unwrap();
    let artifact = entries.next().expect("fallback report written").unwrap();
    assert!(artifact.file_name().to_string_lossy().ends_with(".json"));
}

#[tokio::test]
async fn test_ready_requires_connections() {
    let webhook = MockServer::start().await;

    let empty = TestApp::spawn(webhook.uri(), Vec::new()).await;
    let status = reqwest::get(format!("{}/ready", empty.address))
        .await
        .unwrap()
        .status();
    assert_eq!(status.as_u16(), 503);

    let health = empty.wait_for_first_cycle().await;
    assert_eq!(health["last_cycle"]["outcome"], "failed");

    let configured = TestApp::spawn(webhook.uri(), vec![connection(1, "alpha", loopback(23))]).await;
    let status = reqwest::get(format!("{}/ready", configured.address))
        .await
        .unwrap()
        .status();
    assert!(status.is_success());
}

#[tokio::test]
async fn test_metrics_endpoint_is_plain_text() {
    let webhook = MockServer::start().await;
    let app = TestApp::spawn(webhook.uri(), vec![connection(1, "alpha", loopback(24))]).await;

    let response = reqwest::get(format!("{}/metrics", app.address))
        .await
        .unwrap();

    assert!(response.status().is_success());
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
}
