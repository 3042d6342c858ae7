// ABOUTME: HTTP inventory client tests against a mock backend
// Verifies endpoint paths, payload decoding and error mapping

use container_console::error::ConsoleError;
use container_console::inventory::{HttpInventoryClient, InventoryClient};
use container_console::models::{TargetId, TargetStatus};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> HttpInventoryClient {
    HttpInventoryClient::new(&server.uri(), Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn test_fetch_targets_decodes_inventory() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/targets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": "4f2a9c",
                "name": "web",
                "status": "Running",
                "healthy": true,
                "ports_healthy": { "8080": true, "9090": false },
                "service": "http"
            },
            { "id": "", "name": "pending", "status": "not started" }
        ])))
        .mount(&server)
        .await;

    let targets = client(&server).fetch_targets().await.unwrap();
    assert_eq!(targets.len(), 2);
    assert_eq!(targets[0].status, TargetStatus::Running);
    assert_eq!(
        targets[0].health_summary(),
        "Port 8080: ✓\nPort 9090: ✗\nService http: Healthy"
    );
    assert!(!targets[1].is_materialized());
    assert_eq!(targets[1].status, TargetStatus::Other("not started".into()));
}

#[tokio::test]
async fn test_null_inventory_is_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/targets"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("null", "application/json"))
        .mount(&server)
        .await;

    assert!(client(&server).fetch_targets().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unauthorized_means_auth_expired() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/targets"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    assert_eq!(client(&server).fetch_targets().await, Err(ConsoleError::AuthExpired));
}

#[tokio::test]
async fn test_server_error_is_registry_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/targets"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let error = client(&server).fetch_targets().await.unwrap_err();
    assert!(matches!(error, ConsoleError::RegistryFetchFailed(ref reason) if reason.contains("500")));
    assert!(error.is_global());
}

#[tokio::test]
async fn test_unreachable_backend_is_registry_failure() {
    let client = HttpInventoryClient::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
    assert!(matches!(
        client.fetch_targets().await,
        Err(ConsoleError::RegistryFetchFailed(_))
    ));
    assert!(!client.probe().await);
}

#[tokio::test]
async fn test_probe_reports_health() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    assert!(client(&server).probe().await);
}

#[tokio::test]
async fn test_probe_fails_on_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    assert!(!client(&server).probe().await);
}

#[tokio::test]
async fn test_fetch_and_download_logs() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/targets/4f2a9c/logs"))
        .respond_with(ResponseTemplate::new(200).set_body_string("starting\nlistening on :8080\n"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/targets/4f2a9c/logs/download"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Disposition", "attachment; filename=\"web.log\"")
                .set_body_bytes(b"full log\n".to_vec()),
        )
        .mount(&server)
        .await;

    let client = client(&server);
    let id = TargetId::new("4f2a9c").unwrap();
    assert_eq!(client.fetch_logs(&id).await.unwrap(), "starting\nlistening on :8080\n");
    assert_eq!(client.download_logs(&id).await.unwrap(), b"full log\n".to_vec());
}

#[tokio::test]
async fn test_log_failure_names_the_target() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/targets/gone/logs"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let id = TargetId::new("gone").unwrap();
    let error = client(&server).fetch_logs(&id).await.unwrap_err();
    assert!(matches!(
        error,
        ConsoleError::LogFetchFailed { ref target, ref reason } if target == "gone" && reason.contains("404")
    ));
    assert!(!error.is_global());
}

#[tokio::test]
async fn test_slow_backend_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/targets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let client = HttpInventoryClient::new(&server.uri(), Duration::from_millis(200)).unwrap();
    let error = client.fetch_targets().await.unwrap_err();
    assert_eq!(error, ConsoleError::RegistryFetchFailed("request timed out".into()));
}
