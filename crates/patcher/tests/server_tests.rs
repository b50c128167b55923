//! Integration tests for the plugin's HTTP surface.
//!
//! Each test serves the real router on a random local port and talks to it
//! over HTTP the way GitHub and Prow's hook would.

use patcher::server::{build_router, AppState, ACK};
use patcher::webhooks::{sign, DELIVERY_HEADER, EVENT_HEADER, SIGNATURE_HEADER};
use patcher::{ConfigAgent, Dispatcher, DryRunJobClient, ProwConfig};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

const SECRET: &[u8] = b"it's a secret to everybody";

const CONFIG: &str = r#"
prowjob_namespace: prow
pod_namespace: test-pods
postsubmits:
  acme/widgets:
  - name: carry-patches
    labels:
      propagate-on-rename: "true"
  - name: unit-tests
"#;

// =============================================================================
// Helpers
// =============================================================================

/// Start the plugin on a random port, backed by a dry-run job client.
async fn start_plugin() -> (SocketAddr, Arc<DryRunJobClient>) {
    let catalog = ConfigAgent::from_config(ProwConfig::from_yaml(CONFIG).unwrap());
    let jobs = Arc::new(DryRunJobClient::new());
    let dispatcher = Dispatcher::new(Arc::new(catalog), jobs.clone());
    let app = build_router(AppState::new(dispatcher, SECRET));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, jobs)
}

fn rename_event() -> String {
    json!({
        "action": "edited",
        "changes": { "default_branch": { "from": "dev" } },
        "repository": {
            "full_name": "acme/widgets",
            "default_branch": "main",
            "html_url": "https://github.com/acme/widgets"
        }
    })
    .to_string()
}

fn signed_request(
    addr: SocketAddr,
    event: &str,
    delivery: &str,
    body: &str,
) -> reqwest::RequestBuilder {
    reqwest::Client::new()
        .post(format!("http://{addr}/"))
        .header(EVENT_HEADER, event)
        .header(DELIVERY_HEADER, delivery)
        .header("Content-Type", "application/json")
        .header(SIGNATURE_HEADER, sign(body.as_bytes(), SECRET).unwrap())
        .body(body.to_string())
}

/// Poll until the dry-run client has seen `count` jobs or the deadline passes.
async fn wait_for_jobs(jobs: &DryRunJobClient, count: usize) -> Vec<String> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let created = jobs.created();
        if created.len() >= count || Instant::now() > deadline {
            return created;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_rename_is_acknowledged_and_propagated() {
    let (addr, jobs) = start_plugin().await;

    let response = signed_request(addr, "repository", "delivery-1", &rename_event())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), ACK);

    let created = wait_for_jobs(&jobs, 1).await;
    assert_eq!(
        created,
        vec![patcher::jobs::prowjob_name(
            "delivery-1",
            "acme/widgets",
            "carry-patches"
        )]
    );
}

#[tokio::test]
async fn test_hook_path_is_served() {
    let (addr, jobs) = start_plugin().await;
    let body = rename_event();

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/hook"))
        .header(EVENT_HEADER, "repository")
        .header(DELIVERY_HEADER, "delivery-2")
        .header("Content-Type", "application/json")
        .header(SIGNATURE_HEADER, sign(body.as_bytes(), SECRET).unwrap())
        .body(body)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(wait_for_jobs(&jobs, 1).await.len(), 1);
}

#[tokio::test]
async fn test_other_events_are_acknowledged_without_jobs() {
    let (addr, jobs) = start_plugin().await;

    let response = signed_request(addr, "push", "delivery-3", &rename_event())
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), ACK);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(jobs.created().is_empty());
}

#[tokio::test]
async fn test_malformed_payload_is_still_acknowledged() {
    let (addr, jobs) = start_plugin().await;

    let response = signed_request(addr, "repository", "delivery-4", "{\"action\":")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(jobs.created().is_empty());
}

#[tokio::test]
async fn test_bad_signature_is_forbidden() {
    let (addr, jobs) = start_plugin().await;
    let body = rename_event();

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/"))
        .header(EVENT_HEADER, "repository")
        .header(DELIVERY_HEADER, "delivery-5")
        .header("Content-Type", "application/json")
        .header(SIGNATURE_HEADER, sign(body.as_bytes(), b"wrong").unwrap())
        .body(body)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(jobs.created().is_empty());
}

#[tokio::test]
async fn test_missing_event_header_is_bad_request() {
    let (addr, _jobs) = start_plugin().await;
    let body = rename_event();

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/"))
        .header(DELIVERY_HEADER, "delivery-6")
        .header("Content-Type", "application/json")
        .header(SIGNATURE_HEADER, sign(body.as_bytes(), SECRET).unwrap())
        .body(body)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_on_hook_is_not_allowed() {
    let (addr, _jobs) = start_plugin().await;

    let response = reqwest::get(format!("http://{addr}/")).await.unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_health_endpoints() {
    let (addr, _jobs) = start_plugin().await;

    let health: Value = reqwest::get(format!("http://{addr}/healthz"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "healthy");

    let ready = reqwest::get(format!("http://{addr}/healthz/ready"))
        .await
        .unwrap();
    assert_eq!(ready.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_plugin_help() {
    let (addr, _jobs) = start_plugin().await;

    let help: Value = reqwest::get(format!("http://{addr}/help"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(help["name"], "patch-propagator");
    assert!(help["description"]
        .as_str()
        .unwrap()
        .contains("carrying over patchset"));
}
