//! Integration test for the executor's health endpoints. Spins up the real
//! router on a random loopback port and drives it with `reqwest`, the same
//! HTTP client this crate's production code already depends on.

use std::time::Duration;

use brokkctl_executor::{build_router, ExecutorState};
use tempfile::TempDir;

async fn spawn_executor(auth_token: &str) -> (String, TempDir) {
    let dir = TempDir::new().unwrap();
    let state = ExecutorState::new("exec-test-1".to_string(), auth_token.to_string(), dir.path().to_path_buf());
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    (format!("http://{addr}"), dir)
}

#[tokio::test]
async fn health_live_requires_no_auth_and_reports_exec_id() {
    let (base, _dir) = spawn_executor("secret-token").await;
    let resp = reqwest::get(format!("{base}/health/live")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["execId"], "exec-test-1");
    assert!(body["protocolVersion"].is_string());
}

#[tokio::test]
async fn health_ready_requires_auth() {
    let (base, _dir) = spawn_executor("secret-token").await;
    let resp = reqwest::get(format!("{base}/health/ready")).await.unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn health_ready_reflects_session_state() {
    let (base, _dir) = spawn_executor("secret-token").await;
    let client = reqwest::Client::new();

    let before: serde_json::Value = client
        .get(format!("{base}/health/ready"))
        .bearer_auth("secret-token")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(before["ready"], false);

    client
        .post(format!("{base}/v1/sessions"))
        .bearer_auth("secret-token")
        .json(&serde_json::json!({ "name": "demo" }))
        .send()
        .await
        .unwrap();

    let after: serde_json::Value = client
        .get(format!("{base}/health/ready"))
        .bearer_auth("secret-token")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(after["ready"], true);
}

#[tokio::test]
async fn protocol_version_mismatch_returns_409() {
    let (base, _dir) = spawn_executor("secret-token").await;
    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{base}/health/ready"))
        .bearer_auth("secret-token")
        .header("brokk-ctl-version", "2.0")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "PROTOCOL_INCOMPATIBLE");
}
