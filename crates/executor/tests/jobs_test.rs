//! Exercises a full job lifecycle against the real router: session creation,
//! idempotent job creation, event polling, and cancellation.

use std::time::Duration;

use brokkctl_executor::{build_router, ExecutorState};
use tempfile::TempDir;

async fn spawn_executor() -> (reqwest::Client, String, TempDir) {
    let dir = TempDir::new().unwrap();
    let state = ExecutorState::new("exec-jobs-1".to_string(), "tok".to_string(), dir.path().to_path_buf());
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = reqwest::Client::builder().build().unwrap();
    (client, format!("http://{addr}"), dir)
}

#[tokio::test]
async fn job_runs_to_completion_and_emits_events() {
    let (client, base, _dir) = spawn_executor().await;

    let created: serde_json::Value = client
        .post(format!("{base}/v1/jobs"))
        .bearer_auth("tok")
        .json(&serde_json::json!({ "taskInput": "hello world from a job" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let job_id = created["jobId"].as_str().unwrap().to_string();
    assert_eq!(created["state"], "PENDING");

    let mut state = String::new();
    for _ in 0..50 {
        let status: serde_json::Value = client
            .get(format!("{base}/v1/jobs/{job_id}"))
            .bearer_auth("tok")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        state = status["state"].as_str().unwrap().to_string();
        if state == "SUCCEEDED" || state == "FAILED" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(state, "SUCCEEDED");

    let events: serde_json::Value = client
        .get(format!("{base}/v1/jobs/{job_id}/events"))
        .bearer_auth("tok")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let types: Vec<&str> = events["events"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["eventType"].as_str().unwrap())
        .collect();
    assert!(types.contains(&"CONTEXT_BASELINE"));
    assert!(types.contains(&"LLM_TOKEN"));
    assert!(types.contains(&"NOTIFICATION"));
}

#[tokio::test]
async fn job_creation_is_replayed_for_same_idempotency_key() {
    let (client, base, _dir) = spawn_executor().await;

    let first: serde_json::Value = client
        .post(format!("{base}/v1/jobs"))
        .bearer_auth("tok")
        .header("idempotency-key", "key-1")
        .json(&serde_json::json!({ "taskInput": "first attempt" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let second: serde_json::Value = client
        .post(format!("{base}/v1/jobs"))
        .bearer_auth("tok")
        .header("idempotency-key", "key-1")
        .json(&serde_json::json!({ "taskInput": "a different body, same key" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(first["jobId"], second["jobId"]);
}

#[tokio::test]
async fn empty_task_input_fails_the_job() {
    let (client, base, _dir) = spawn_executor().await;

    let created: serde_json::Value = client
        .post(format!("{base}/v1/jobs"))
        .bearer_auth("tok")
        .json(&serde_json::json!({ "taskInput": "   " }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let job_id = created["jobId"].as_str().unwrap().to_string();

    let mut state = String::new();
    for _ in 0..50 {
        let status: serde_json::Value = client
            .get(format!("{base}/v1/jobs/{job_id}"))
            .bearer_auth("tok")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        state = status["state"].as_str().unwrap().to_string();
        if state == "SUCCEEDED" || state == "FAILED" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(state, "FAILED");
}

#[tokio::test]
async fn cancelling_unknown_job_returns_404() {
    let (client, base, _dir) = spawn_executor().await;
    let resp = client
        .post(format!("{base}/v1/jobs/does-not-exist/cancel"))
        .bearer_auth("tok")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}
