//! End-to-end test of the session manager against a real spawned executor
//! child process: spin up a real server on a random port, drive it with an
//! HTTP client, exercising the manager's job of proxying to a process it
//! owns.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use brokkctl_common::TokenService;
use brokkctl_manager::{
    build_router,
    pool::ExecutorPool,
    registry::InstanceRegistry,
    state::{ManagerState, SessionRecord},
};
use brokkctl_worktree::WorktreeProvisioner;
use tempfile::TempDir;

fn init_repo(dir: &Path) {
    let repo = git2::Repository::init(dir).unwrap();
    let sig = git2::Signature::now("Test", "test@example.com").unwrap();
    let tree_id = {
        let blob = repo.blob(b"hello").unwrap();
        let mut tb = repo.treebuilder(None).unwrap();
        tb.insert("README", blob, 0o100644).unwrap();
        tb.write().unwrap()
    };
    let tree = repo.find_tree(tree_id).unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[]).unwrap();
}

/// `CARGO_BIN_EXE_<name>` is only populated for a package's own integration
/// tests, not for a sibling crate pulled in as a dev-dependency, so the
/// executor binary is located relative to this test binary instead (both
/// land in the same `target/<profile>/` directory).
fn executor_binary_path() -> std::path::PathBuf {
    let mut path = std::env::current_exe().expect("current test binary path");
    path.pop(); // deps/
    path.pop(); // debug/ (or release/)
    path.push("brokkctl-exec");
    path
}

async fn spawn_manager() -> (reqwest::Client, String, TempDir, TempDir) {
    let repo_dir = TempDir::new().unwrap();
    init_repo(repo_dir.path());
    let worktrees_dir = TempDir::new().unwrap();

    let provisioner = Arc::new(WorktreeProvisioner::new(worktrees_dir.path().join("worktrees")));
    let executor_path = executor_binary_path();
    let pool = ExecutorPool::new(provisioner.clone(), executor_path, 2);
    let registry = InstanceRegistry::new(None, "mgr-test".to_string(), "127.0.0.1:0".parse().unwrap());

    let state = Arc::new(ManagerState {
        manager_id: "mgr-test".to_string(),
        master_token: "master-secret".to_string(),
        token_service: TokenService::new("master-secret").unwrap(),
        pool,
        provisioner,
        registry,
        sessions: tokio::sync::RwLock::new(std::collections::HashMap::<String, SessionRecord>::new()),
        session_idempotency: tokio::sync::RwLock::new(std::collections::HashMap::new()),
        started_at: std::time::Instant::now(),
    });

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    (reqwest::Client::new(), format!("http://{addr}"), repo_dir, worktrees_dir)
}

#[tokio::test]
async fn session_lifecycle_spawns_executor_and_proxies_jobs() {
    let (client, base, repo_dir, _wt) = spawn_manager().await;

    let created: serde_json::Value = client
        .post(format!("{base}/v1/sessions"))
        .bearer_auth("master-secret")
        .json(&serde_json::json!({ "repoPath": repo_dir.path(), "name": "e2e" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(created["state"], "ready");
    let session_token = created["token"].as_str().unwrap().to_string();
    assert!(created["sessionId"].is_string());

    let job: serde_json::Value = client
        .post(format!("{base}/v1/jobs"))
        .bearer_auth(&session_token)
        .json(&serde_json::json!({ "taskInput": "say hello" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let job_id = job["jobId"].as_str().unwrap().to_string();

    let mut state = String::new();
    for _ in 0..50 {
        let status: serde_json::Value = client
            .get(format!("{base}/v1/jobs/{job_id}"))
            .bearer_auth(&session_token)
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
}

#[tokio::test]
async fn health_ready_requires_auth() {
    let (client, base, _repo, _wt) = spawn_manager().await;
    let resp = client.get(format!("{base}/health/ready")).send().await.unwrap();
    assert_eq!(resp.status(), 401);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "UNAUTHORIZED");

    let resp = client
        .get(format!("{base}/health/ready"))
        .bearer_auth("master-secret")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn jobs_endpoint_rejects_missing_session_token() {
    let (client, base, _repo, _wt) = spawn_manager().await;
    let resp = client
        .post(format!("{base}/v1/jobs"))
        .json(&serde_json::json!({ "taskInput": "x" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn session_creation_rejects_non_master_token() {
    let (client, base, repo_dir, _wt) = spawn_manager().await;
    let resp = client
        .post(format!("{base}/v1/sessions"))
        .bearer_auth("wrong-token")
        .json(&serde_json::json!({ "repoPath": repo_dir.path() }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn a_sessions_token_cannot_be_used_to_delete_another_session() {
    let (client, base, repo_dir, _wt) = spawn_manager().await;

    let created: serde_json::Value = client
        .post(format!("{base}/v1/sessions"))
        .bearer_auth("master-secret")
        .json(&serde_json::json!({ "repoPath": repo_dir.path() }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let session_token = created["token"].as_str().unwrap();

    let resp = client
        .delete(format!("{base}/v1/sessions/some-other-session"))
        .bearer_auth(session_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
}
