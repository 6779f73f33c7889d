//! Executor Pool — owns child processes keyed by session, one live
//! `brokkctl-exec` child per session, spawned via `tokio::process::Command`
//! with its stdout/stderr drained line-by-line through a `BufReader`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use brokkctl_worktree::{ProvisionError, SharedWorktreeProvisioner};
use rand::RngCore;
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, Command},
    sync::{Mutex, RwLock},
    time::timeout,
};
use tracing::{debug, info, warn};

const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(500);
const READINESS_DEADLINE: Duration = Duration::from_secs(30);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("executor pool is at capacity")]
    NoCapacity,
    #[error("failed to provision worktree: {0}")]
    Provision(#[from] ProvisionError),
    #[error("failed to allocate a loopback port: {0}")]
    PortAlloc(std::io::Error),
    #[error("failed to spawn executor process: {0}")]
    ProcessSpawn(std::io::Error),
    #[error("executor did not become ready within {0:?}")]
    ReadinessTimeout(Duration),
    #[error("executor rejected session creation: {0}")]
    SessionCreateFailed(String),
}

pub struct ExecutorHandle {
    /// Stable id for this child incarnation; also the worktree directory name.
    pub exec_id: String,
    pub host: String,
    pub port: u16,
    pub auth_token: String,
    process: Mutex<Child>,
    last_active_at: Mutex<Instant>,
}

impl ExecutorHandle {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

pub struct ExecutorPool {
    /// session_id -> handle. Keyed by `provisionId` until `update_session_id`
    /// swaps the key for the child-reported canonical session id.
    handles: RwLock<HashMap<String, Arc<ExecutorHandle>>>,
    spawn_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    provisioner: SharedWorktreeProvisioner,
    executor_path: PathBuf,
    capacity: usize,
    http: reqwest::Client,
}

pub type SharedExecutorPool = Arc<ExecutorPool>;

impl ExecutorPool {
    pub fn new(provisioner: SharedWorktreeProvisioner, executor_path: PathBuf, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            handles: RwLock::new(HashMap::new()),
            spawn_locks: Mutex::new(HashMap::new()),
            provisioner,
            executor_path,
            capacity,
            http: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(5))
                .timeout(Duration::from_secs(120))
                .build()
                .expect("reqwest client builds with valid static config"),
        })
    }

    pub async fn size(&self) -> usize {
        self.handles.read().await.len()
    }

    pub fn has_capacity(&self, current: usize) -> bool {
        current < self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    async fn key_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.spawn_locks
            .lock()
            .await
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Idempotent by session id (here, `provision_id`). Steps follow spec
    /// §4.6(a-g): provision, allocate port, mint child token, spawn, attach
    /// logger, poll readiness, record. Any failure after the process starts
    /// kills it and tears down the worktree before surfacing `SpawnError`.
    pub async fn spawn(
        &self,
        provision_id: &str,
        repo_path: &std::path::Path,
        git_ref: Option<&str>,
    ) -> Result<Arc<ExecutorHandle>, SpawnError> {
        let lock = self.key_lock(provision_id).await;
        let _guard = lock.lock().await;

        if let Some(existing) = self.handles.read().await.get(provision_id) {
            return Ok(existing.clone());
        }

        let current = self.size().await;
        if !self.has_capacity(current) {
            return Err(SpawnError::NoCapacity);
        }

        let workspace_dir = self.provisioner.provision(provision_id, repo_path, git_ref).await?;

        let port = allocate_port().map_err(SpawnError::PortAlloc)?;
        let auth_token = generate_child_token();
        let listen_addr: SocketAddr = format!("127.0.0.1:{port}").parse().expect("127.0.0.1:<port> always parses");

        let spawn_result = Command::new(&self.executor_path)
            .arg("--exec-id")
            .arg(provision_id)
            .arg("--listen-addr")
            .arg(listen_addr.to_string())
            .arg("--auth-token")
            .arg(&auth_token)
            .arg("--workspace-dir")
            .arg(&workspace_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawn_result {
            Ok(c) => c,
            Err(e) => {
                self.provisioner.teardown(provision_id).await;
                return Err(SpawnError::ProcessSpawn(e));
            }
        };

        attach_line_logger(provision_id, child.stdout.take(), "stdout");
        attach_line_logger(provision_id, child.stderr.take(), "stderr");

        if let Err(e) = self.wait_until_ready(&listen_addr).await {
            warn!(session_id = provision_id, "executor failed readiness poll — killing and tearing down");
            let _ = child.start_kill();
            self.provisioner.teardown(provision_id).await;
            return Err(e);
        }

        let handle = Arc::new(ExecutorHandle {
            exec_id: provision_id.to_string(),
            host: "127.0.0.1".to_string(),
            port,
            auth_token,
            process: Mutex::new(child),
            last_active_at: Mutex::new(Instant::now()),
        });

        self.handles.write().await.insert(provision_id.to_string(), handle.clone());
        info!(session_id = provision_id, port, "executor spawned and ready");
        Ok(handle)
    }

    async fn wait_until_ready(&self, addr: &SocketAddr) -> Result<(), SpawnError> {
        let deadline = Instant::now() + READINESS_DEADLINE;
        let url = format!("http://{addr}/health/live");
        loop {
            if Instant::now() >= deadline {
                return Err(SpawnError::ReadinessTimeout(READINESS_DEADLINE));
            }
            if let Ok(resp) = self.http.get(&url).send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(READINESS_POLL_INTERVAL).await;
        }
    }

    /// Forwards session creation to the child so it can mint its own
    /// canonical session id, distinct from the provisional one.
    pub async fn create_session_on_child(&self, handle: &ExecutorHandle, name: &str) -> Result<String, SpawnError> {
        let resp = self
            .http
            .post(format!("{}/v1/sessions", handle.base_url()))
            .bearer_auth(&handle.auth_token)
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await
            .map_err(|e| SpawnError::SessionCreateFailed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(SpawnError::SessionCreateFailed(format!("status {}", resp.status())));
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SpawnError::SessionCreateFailed(e.to_string()))?;
        body["sessionId"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SpawnError::SessionCreateFailed("missing sessionId in child response".into()))
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<ExecutorHandle>> {
        self.handles.read().await.get(session_id).cloned()
    }

    pub async fn touch(&self, session_id: &str) {
        if let Some(handle) = self.handles.read().await.get(session_id) {
            *handle.last_active_at.lock().await = Instant::now();
        }
    }

    /// Moves a handle from its provisional key to the child-reported
    /// canonical session id. Mutually exclusive with `spawn`/`shutdown` for
    /// either key via the outer write lock.
    pub async fn update_session_id(&self, old: &str, new: &str) -> bool {
        if old == new {
            return true;
        }
        let mut map = self.handles.write().await;
        if map.contains_key(new) {
            return false;
        }
        match map.remove(old) {
            Some(handle) => {
                map.insert(new.to_string(), handle);
                true
            }
            None => false,
        }
    }

    /// Idempotent: shutting down an unknown session succeeds silently.
    /// Signals the process, waits up to 5s for graceful exit, then
    /// force-kills; always tears down the worktree afterward.
    pub async fn shutdown(&self, session_id: &str) {
        let handle = self.handles.write().await.remove(session_id);
        if let Some(handle) = handle {
            let mut child = handle.process.lock().await;
            terminate_gracefully(&mut child).await;
            self.provisioner.teardown(&handle.exec_id).await;
        }
    }

    pub async fn shutdown_all(&self) {
        let ids: Vec<String> = self.handles.read().await.keys().cloned().collect();
        for id in ids {
            self.shutdown(&id).await;
        }
    }

    /// Background eviction: shuts down any session whose `lastActiveAt` is
    /// older than `max_idle`.
    pub async fn evict_idle(&self, max_idle: Duration) {
        let now = Instant::now();
        let mut stale = Vec::new();
        for (id, handle) in self.handles.read().await.iter() {
            if now.duration_since(*handle.last_active_at.lock().await) > max_idle {
                stale.push(id.clone());
            }
        }
        for id in stale {
            info!(session_id = %id, "evicting idle session");
            self.shutdown(&id).await;
        }
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http
    }
}

#[cfg(unix)]
async fn terminate_gracefully(child: &mut Child) {
    if let Some(pid) = child.id() {
        let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), nix::sys::signal::Signal::SIGTERM);
    }
    match timeout(SHUTDOWN_GRACE, child.wait()).await {
        Ok(_) => {}
        Err(_) => {
            warn!("executor did not exit within grace period — force killing");
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate_gracefully(child: &mut Child) {
    let _ = child.start_kill();
    let _ = timeout(SHUTDOWN_GRACE, child.wait()).await;
}

fn allocate_port() -> std::io::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

/// ≥256 bits of entropy, URL-safe base64 without padding.
fn generate_child_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn attach_line_logger(session_id: &str, pipe: Option<impl tokio::io::AsyncRead + Unpin + Send + 'static>, stream: &'static str) {
    let Some(pipe) = pipe else { return };
    let session_id = session_id.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(session_id = %session_id, stream, "{line}");
        }
    });
}
