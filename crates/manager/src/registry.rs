//! Instance Registry — a heartbeat file other tooling can poll to discover
//! a live manager without talking to it over HTTP. Write a record on start,
//! refresh its timestamp periodically, remove it on clean shutdown.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct InstanceRecord {
    manager_id: String,
    pid: u32,
    listen_addr: SocketAddr,
    started_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    session_count: usize,
}

pub struct InstanceRegistry {
    path: Option<PathBuf>,
    manager_id: String,
    listen_addr: SocketAddr,
    started_at: DateTime<Utc>,
}

impl InstanceRegistry {
    /// `dir == None` disables the registry entirely; all operations become
    /// no-ops so callers don't need to branch on configuration.
    pub fn new(dir: Option<PathBuf>, manager_id: String, listen_addr: SocketAddr) -> Self {
        let path = dir.map(|d| d.join(format!("{manager_id}.json")));
        Self {
            path,
            manager_id,
            listen_addr,
            started_at: Utc::now(),
        }
    }

    pub async fn heartbeat(&self, session_count: usize) {
        let Some(path) = &self.path else { return };
        let record = InstanceRecord {
            manager_id: self.manager_id.clone(),
            pid: std::process::id(),
            listen_addr: self.listen_addr,
            started_at: self.started_at,
            updated_at: Utc::now(),
            session_count,
        };
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(err = %e, "failed to create instances directory");
                return;
            }
        }
        match serde_json::to_vec_pretty(&record) {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(path, bytes).await {
                    warn!(err = %e, "failed to write instance heartbeat file");
                }
            }
            Err(e) => warn!(err = %e, "failed to serialize instance record"),
        }
    }

    /// Best-effort cleanup; failures are logged, never propagated.
    pub async fn remove(&self) {
        let Some(path) = &self.path else { return };
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(err = %e, "failed to remove instance heartbeat file");
            }
        }
    }

    pub fn heartbeat_interval() -> Duration {
        Duration::from_secs(30)
    }
}
