use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use brokkctl_eventstore::JobEventStore;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::jobs::JobRegistry;

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

pub struct ExecutorState {
    pub exec_id: String,
    pub auth_token: String,
    pub workspace_dir: PathBuf,
    pub started_at: Instant,
    pub session: RwLock<Option<SessionInfo>>,
    pub event_store: Arc<JobEventStore>,
    pub jobs: JobRegistry,
}

impl ExecutorState {
    pub fn new(exec_id: String, auth_token: String, workspace_dir: PathBuf) -> Arc<Self> {
        let events_dir = workspace_dir.join(".brokkctl").join("jobs");
        let event_store = Arc::new(JobEventStore::new(events_dir));
        Arc::new(Self {
            exec_id,
            auth_token,
            workspace_dir,
            started_at: Instant::now(),
            session: RwLock::new(None),
            jobs: JobRegistry::new(event_store.clone()),
            event_store,
        })
    }
}
