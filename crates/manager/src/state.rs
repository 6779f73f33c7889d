use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use brokkctl_common::TokenService;
use brokkctl_worktree::SharedWorktreeProvisioner;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::pool::SharedExecutorPool;
use crate::registry::InstanceRegistry;

#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub repo_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

pub struct ManagerState {
    pub manager_id: String,
    pub master_token: String,
    pub token_service: TokenService,
    pub pool: SharedExecutorPool,
    pub provisioner: SharedWorktreeProvisioner,
    pub registry: InstanceRegistry,
    pub sessions: RwLock<HashMap<String, SessionRecord>>,
    pub session_idempotency: RwLock<HashMap<String, String>>,
    pub started_at: Instant,
}

pub type SharedManagerState = Arc<ManagerState>;
