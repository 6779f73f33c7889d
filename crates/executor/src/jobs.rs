//! Job lifecycle driven by the executor: creation, idempotent replay,
//! cooperative cancellation, and a simulated agent run that exercises the
//! Headless Console. Deciding what code an agent writes is out of scope
//! here; this module only drives the state machine and event stream that a
//! real agent would also drive.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use brokkctl_common::{JobState, NotificationLevel};
use brokkctl_eventstore::{HeadlessConsole, JobEventStore};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub task_input: String,
    #[serde(default)]
    pub planner_model: Option<String>,
}

/// Tracks in-flight jobs for idempotency-key replay and cooperative
/// cancellation. Job state and events themselves live in the
/// [`JobEventStore`]; this registry only holds what the store doesn't.
pub struct JobRegistry {
    store: Arc<JobEventStore>,
    idempotency_keys: RwLock<HashMap<String, String>>,
    cancel_flags: RwLock<HashMap<String, Arc<AtomicBool>>>,
}

impl JobRegistry {
    pub fn new(store: Arc<JobEventStore>) -> Self {
        Self {
            store,
            idempotency_keys: RwLock::new(HashMap::new()),
            cancel_flags: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a job, or replays the existing `jobId` for a previously-seen
    /// `Idempotency-Key`. Returns `(job_id, newly_created)`.
    pub async fn create(&self, req: CreateJobRequest, idempotency_key: Option<&str>) -> Result<(String, bool), brokkctl_eventstore::StoreError> {
        if let Some(key) = idempotency_key {
            if let Some(existing) = self.idempotency_keys.read().await.get(key).cloned() {
                return Ok((existing, false));
            }
        }

        let job_id = Uuid::new_v4().to_string();
        self.store.create_job(&job_id).await?;

        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.cancel_flags.write().await.insert(job_id.clone(), cancel_flag.clone());

        if let Some(key) = idempotency_key {
            self.idempotency_keys.write().await.insert(key.to_string(), job_id.clone());
        }

        tokio::spawn(run_job(self.store.clone(), job_id.clone(), cancel_flag, req));

        Ok((job_id, true))
    }

    /// Records a cancellation intent. Idempotent: repeated calls for the
    /// same job are no-ops after the first. The running job observes the
    /// flag cooperatively between steps; in-flight work runs to completion.
    pub async fn cancel(&self, job_id: &str) -> bool {
        match self.cancel_flags.read().await.get(job_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }
}

async fn run_job(store: Arc<JobEventStore>, job_id: String, cancel_flag: Arc<AtomicBool>, req: CreateJobRequest) {
    let console = HeadlessConsole::new(store.clone(), job_id.clone());

    if let Err(e) = store.transition(&job_id, JobState::Running).await {
        warn!(job_id, err = %e, "failed to transition job to RUNNING");
        return;
    }

    let model = req.planner_model.as_deref().unwrap_or("default");
    let _ = console
        .context_baseline(1, format!("task: {}", truncate(&req.task_input, 120)))
        .await;
    let _ = console.state_hint("planner_model", model, None, None).await;

    for (i, word) in req.task_input.split_whitespace().enumerate().take(8) {
        if cancel_flag.load(Ordering::SeqCst) {
            let _ = console.notify(NotificationLevel::Warning, "job cancelled by request", None).await;
            if let Err(e) = store.transition(&job_id, JobState::Cancelled).await {
                warn!(job_id, err = %e, "failed to transition cancelled job");
            }
            return;
        }
        let _ = console
            .llm_token(word.to_string(), "assistant".to_string(), i == 0, false)
            .await;
    }

    if req.task_input.trim().is_empty() {
        let _ = console.error("empty task input", "Task Failed").await;
        if let Err(e) = store.transition(&job_id, JobState::Failed).await {
            warn!(job_id, err = %e, "failed to transition failed job");
        }
        return;
    }

    let _ = console
        .notify(NotificationLevel::Info, "task completed successfully", None)
        .await;
    if let Err(e) = store.transition(&job_id, JobState::Succeeded).await {
        warn!(job_id, err = %e, "failed to transition succeeded job");
    }
    info!(job_id, "job run finished");
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}…", &s[..max])
    }
}
