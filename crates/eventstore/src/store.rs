//! Per-job append-only, strictly sequenced, durable event log.
//!
//! On-disk format is one JSON object per line (`{seq, ts, eventType,
//! payload}`) under `{base_dir}/{jobId}.jsonl`, with a lazy file handle
//! behind a mutex-guarded writer.
//! A per-job `Mutex` serializes appends so `seq` assignment and the durable
//! write happen atomically from the caller's point of view; readers open,
//! read, and close the file independently and never contend with a writer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use brokkctl_common::{EventPayload, JobEvent, JobState, JobStatus};
use chrono::Utc;
use thiserror::Error;
use tokio::{
    fs::OpenOptions,
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::{Mutex, RwLock},
};
use tracing::warn;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    JobNotFound(String),
    #[error("illegal transition for job {job_id}: {from:?} -> {to:?}")]
    IllegalTransition {
        job_id: String,
        from: JobState,
        to: JobState,
    },
    #[error("job {0} already exists")]
    AlreadyExists(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

struct JobRecord {
    status: JobStatus,
    file: Option<tokio::fs::File>,
    next_seq: i64,
}

pub struct JobEventStore {
    base_dir: PathBuf,
    jobs: RwLock<HashMap<String, Arc<Mutex<JobRecord>>>>,
}

pub type SharedJobEventStore = Arc<JobEventStore>;

impl JobEventStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            jobs: RwLock::new(HashMap::new()),
        }
    }

    fn log_path(&self, job_id: &str) -> PathBuf {
        self.base_dir.join(format!("{job_id}.jsonl"))
    }

    /// Registers a new job in `PENDING` state. Recovers a partially-written
    /// log file from a prior crash by truncating any incomplete trailing
    /// line, per §4.3's failure contract.
    pub async fn create_job(&self, job_id: &str) -> Result<JobStatus, StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(job_id) {
            return Err(StoreError::AlreadyExists(job_id.to_string()));
        }

        tokio::fs::create_dir_all(&self.base_dir).await?;
        let path = self.log_path(job_id);
        let next_seq = recover_and_count(&path).await?;

        let status = JobStatus {
            job_id: job_id.to_string(),
            state: JobState::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            attempts: 1,
            last_seq: next_seq - 1,
        };

        jobs.insert(
            job_id.to_string(),
            Arc::new(Mutex::new(JobRecord {
                status: status.clone(),
                file: None,
                next_seq,
            })),
        );
        Ok(status)
    }

    async fn record(&self, job_id: &str) -> Result<Arc<Mutex<JobRecord>>, StoreError> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))
    }

    /// Appends exactly one event, assigning the next sequence number under
    /// the per-job lock. Returns only after the write is durable.
    pub async fn append_event(&self, job_id: &str, payload: EventPayload) -> Result<i64, StoreError> {
        let record = self.record(job_id).await?;
        let mut guard = record.lock().await;

        if guard.file.is_none() {
            let path = self.log_path(job_id);
            guard.file = Some(OpenOptions::new().create(true).append(true).open(&path).await?);
        }

        let seq = guard.next_seq;
        let event = JobEvent {
            seq,
            ts: Utc::now().timestamp_millis(),
            payload,
        };
        let mut line = serde_json::to_vec(&event).expect("event always serializes");
        line.push(b'\n');

        let file = guard.file.as_mut().expect("file opened above");
        file.write_all(&line).await?;
        file.flush().await?;

        guard.next_seq = seq + 1;
        guard.status.last_seq = seq;
        Ok(seq)
    }

    /// Returns events with `seq > after` in ascending order, bounded by
    /// `max_count` (0 means "all remaining"). `after = -1` reads from the
    /// start.
    pub async fn read_events(&self, job_id: &str, after: i64, max_count: usize) -> Result<Vec<JobEvent>, StoreError> {
        // Confirm the job is known, matching §4.3's "fails only on I/O error /
        // unknown job" contract, without holding the writer lock while reading.
        self.record(job_id).await?;

        let path = self.log_path(job_id);
        let file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut lines = BufReader::new(file).lines();
        let mut out = Vec::new();
        while let Some(line) = lines.next_line().await? {
            if line.is_empty() {
                continue;
            }
            let event: JobEvent = match serde_json::from_str(&line) {
                Ok(e) => e,
                Err(_) => continue, // truncated trailing line from a crash mid-write
            };
            if event.seq > after {
                out.push(event);
                if max_count != 0 && out.len() >= max_count {
                    break;
                }
            }
        }
        Ok(out)
    }

    pub async fn get_status(&self, job_id: &str) -> Result<JobStatus, StoreError> {
        let record = self.record(job_id).await?;
        let status = record.lock().await.status.clone();
        Ok(status)
    }

    /// Applies a state transition validated against the job state diagram.
    pub async fn transition(&self, job_id: &str, new_state: JobState) -> Result<JobStatus, StoreError> {
        let record = self.record(job_id).await?;
        let mut guard = record.lock().await;
        let from = guard.status.state;

        if !from.can_transition_to(new_state) {
            return Err(StoreError::IllegalTransition {
                job_id: job_id.to_string(),
                from,
                to: new_state,
            });
        }

        guard.status.state = new_state;
        let now = Utc::now();
        match new_state {
            JobState::Running => guard.status.started_at = Some(now),
            s if s.is_terminal() => guard.status.completed_at = Some(now),
            _ => {}
        }
        Ok(guard.status.clone())
    }

    pub async fn list_job_ids(&self) -> Vec<String> {
        self.jobs.read().await.keys().cloned().collect()
    }
}

/// Scans an existing job log for a truncated trailing line (a crash mid
/// `write_all`). If found, the file is truncated to the last complete
/// record and the recovery is logged. Returns the next sequence number to
/// assign.
async fn recover_and_count(path: &Path) -> Result<i64, std::io::Error> {
    let file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut lines = BufReader::new(file).lines();
    let mut valid_bytes: u64 = 0;
    let mut next_seq: i64 = 0;
    let mut truncated = false;

    while let Some(line) = lines.next_line().await? {
        match serde_json::from_str::<JobEvent>(&line) {
            Ok(event) => {
                valid_bytes += line.len() as u64 + 1;
                next_seq = event.seq + 1;
            }
            Err(_) => {
                truncated = true;
                break;
            }
        }
    }

    if truncated {
        warn!(path = %path.display(), valid_bytes, "truncating partially-written event log after crash recovery");
        let file = OpenOptions::new().write(true).open(path).await?;
        file.set_len(valid_bytes).await?;
    }

    Ok(next_seq)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn notification(msg: &str) -> EventPayload {
        EventPayload::Notification {
            level: brokkctl_common::NotificationLevel::Info,
            message: msg.to_string(),
            title: None,
        }
    }

    #[tokio::test]
    async fn sequence_numbers_are_dense_and_monotone() {
        let tmp = TempDir::new().unwrap();
        let store = JobEventStore::new(tmp.path());
        store.create_job("job-1").await.unwrap();

        for i in 0..5 {
            let seq = store.append_event("job-1", notification(&format!("e{i}"))).await.unwrap();
            assert_eq!(seq, i);
        }
    }

    #[tokio::test]
    async fn read_events_resumes_after_seq() {
        let tmp = TempDir::new().unwrap();
        let store = JobEventStore::new(tmp.path());
        store.create_job("job-1").await.unwrap();
        for i in 0..5 {
            store.append_event("job-1", notification(&format!("e{i}"))).await.unwrap();
        }

        let all = store.read_events("job-1", -1, 0).await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].seq, 0);
        assert_eq!(all[4].seq, 4);

        let resumed = store.read_events("job-1", 2, 0).await.unwrap();
        assert_eq!(resumed.len(), 2);
        assert_eq!(resumed[0].seq, 3);
    }

    #[tokio::test]
    async fn read_events_respects_max_count() {
        let tmp = TempDir::new().unwrap();
        let store = JobEventStore::new(tmp.path());
        store.create_job("job-1").await.unwrap();
        for i in 0..10 {
            store.append_event("job-1", notification(&format!("e{i}"))).await.unwrap();
        }
        let page = store.read_events("job-1", -1, 3).await.unwrap();
        assert_eq!(page.len(), 3);
        assert_eq!(page[2].seq, 2);
    }

    #[tokio::test]
    async fn round_trip_single_event() {
        let tmp = TempDir::new().unwrap();
        let store = JobEventStore::new(tmp.path());
        store.create_job("job-1").await.unwrap();
        let seq = store.append_event("job-1", notification("hello")).await.unwrap();

        let got = store.read_events("job-1", seq - 1, 1).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].seq, seq);
    }

    #[tokio::test]
    async fn transitions_follow_state_diagram() {
        let tmp = TempDir::new().unwrap();
        let store = JobEventStore::new(tmp.path());
        store.create_job("job-1").await.unwrap();

        store.transition("job-1", JobState::Running).await.unwrap();
        let status = store.transition("job-1", JobState::Succeeded).await.unwrap();
        assert_eq!(status.state, JobState::Succeeded);
        assert!(status.completed_at.is_some());
    }

    #[tokio::test]
    async fn illegal_transition_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = JobEventStore::new(tmp.path());
        store.create_job("job-1").await.unwrap();

        let err = store.transition("job-1", JobState::Succeeded).await.unwrap_err();
        assert!(matches!(err, StoreError::IllegalTransition { .. }));
    }

    #[tokio::test]
    async fn unknown_job_errors_on_append() {
        let tmp = TempDir::new().unwrap();
        let store = JobEventStore::new(tmp.path());
        let err = store.append_event("ghost", notification("x")).await.unwrap_err();
        assert!(matches!(err, StoreError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn recovers_from_truncated_trailing_line() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("job-1.jsonl");
        tokio::fs::write(&path, b"{\"seq\":0,\"ts\":1,\"eventType\":\"NOTIFICATION\",\"payload\":{\"level\":\"INFO\",\"message\":\"a\"}}\n{\"seq\":1,\"ts\":2,\"eventT")
            .await
            .unwrap();

        let store = JobEventStore::new(tmp.path());
        store.create_job("job-1").await.unwrap();

        let seq = store.append_event("job-1", notification("b")).await.unwrap();
        assert_eq!(seq, 1, "recovery should resume at the next sequence after the last valid record");

        let events = store.read_events("job-1", -1, 0).await.unwrap();
        assert_eq!(events.len(), 2);
    }
}
