//! Wire types shared between the manager and the executor, and the
//! data-model structs that cross a process boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Parameters to provision a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSpec {
    /// Id generated by the manager before the child reports its own.
    pub provision_id: String,
    pub repo_path: PathBuf,
    /// Git reference to check out; `None` means current HEAD.
    pub ref_: Option<String>,
}

// ─── Jobs ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    /// Whether this state is a sink: no further transition is legal.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::Cancelled)
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Running) | (Running, Succeeded) | (Running, Failed) | (Running, Cancelled) | (Pending, Cancelled)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub job_id: String,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    /// -1 when no event has been appended yet.
    pub last_seq: i64,
}

/// One entry of a job's event log, keyed by a closed event-type set. The
/// `eventType` tag and `payload` fields are flattened onto the wire object
/// as `{seq, ts, eventType, payload...}` while staying a type-safe tagged
/// union in Rust.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub seq: i64,
    /// Wall-clock milliseconds since epoch.
    pub ts: i64,
    #[serde(flatten)]
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "eventType", content = "payload")]
pub enum EventPayload {
    #[serde(rename = "LLM_TOKEN")]
    LlmToken {
        token: String,
        message_type: String,
        is_new_message: bool,
        is_reasoning: bool,
    },
    #[serde(rename = "NOTIFICATION")]
    Notification {
        level: NotificationLevel,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    #[serde(rename = "ERROR")]
    Error { message: String, title: String },
    #[serde(rename = "CONTEXT_BASELINE")]
    ContextBaseline { count: u64, snippet: String },
    #[serde(rename = "STATE_HINT")]
    StateHint {
        name: String,
        value: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        count: Option<u64>,
    },
    #[serde(rename = "CONFIRM_REQUEST")]
    ConfirmRequest {
        message: String,
        title: String,
        option_type: ConfirmOptionType,
        message_type: String,
        default_decision: ConfirmDecision,
    },
}

impl EventPayload {
    /// The closed event-type tag, for logging/metrics without re-serializing.
    pub fn type_name(&self) -> &'static str {
        match self {
            EventPayload::LlmToken { .. } => "LLM_TOKEN",
            EventPayload::Notification { .. } => "NOTIFICATION",
            EventPayload::Error { .. } => "ERROR",
            EventPayload::ContextBaseline { .. } => "CONTEXT_BASELINE",
            EventPayload::StateHint { .. } => "STATE_HINT",
            EventPayload::ConfirmRequest { .. } => "CONFIRM_REQUEST",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmOptionType {
    YesNo,
    OkCancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfirmDecision {
    Yes,
    Ok,
}

impl ConfirmOptionType {
    /// The deterministic decision a headless console auto-answers with.
    pub fn default_decision(self) -> ConfirmDecision {
        match self {
            ConfirmOptionType::YesNo => ConfirmDecision::Yes,
            ConfirmOptionType::OkCancel => ConfirmDecision::Ok,
        }
    }
}

// ─── Error taxonomy ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Unauthorized,
    Forbidden,
    Validation,
    NotFound,
    MethodNotAllowed,
    SessionNotFound,
    CapacityExceeded,
    NoCapacity,
    ProvisionerUnhealthy,
    SpawnFailed,
    ProtocolUnsupportedFeature,
    ProtocolIncompatible,
    IllegalTransition,
    Io,
    Internal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: ErrorKind,
    pub message: String,
}

impl ErrorBody {
    pub fn new(error: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            error,
            message: message.into(),
        }
    }
}
