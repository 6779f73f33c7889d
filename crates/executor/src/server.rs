//! Executor HTTP server — the per-child surface a session is served
//! through. Built on `axum` with the familiar
//! `Router::new().route(...).with_state(ctx)` shape.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use brokkctl_common::{check_protocol_version, protocol_version_string, ErrorKind, ProtocolCompat, SUPPORTED_CAPABILITIES};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::jobs::CreateJobRequest;
use crate::state::{ExecutorState, SessionInfo};

pub fn build_router(state: Arc<ExecutorState>) -> Router {
    let authenticated = Router::new()
        .route("/health/ready", get(health_ready))
        .route("/v1/sessions", post(create_session))
        .route("/v1/jobs", post(create_job))
        .route("/v1/jobs/{id}", get(get_job))
        .route("/v1/jobs/{id}/events", get(get_job_events))
        .route("/v1/jobs/{id}/cancel", post(cancel_job))
        .route("/v1/issues/{n}/fix", post(issue_fix))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_and_protocol))
        .with_state(state.clone());

    Router::new()
        .route("/health/live", get(health_live))
        .merge(authenticated)
        .with_state(state)
}

async fn auth_and_protocol(
    State(state): State<Arc<ExecutorState>>,
    headers: HeaderMap,
    req: axum::extract::Request,
    next: Next,
) -> axum::response::Response {
    let ok = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t == state.auth_token)
        .unwrap_or(false);

    if !ok {
        return ApiError::new(ErrorKind::Unauthorized, "missing or invalid bearer token").into_response();
    }

    if let Some(version) = headers.get("brokk-ctl-version").and_then(|v| v.to_str().ok()) {
        match check_protocol_version(version) {
            ProtocolCompat::Compatible => {}
            ProtocolCompat::UnsupportedFeature => {
                return protocol_error_response(ErrorKind::ProtocolUnsupportedFeature, "client minor version is newer than this executor supports");
            }
            ProtocolCompat::Incompatible => {
                return protocol_error_response(ErrorKind::ProtocolIncompatible, "client major version is incompatible with this executor");
            }
        }
    }

    next.run(req).await
}

fn protocol_error_response(kind: ErrorKind, message: &str) -> axum::response::Response {
    let mut resp = (
        StatusCode::CONFLICT,
        Json(json!({
            "error": kind,
            "message": message,
            "supportedCapabilities": SUPPORTED_CAPABILITIES,
        })),
    )
        .into_response();
    resp.headers_mut().insert(
        "brokk-ctl-version",
        protocol_version_string().parse().expect("protocol version string is valid header value"),
    );
    resp
}

// ─── Health ─────────────────────────────────────────────────────────────────

async fn health_live(State(state): State<Arc<ExecutorState>>) -> Json<Value> {
    Json(json!({
        "execId": state.exec_id,
        "version": env!("CARGO_PKG_VERSION"),
        "protocolVersion": protocol_version_string(),
    }))
}

async fn health_ready(State(state): State<Arc<ExecutorState>>) -> Json<Value> {
    let session = state.session.read().await;
    match session.as_ref() {
        Some(_) => Json(json!({ "ready": true })),
        None => Json(json!({ "ready": false, "reason": "no session created yet" })),
    }
}

// ─── Sessions ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateSessionBody {
    name: String,
}

async fn create_session(
    State(state): State<Arc<ExecutorState>>,
    Json(body): Json<CreateSessionBody>,
) -> Result<(StatusCode, Json<SessionInfo>), ApiError> {
    let mut session = state.session.write().await;
    if session.is_some() {
        return Err(ApiError::new(ErrorKind::Validation, "this executor already serves a session"));
    }
    let info = SessionInfo {
        session_id: uuid::Uuid::new_v4().to_string(),
        name: body.name,
        created_at: Utc::now(),
    };
    *session = Some(info.clone());
    Ok((StatusCode::CREATED, Json(info)))
}

// ─── Jobs ───────────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateJobResponse {
    job_id: String,
    state: &'static str,
}

async fn create_job(
    State(state): State<Arc<ExecutorState>>,
    headers: HeaderMap,
    Json(body): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<CreateJobResponse>), ApiError> {
    let idempotency_key = headers.get("idempotency-key").and_then(|v| v.to_str().ok());

    let (job_id, _created) = state
        .jobs
        .create(body, idempotency_key)
        .await
        .map_err(|e| ApiError::new(ErrorKind::Internal, e.to_string()))?;

    Ok((
        StatusCode::CREATED,
        Json(CreateJobResponse { job_id, state: "PENDING" }),
    ))
}

async fn get_job(State(state): State<Arc<ExecutorState>>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let status = state
        .event_store
        .get_status(&id)
        .await
        .map_err(|_| ApiError::new(ErrorKind::NotFound, format!("job {id} not found")))?;

    Ok(Json(json!({
        "jobId": status.job_id,
        "state": status.state,
        "createdAt": status.created_at,
        "updatedAt": status.completed_at.or(status.started_at).unwrap_or(status.created_at),
        "lastSeq": status.last_seq,
    })))
}

#[derive(Deserialize)]
struct EventsQuery {
    after: Option<i64>,
    #[serde(rename = "maxCount")]
    max_count: Option<usize>,
}

async fn get_job_events(
    State(state): State<Arc<ExecutorState>>,
    Path(id): Path<String>,
    Query(q): Query<EventsQuery>,
) -> Result<Json<Value>, ApiError> {
    let after = q.after.unwrap_or(-1);
    let events = state
        .event_store
        .read_events(&id, after, q.max_count.unwrap_or(0))
        .await
        .map_err(|_| ApiError::new(ErrorKind::NotFound, format!("job {id} not found")))?;

    let next_after = events.last().map(|e| e.seq).unwrap_or(after);
    Ok(Json(json!({ "events": events, "nextAfter": next_after })))
}

async fn cancel_job(State(state): State<Arc<ExecutorState>>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    if state.jobs.cancel(&id).await {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(ApiError::new(ErrorKind::NotFound, format!("job {id} not found")))
    }
}

// ─── Issue fix (thin wrapper over job creation; issue-tracker clients
// themselves are out of scope) ───────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IssueFixResponse {
    job_id: String,
    issue_number: u64,
}

async fn issue_fix(
    State(state): State<Arc<ExecutorState>>,
    Path(n): Path<u64>,
) -> Result<(StatusCode, Json<IssueFixResponse>), ApiError> {
    let req = CreateJobRequest {
        task_input: format!("fix issue #{n}"),
        planner_model: None,
    };
    let (job_id, _created) = state
        .jobs
        .create(req, None)
        .await
        .map_err(|e| ApiError::new(ErrorKind::Internal, e.to_string()))?;
    Ok((StatusCode::CREATED, Json(IssueFixResponse { job_id, issue_number: n })))
}
