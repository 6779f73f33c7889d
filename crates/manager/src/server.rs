//! Session Manager HTTP server — the authenticated control plane clients
//! talk to. Session-scoped job traffic is proxied through to the owning
//! executor child. Built the same way as the executor's router: split
//! auth'd/unauth'd subrouters merged with `with_state`.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Extension, Json, Router,
};
use brokkctl_common::{ErrorKind, SessionSpec, TokenService};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::error::ApiError;
use crate::pool::ExecutorHandle;
use crate::state::{ManagerState, SessionRecord, SharedManagerState};

pub fn build_router(state: SharedManagerState) -> Router {
    let master_gated = Router::new()
        .route("/v1/sessions", post(create_session))
        .route_layer(middleware::from_fn_with_state(state.clone(), master_auth))
        .with_state(state.clone());

    let session_gated = Router::new()
        .route("/v1/jobs", post(create_job))
        .route("/v1/jobs/{id}", get(get_job))
        .route("/v1/jobs/{id}/events", get(get_job_events))
        .route("/v1/jobs/{id}/cancel", post(cancel_job))
        .route("/v1/issues/{n}/fix", post(issue_fix))
        .route_layer(middleware::from_fn_with_state(state.clone(), session_auth))
        .with_state(state.clone());

    let health_gated = Router::new()
        .route("/health/ready", get(health_ready))
        .route_layer(middleware::from_fn_with_state(state.clone(), master_or_session_auth))
        .with_state(state.clone());

    Router::new()
        .route("/health/live", get(health_live))
        .route("/v1/sessions/{id}", delete(delete_session))
        .merge(master_gated)
        .merge(session_gated)
        .merge(health_gated)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers.get("authorization")?.to_str().ok()?.strip_prefix("Bearer ")
}

async fn master_auth(State(state): State<SharedManagerState>, headers: HeaderMap, req: axum::extract::Request, next: Next) -> Response {
    match bearer_token(&headers) {
        Some(t) if t == state.master_token => next.run(req).await,
        _ => ApiError::new(ErrorKind::Unauthorized, "missing or invalid master bearer token").into_response(),
    }
}

/// Accepts either the master token or any currently-valid session token.
/// Used for endpoints that any authenticated caller may poll, not just the
/// holder of a specific session.
async fn master_or_session_auth(State(state): State<SharedManagerState>, headers: HeaderMap, req: axum::extract::Request, next: Next) -> Response {
    match bearer_token(&headers) {
        Some(t) if t == state.master_token => next.run(req).await,
        Some(t) if state.token_service.validate(t).is_ok() => next.run(req).await,
        _ => ApiError::new(ErrorKind::Unauthorized, "missing or invalid bearer token").into_response(),
    }
}

/// Resolves a session-scoped bearer token to its executor handle and stashes
/// both for the downstream proxy handler.
async fn session_auth(
    State(state): State<SharedManagerState>,
    headers: HeaderMap,
    mut req: axum::extract::Request,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return ApiError::new(ErrorKind::Unauthorized, "missing bearer token").into_response();
    };
    let claims = match state.token_service.validate(token) {
        Ok(c) => c,
        Err(_) => return ApiError::new(ErrorKind::Unauthorized, "invalid or expired session token").into_response(),
    };
    let Some(handle) = state.pool.get(&claims.session_id).await else {
        return ApiError::new(ErrorKind::SessionNotFound, "session has no live executor").into_response();
    };
    state.pool.touch(&claims.session_id).await;
    req.extensions_mut().insert(handle);
    req.extensions_mut().insert(claims.session_id);
    next.run(req).await
}

// ─── Health ─────────────────────────────────────────────────────────────────

async fn health_live(State(state): State<SharedManagerState>) -> Json<Value> {
    Json(json!({
        "managerId": state.manager_id,
        "version": env!("CARGO_PKG_VERSION"),
        "protocolVersion": brokkctl_common::protocol_version_string(),
        "poolSize": state.pool.capacity(),
    }))
}

async fn health_ready(State(state): State<SharedManagerState>) -> Response {
    let provisioner_ok = state.provisioner.healthcheck().await;
    if !provisioner_ok {
        return unavailable(ErrorKind::ProvisionerUnhealthy, "worktree provisioner is not healthy");
    }

    let size = state.pool.size().await;
    if !state.pool.has_capacity(size) {
        return unavailable(ErrorKind::NoCapacity, "executor pool is at capacity");
    }

    StatusCode::OK.into_response()
}

fn unavailable(kind: ErrorKind, message: &str) -> Response {
    let mut resp = (StatusCode::SERVICE_UNAVAILABLE, Json(brokkctl_common::ErrorBody::new(kind, message))).into_response();
    resp.headers_mut()
        .insert("retry-after", "30".parse().expect("static value is a valid header"));
    resp
}

// ─── Sessions ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest {
    repo_path: std::path::PathBuf,
    #[serde(default, rename = "ref")]
    ref_: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionResponse {
    session_id: String,
    state: &'static str,
    token: String,
}

async fn create_session(
    State(state): State<SharedManagerState>,
    headers: HeaderMap,
    Json(body): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    if let Some(key) = headers.get("idempotency-key").and_then(|v| v.to_str().ok()) {
        if let Some(session_id) = state.session_idempotency.read().await.get(key).cloned() {
            return Ok((StatusCode::OK, Json(reissue(&state, &session_id).await?)));
        }
    }

    let current = state.pool.size().await;
    if !state.pool.has_capacity(current) {
        return Err(ApiError::new(ErrorKind::CapacityExceeded, "executor pool is at capacity"));
    }

    let spec = SessionSpec {
        provision_id: Uuid::new_v4().to_string(),
        repo_path: body.repo_path.clone(),
        ref_: body.ref_.clone(),
    };

    let handle = state.pool.spawn(&spec.provision_id, &spec.repo_path, spec.ref_.as_deref()).await?;
    let session_id = state
        .pool
        .create_session_on_child(&handle, body.name.as_deref().unwrap_or("session"))
        .await?;

    if !state.pool.update_session_id(&spec.provision_id, &session_id).await {
        return Err(ApiError::new(ErrorKind::Internal, "executor reported a session id already in use"));
    }

    state.sessions.write().await.insert(
        session_id.clone(),
        SessionRecord {
            repo_path: spec.repo_path,
            created_at: chrono::Utc::now(),
        },
    );

    if let Some(key) = headers.get("idempotency-key").and_then(|v| v.to_str().ok()) {
        state.session_idempotency.write().await.insert(key.to_string(), session_id.clone());
    }

    let response = mint_response(&state.token_service, &session_id);
    Ok((StatusCode::CREATED, Json(response)))
}

async fn reissue(state: &ManagerState, session_id: &str) -> Result<CreateSessionResponse, ApiError> {
    if state.pool.get(session_id).await.is_none() {
        return Err(ApiError::new(ErrorKind::SessionNotFound, "replayed session no longer has a live executor"));
    }
    Ok(mint_response(&state.token_service, session_id))
}

fn mint_response(tokens: &TokenService, session_id: &str) -> CreateSessionResponse {
    let token = tokens.mint(session_id, brokkctl_common::token::DEFAULT_VALIDITY);
    CreateSessionResponse {
        session_id: session_id.to_string(),
        state: "ready",
        token,
    }
}

async fn delete_session(State(state): State<SharedManagerState>, headers: HeaderMap, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    let authorized = match bearer_token(&headers) {
        Some(t) if t == state.master_token => true,
        Some(t) => state.token_service.validate(t).map(|c| c.session_id == id).unwrap_or(false),
        None => false,
    };
    if !authorized {
        return Err(ApiError::new(ErrorKind::Forbidden, "token does not authorize deleting this session"));
    }

    state.pool.shutdown(&id).await;
    state.sessions.write().await.remove(&id);
    Ok(StatusCode::NO_CONTENT)
}

// ─── Job proxy ──────────────────────────────────────────────────────────────

async fn proxy(
    state: &ManagerState,
    handle: &ExecutorHandle,
    method: reqwest::Method,
    path: &str,
    query: Option<String>,
    headers: &HeaderMap,
    body: Option<Bytes>,
) -> Result<Response, ApiError> {
    let mut url = format!("{}{}", handle.base_url(), path);
    if let Some(q) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(&q);
    }

    let mut builder = state.pool.http_client().request(method, &url).bearer_auth(&handle.auth_token);
    if let Some(key) = headers.get("idempotency-key") {
        builder = builder.header("idempotency-key", key);
    }
    if let Some(body) = body {
        builder = builder.header("content-type", "application/json").body(body);
    }

    let resp = builder
        .timeout(Duration::from_secs(60))
        .send()
        .await
        .map_err(|e| ApiError::new(ErrorKind::Internal, format!("executor proxy request failed: {e}")))?;

    let status = StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| ApiError::new(ErrorKind::Internal, format!("failed reading executor response: {e}")))?;
    Ok((status, [("content-type", "application/json")], bytes).into_response())
}

async fn create_job(
    State(state): State<SharedManagerState>,
    Extension(handle): Extension<Arc<ExecutorHandle>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    proxy(&state, &handle, reqwest::Method::POST, "/v1/jobs", None, &headers, Some(body)).await
}

async fn get_job(State(state): State<SharedManagerState>, Extension(handle): Extension<Arc<ExecutorHandle>>, Path(id): Path<String>) -> Result<Response, ApiError> {
    proxy(&state, &handle, reqwest::Method::GET, &format!("/v1/jobs/{id}"), None, &HeaderMap::new(), None).await
}

async fn get_job_events(
    State(state): State<SharedManagerState>,
    Extension(handle): Extension<Arc<ExecutorHandle>>,
    Path(id): Path<String>,
    RawQuery(q): RawQuery,
) -> Result<Response, ApiError> {
    proxy(&state, &handle, reqwest::Method::GET, &format!("/v1/jobs/{id}/events"), q, &HeaderMap::new(), None).await
}

async fn cancel_job(State(state): State<SharedManagerState>, Extension(handle): Extension<Arc<ExecutorHandle>>, Path(id): Path<String>) -> Result<Response, ApiError> {
    proxy(&state, &handle, reqwest::Method::POST, &format!("/v1/jobs/{id}/cancel"), None, &HeaderMap::new(), None).await
}

async fn issue_fix(State(state): State<SharedManagerState>, Extension(handle): Extension<Arc<ExecutorHandle>>, Path(n): Path<u64>) -> Result<Response, ApiError> {
    proxy(&state, &handle, reqwest::Method::POST, &format!("/v1/issues/{n}/fix"), None, &HeaderMap::new(), None).await
}
