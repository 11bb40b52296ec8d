//! HTTP query API.
//!
//! Request/response only: session and project reads, plan content
//! retrieval, and extraction triggers. Every completed request is audited
//! to the log and fanned out to websocket clients as an `api_log` message.

use crate::broadcast::Broadcaster;
use crate::error::DaemonError;
use crate::state::SharedRegistry;
use axum::extract::{Path as UrlPath, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use jacques_catalog::paths::{dash_encode, plan_index_path, plans_dir};
use jacques_catalog::session_index::GlobalSessionIndex;
use jacques_catalog::{BulkSummary, PlanCatalog, SessionManifest};
use jacques_core::messages::ServerMessage;
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, warn};

#[derive(Clone)]
pub struct HttpServer {
    port: u16,
    state: AppState,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct AppState {
    pub registry: SharedRegistry,
    pub broadcaster: Broadcaster,
    /// The assistant's transcript tree, `~/.claude/projects`.
    pub projects_root: Option<PathBuf>,
    pub archive_settings_path: Option<PathBuf>,
}

impl HttpServer {
    pub fn new(port: u16, state: AppState, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    pub async fn bind(&self) -> Result<TcpListener, DaemonError> {
        TcpListener::bind(("127.0.0.1", self.port))
            .await
            .map_err(|source| DaemonError::PortBusy {
                name: "http",
                port: self.port,
                source,
            })
    }

    pub async fn run(self, listener: TcpListener) {
        info!(port = self.port, "http server listening");
        let router = build_router(self.state);
        let cancel = self.cancel;
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
        {
            warn!(error = %e, "http server terminated with error");
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    // Tracing layer with request timing; the audit middleware below only
    // feeds the websocket `api_log` channel.
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/{session_id}", get(get_session))
        .route(
            "/api/sessions/{session_id}/plans/{message_index}",
            get(get_session_plan),
        )
        .route("/api/projects", get(list_projects))
        .route("/api/projects/{project}/catalog", get(get_project_catalog))
        .route(
            "/api/projects/{project}/plans/{plan_id}/content",
            get(get_plan_content),
        )
        .route("/api/projects/{project}/extract", post(extract_project))
        .route("/api/extract-all", post(extract_all))
        .route(
            "/api/archive-settings",
            get(get_archive_settings).put(put_archive_settings),
        )
        .layer(middleware::from_fn_with_state(state.clone(), audit_log))
        .layer(trace_layer)
        .with_state(state)
}

// ─── Audit log ────────────────────────────────────────────────────

/// Mirror each completed request to websocket clients as `api_log`.
/// Request tracing itself is `TraceLayer`'s job.
async fn audit_log(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();
    let response = next.run(request).await;

    state.broadcaster.send(ServerMessage::ApiLog {
        method,
        path,
        status: response.status().as_u16(),
        duration_ms: start.elapsed().as_millis() as u64,
        timestamp: Utc::now().timestamp_millis(),
    });
    response
}

// ─── Errors ───────────────────────────────────────────────────────

struct ApiError(StatusCode, String);

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self(StatusCode::NOT_FOUND, message.into())
    }

    fn internal(message: impl Into<String>) -> Self {
        Self(StatusCode::INTERNAL_SERVER_ERROR, message.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ─── Session queries ──────────────────────────────────────────────

async fn get_status(State(state): State<AppState>) -> Json<Value> {
    let registry = state.registry.read().await;
    Json(json!({
        "status": "running",
        "session_count": registry.len(),
        "focused_session_id": registry.focused_session_id(),
    }))
}

async fn list_sessions(State(state): State<AppState>) -> Json<Value> {
    let registry = state.registry.read().await;
    Json(json!({ "sessions": registry.sessions() }))
}

async fn get_session(
    State(state): State<AppState>,
    UrlPath(session_id): UrlPath<String>,
) -> ApiResult<Json<Value>> {
    let registry = state.registry.read().await;
    match registry.get(&session_id) {
        Some(session) => Ok(Json(json!({ "session": session }))),
        None => Err(ApiError::not_found(format!("unknown session {session_id}"))),
    }
}

/// Look up a deduplicated plan reference by its message index, resolving
/// through the global session index to the owning project's catalog.
async fn get_session_plan(
    UrlPath((session_id, message_index)): UrlPath<(String, usize)>,
) -> ApiResult<Json<Value>> {
    let index_path = GlobalSessionIndex::default_path()
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let index =
        GlobalSessionIndex::load(&index_path).map_err(|e| ApiError::internal(e.to_string()))?;
    let entry = index
        .find(&session_id)
        .ok_or_else(|| ApiError::not_found(format!("session {session_id} is not cataloged")))?;

    let project_dir = PathBuf::from(&entry.project_path);
    let manifest = read_manifest(&project_dir, &session_id)?;
    let plan = manifest
        .plans
        .iter()
        .find(|p| p.message_index == message_index)
        .ok_or_else(|| {
            ApiError::not_found(format!("no plan at message index {message_index}"))
        })?;

    let content = match &plan.catalog_id {
        Some(id) => {
            let catalog = PlanCatalog::new(plans_dir(&project_dir), plan_index_path(&project_dir));
            Some(
                catalog
                    .plan_content(id)
                    .map_err(|e| ApiError::internal(e.to_string()))?,
            )
        }
        None => None,
    };
    Ok(Json(json!({ "plan": plan, "content": content })))
}

// ─── Project queries ──────────────────────────────────────────────

async fn list_projects() -> ApiResult<Json<Value>> {
    let index_path = GlobalSessionIndex::default_path()
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let index =
        GlobalSessionIndex::load(&index_path).map_err(|e| ApiError::internal(e.to_string()))?;
    let mut projects: Vec<&str> = index
        .entries
        .iter()
        .map(|e| e.project_path.as_str())
        .collect();
    projects.sort_unstable();
    projects.dedup();
    let projects: Vec<Value> = projects
        .into_iter()
        .map(|p| json!({ "path": p, "encoded": dash_encode(p) }))
        .collect();
    Ok(Json(json!({ "projects": projects })))
}

async fn get_project_catalog(
    UrlPath(project): UrlPath<String>,
) -> ApiResult<Json<Value>> {
    let project_dir = resolve_project(&project)?;
    match jacques_catalog::read_project_index(&project_dir) {
        Some(index) => Ok(Json(json!({ "catalog": index }))),
        None => Err(ApiError::not_found(format!(
            "no catalog for project {project}"
        ))),
    }
}

async fn get_plan_content(
    UrlPath((project, plan_id)): UrlPath<(String, String)>,
) -> ApiResult<Response> {
    let project_dir = resolve_project(&project)?;
    let catalog = PlanCatalog::new(plans_dir(&project_dir), plan_index_path(&project_dir));
    match catalog.plan_content(&plan_id) {
        Ok(content) => Ok(content.into_response()),
        Err(e) => Err(ApiError::not_found(e.to_string())),
    }
}

// ─── Extraction triggers ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ExtractQuery {
    #[serde(default)]
    force: bool,
}

async fn extract_project(
    State(state): State<AppState>,
    UrlPath(project): UrlPath<String>,
    Query(query): Query<ExtractQuery>,
) -> ApiResult<Json<BulkSummary>> {
    let project_dir = resolve_project(&project)?;
    let projects_root = state
        .projects_root
        .clone()
        .ok_or_else(|| ApiError::internal("transcript tree location is unknown"))?;

    let summary = tokio::task::spawn_blocking({
        let project_dir = project_dir.clone();
        move || {
            jacques_catalog::extract_project_catalog(
                &project_dir,
                &projects_root,
                query.force,
                &mut |_report| {},
            )
        }
    })
    .await
    .map_err(|e| ApiError::internal(e.to_string()))?;

    state.broadcaster.send(ServerMessage::CatalogUpdated {
        project_path: project_dir.display().to_string(),
        action: "extracted".into(),
        item_id: None,
    });
    Ok(Json(summary))
}

async fn extract_all(
    State(state): State<AppState>,
    Query(query): Query<ExtractQuery>,
) -> ApiResult<Json<BulkSummary>> {
    let projects_root = state
        .projects_root
        .clone()
        .ok_or_else(|| ApiError::internal("transcript tree location is unknown"))?;

    let summary = tokio::task::spawn_blocking(move || {
        jacques_catalog::extract_all_catalogs(&projects_root, query.force, &mut |_report| {})
    })
    .await
    .map_err(|e| ApiError::internal(e.to_string()))?;

    state.broadcaster.send(ServerMessage::CatalogUpdated {
        project_path: String::new(),
        action: "extracted_all".into(),
        item_id: None,
    });
    Ok(Json(summary))
}

// ─── Archive settings ─────────────────────────────────────────────

async fn get_archive_settings(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let Some(path) = state.archive_settings_path else {
        return Ok(Json(json!({})));
    };
    match tokio::fs::read_to_string(&path).await {
        Ok(text) => serde_json::from_str(&text)
            .map(Json)
            .map_err(|e| ApiError::internal(e.to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Json(json!({}))),
        Err(e) => Err(ApiError::internal(e.to_string())),
    }
}

async fn put_archive_settings(
    State(state): State<AppState>,
    Json(settings): Json<Value>,
) -> ApiResult<Json<Value>> {
    let path = state
        .archive_settings_path
        .ok_or_else(|| ApiError::internal("archive settings path is unavailable"))?;
    let bytes =
        serde_json::to_vec_pretty(&settings).map_err(|e| ApiError::internal(e.to_string()))?;
    jacques_catalog::paths::atomic_write(&path, &bytes)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(settings))
}

// ─── Helpers ──────────────────────────────────────────────────────

/// Resolve a dash-encoded project segment back to a real project path by
/// matching against the projects the global index knows about.
fn resolve_project(encoded: &str) -> Result<PathBuf, ApiError> {
    let index_path = GlobalSessionIndex::default_path()
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let index =
        GlobalSessionIndex::load(&index_path).map_err(|e| ApiError::internal(e.to_string()))?;
    index
        .entries
        .iter()
        .map(|e| e.project_path.as_str())
        .find(|p| dash_encode(p) == encoded || *p == encoded)
        .map(PathBuf::from)
        .ok_or_else(|| ApiError::not_found(format!("unknown project {encoded}")))
}

fn read_manifest(project_dir: &std::path::Path, session_id: &str) -> Result<SessionManifest, ApiError> {
    let path = jacques_catalog::paths::sessions_dir(project_dir).join(format!("{session_id}.json"));
    let text = std::fs::read_to_string(&path)
        .map_err(|e| ApiError::not_found(format!("no manifest for {session_id}: {e}")))?;
    serde_json::from_str(&text).map_err(|e| ApiError::internal(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::new_shared_registry;
    use jacques_core::events::SessionStartEvent;

    fn make_state() -> AppState {
        let registry = new_shared_registry();
        let broadcaster = Broadcaster::new(registry.clone());
        AppState {
            registry,
            broadcaster,
            projects_root: None,
            archive_settings_path: None,
        }
    }

    async fn request(
        router: Router,
        method: &str,
        path: &str,
    ) -> (StatusCode, Value) {
        use tower::ServiceExt;
        let request = axum::http::Request::builder()
            .method(method)
            .uri(path)
            .body(axum::body::Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    #[tokio::test]
    async fn status_reports_session_count() {
        let state = make_state();
        state
            .registry
            .write()
            .await
            .register_session(&SessionStartEvent {
                timestamp: 1,
                session_id: "A".into(),
                cwd: "/u/p".into(),
                project: "p".into(),
                terminal_key: Some("TTY:/dev/ttys1".into()),
                ..Default::default()
            });
        let router = build_router(state);

        let (status, body) = request(router, "GET", "/api/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "running");
        assert_eq!(body["session_count"], 1);
    }

    #[tokio::test]
    async fn sessions_are_listed_in_activity_order() {
        let state = make_state();
        {
            let mut reg = state.registry.write().await;
            for (id, ts) in [("old", 100), ("new", 200)] {
                reg.register_session(&SessionStartEvent {
                    timestamp: ts,
                    session_id: id.into(),
                    cwd: "/u/p".into(),
                    project: "p".into(),
                    terminal_key: Some(format!("TTY:/dev/{id}")),
                    ..Default::default()
                });
            }
        }
        let router = build_router(state);

        let (status, body) = request(router, "GET", "/api/sessions").await;
        assert_eq!(status, StatusCode::OK);
        let sessions = body["sessions"].as_array().unwrap();
        assert_eq!(sessions[0]["session_id"], "new");
        assert_eq!(sessions[1]["session_id"], "old");
    }

    #[tokio::test]
    async fn unknown_session_is_404() {
        let (status, body) = request(build_router(make_state()), "GET", "/api/sessions/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn api_log_is_broadcast_for_completed_requests() {
        let state = make_state();
        let mut rx = state.broadcaster.subscribe();
        let router = build_router(state);

        let _ = request(router, "GET", "/api/status").await;
        match rx.recv().await.unwrap() {
            ServerMessage::ApiLog {
                method,
                path,
                status,
                ..
            } => {
                assert_eq!(method, "GET");
                assert_eq!(path, "/api/status");
                assert_eq!(status, 200);
            }
            other => panic!("expected api_log, got {other:?}"),
        }
    }
}
