use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::devserver::{DevServerState, DevServers};
use crate::errors::{DevServerError, PipelineError};
use crate::orchestrator::PromptProcessor;
use crate::source::{FileCollector, source_files};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub processor: PromptProcessor,
    pub collector: FileCollector,
    pub dev_servers: Arc<DevServers>,
    pub recent_commits: usize,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessPromptRequest {
    pub prompt: Option<String>,
    pub source_absolute_path: Option<String>,
    pub selected_file_paths: Option<Vec<String>>,
}

/// `sourceAbsolutePath` as either a query string or a JSON body.
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SourcePathParams {
    pub source_absolute_path: Option<String>,
}

impl SourcePathParams {
    fn root(self) -> Result<PathBuf, ApiError> {
        required(self.source_absolute_path, "sourceAbsolutePath").map(PathBuf::from)
    }
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<DevServerError> for ApiError {
    fn from(err: DevServerError) -> Self {
        match err {
            DevServerError::NotRunning => ApiError::Conflict(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

fn required(value: Option<String>, name: &str) -> Result<String, ApiError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("Missing \"{}\" parameter.", name)))
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/processPrompt", post(process_prompt))
        .route("/api/commits", get(list_commits))
        .route("/api/sourceFiles", get(list_source_files))
        .route("/api/revertLastCommit", post(revert_last_commit))
        .route("/api/devServer/start", post(start_dev_server))
        .route("/api/devServer/stop", post(stop_dev_server))
        .route("/api/devServer/status", get(dev_server_status))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn process_prompt(
    State(state): State<SharedState>,
    Json(req): Json<ProcessPromptRequest>,
) -> Result<Response, ApiError> {
    let prompt = required(req.prompt, "prompt")?;
    let root = PathBuf::from(required(req.source_absolute_path, "sourceAbsolutePath")?);
    let selected = req
        .selected_file_paths
        .filter(|paths| !paths.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing \"selectedFilePaths\" parameter.".into()))?;

    debug!(root = %root.display(), files = selected.len(), "/api/processPrompt");
    let result = state.processor.process(&prompt, &root, &selected).await;
    let status = if result.is_success() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    Ok((status, Json(result)).into_response())
}

async fn list_commits(
    State(state): State<SharedState>,
    Query(params): Query<SourcePathParams>,
) -> Result<impl IntoResponse, ApiError> {
    let root = params.root()?;
    let commits = state
        .processor
        .recent_commits(&root, state.recent_commits)
        .await?;
    Ok(Json(commits))
}

async fn list_source_files(
    State(state): State<SharedState>,
    Query(params): Query<SourcePathParams>,
) -> Result<impl IntoResponse, ApiError> {
    let root = params.root()?;
    let files = source_files(&state.collector, &root).await?;
    Ok(Json(files))
}

async fn revert_last_commit(
    State(state): State<SharedState>,
    Json(params): Json<SourcePathParams>,
) -> Result<impl IntoResponse, ApiError> {
    let root = params.root()?;
    let record = state.processor.revert_last(&root).await.map_err(|e| {
        warn!(root = %root.display(), error = %e, "Revert failed");
        ApiError::from(e)
    })?;
    Ok(Json(record))
}

async fn start_dev_server(
    State(state): State<SharedState>,
    Json(params): Json<SourcePathParams>,
) -> Result<impl IntoResponse, ApiError> {
    let root = params.root()?;
    let server = state.dev_servers.get(&root).await;
    server.start(&root).await?;
    Ok(Json(status_body(server.state())))
}

async fn stop_dev_server(
    State(state): State<SharedState>,
    Json(params): Json<SourcePathParams>,
) -> Result<impl IntoResponse, ApiError> {
    let root = params.root()?;
    let server = state
        .dev_servers
        .existing(&root)
        .await
        .ok_or(DevServerError::NotRunning)?;
    server.stop().await?;
    Ok(Json(status_body(server.state())))
}

async fn dev_server_status(
    State(state): State<SharedState>,
    Query(params): Query<SourcePathParams>,
) -> Result<impl IntoResponse, ApiError> {
    let root = params.root()?;
    let current = match state.dev_servers.existing(&root).await {
        Some(server) => server.state(),
        None => DevServerState::Stopped,
    };
    Ok(Json(status_body(current)))
}

fn status_body(state: DevServerState) -> serde_json::Value {
    serde_json::json!({ "state": state })
}
