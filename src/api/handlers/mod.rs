use std::path::PathBuf;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use crate::error::ReconcileError;
use crate::mcp::{PlanResponse, ProjectInfo, ReconcileResponse, RunInfo};
use crate::models::{ProjectState, ReconcileOutcome, ReconciliationPlan};

use super::AppState;

const DEFAULT_RUN_LIMIT: usize = 20;

type ApiError = (StatusCode, String);

// ============================================================
// Error Handling
// ============================================================

/// Log an internal error and return a sanitized response to the client.
fn internal_error(e: impl std::fmt::Display) -> ApiError {
    tracing::error!("Internal error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error".to_string(),
    )
}

fn reconcile_error(e: ReconcileError) -> ApiError {
    match e {
        ReconcileError::Walk(msg) => {
            tracing::warn!("Rejected sync request: {}", msg);
            (StatusCode::BAD_REQUEST, msg)
        }
        ReconcileError::IndexerUnavailable(_) => {
            tracing::warn!("{}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Knowledge store unavailable, retry later".to_string(),
            )
        }
        ReconcileError::ManifestCorrupt { .. } => {
            tracing::warn!("{}", e);
            (StatusCode::CONFLICT, e.to_string())
        }
        ReconcileError::Registry(_) => internal_error(e),
    }
}

fn bad_request(msg: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, msg.into())
}

/// Run reconciler work on the blocking pool; it may wait on a project lock.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ReconcileError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(internal_error)?
        .map_err(reconcile_error)
}

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================
// Projects
// ============================================================

pub async fn list_projects(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProjectInfo>>, ApiError> {
    let summaries = state.db.get_project_summaries().map_err(internal_error)?;
    Ok(Json(summaries.iter().map(ProjectInfo::from).collect()))
}

pub async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProjectInfo>, ApiError> {
    let reconciler = state.reconciler.clone();
    let project_id = id.clone();
    let project_state = blocking(move || reconciler.state(&project_id)).await?;
    if project_state == ProjectState::Uninitialized
        && state.db.get_runs(&id, 1).map_err(internal_error)?.is_empty()
    {
        return Err((StatusCode::NOT_FOUND, "Project not found".to_string()));
    }
    let summary = state.db.get_project_summary(&id).map_err(internal_error)?;
    Ok(Json(ProjectInfo::from(&summary)))
}

pub async fn delete_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let reconciler = state.reconciler;
    blocking(move || reconciler.drop_project(&id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    pub limit: Option<usize>,
}

pub async fn list_runs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<Vec<RunInfo>>, ApiError> {
    let runs = state
        .db
        .get_runs(&id, query.limit.unwrap_or(DEFAULT_RUN_LIMIT))
        .map_err(internal_error)?;
    Ok(Json(runs.iter().map(RunInfo::from).collect()))
}

// ============================================================
// Reconciliation
// ============================================================

#[derive(Debug, Deserialize)]
pub struct SyncBody {
    pub root: String,
    #[serde(default)]
    pub exclude: Vec<String>,
}

enum Mode {
    Plan,
    Reconcile,
    Rebuild,
}

enum Synced {
    Plan(ReconciliationPlan),
    Outcome(ReconcileOutcome),
}

/// Walk the project root and run `mode` on the blocking pool.
async fn run_sync(
    state: AppState,
    id: String,
    body: SyncBody,
    mode: Mode,
) -> Result<Synced, ApiError> {
    if id.trim().is_empty() {
        return Err(bad_request("project id must not be empty"));
    }
    let root = PathBuf::from(&body.root);
    if !root.is_absolute() {
        return Err(bad_request(format!(
            "root must be an absolute path: {}",
            body.root
        )));
    }
    let walker = state
        .config
        .walker(&body.exclude)
        .map_err(|e| bad_request(format!("{:#}", e)))?;

    let reconciler = state.reconciler;
    blocking(move || match mode {
        Mode::Plan => reconciler
            .preview_directory(&id, &root, &walker)
            .map(Synced::Plan),
        Mode::Reconcile => reconciler
            .sync_directory(&id, &root, &walker, None)
            .map(Synced::Outcome),
        Mode::Rebuild => reconciler
            .rebuild_directory(&id, &root, &walker, None)
            .map(Synced::Outcome),
    })
    .await
}

pub async fn plan_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SyncBody>,
) -> Result<Json<PlanResponse>, ApiError> {
    match run_sync(state, id.clone(), body, Mode::Plan).await? {
        Synced::Plan(plan) => Ok(Json(PlanResponse::new(&id, plan))),
        Synced::Outcome(_) => Err(internal_error("unexpected sync result")),
    }
}

pub async fn reconcile_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SyncBody>,
) -> Result<Json<ReconcileResponse>, ApiError> {
    match run_sync(state, id, body, Mode::Reconcile).await? {
        Synced::Outcome(outcome) => Ok(Json(outcome.into())),
        Synced::Plan(_) => Err(internal_error("unexpected sync result")),
    }
}

pub async fn rebuild_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SyncBody>,
) -> Result<Json<ReconcileResponse>, ApiError> {
    match run_sync(state, id, body, Mode::Rebuild).await? {
        Synced::Outcome(outcome) => Ok(Json(outcome.into())),
        Synced::Plan(_) => Err(internal_error("unexpected sync result")),
    }
}
