//! Request and response types for MCP tools.

use rmcp::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::models::{ApplyResult, ProjectSummary, ReconcileOutcome, ReconcileRun, ReconciliationPlan};

// ============================================================
// Request Types
// ============================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ProjectRequest {
    #[schemars(description = "The project identifier (service name) the knowledge store rows are tagged with")]
    pub project_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ProjectStatusRequest {
    #[schemars(description = "The project identifier (service name)")]
    pub project_id: String,
    #[schemars(description = "How many recent reconciliation runs to include (default 5)")]
    #[serde(default)]
    pub runs: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SyncRequest {
    #[schemars(description = "The project identifier (service name) to reconcile")]
    pub project_id: String,
    #[schemars(description = "Absolute path to the project's root directory")]
    pub root: String,
    #[schemars(
        description = "Extra directory-name glob patterns to skip, on top of the configured defaults (e.g. 'vendor', '*.egg-info')"
    )]
    #[serde(default)]
    pub exclude: Vec<String>,
}

// ============================================================
// Response Types
// ============================================================

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ProjectInfo {
    pub project_id: String,
    /// 'uninitialized' or 'ingested'
    pub state: String,
    pub file_count: usize,
    pub generation: u64,
    pub updated_at: Option<String>,
}

impl From<&ProjectSummary> for ProjectInfo {
    fn from(s: &ProjectSummary) -> Self {
        Self {
            project_id: s.project_id.clone(),
            state: s.state.as_str().to_string(),
            file_count: s.file_count,
            generation: s.generation,
            updated_at: s.updated_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ProjectListResponse {
    pub projects: Vec<ProjectInfo>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RunInfo {
    pub id: String,
    pub started_at: String,
    pub finished_at: String,
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub failed: usize,
    pub outcome: String,
    pub error: Option<String>,
}

impl From<&ReconcileRun> for RunInfo {
    fn from(r: &ReconcileRun) -> Self {
        Self {
            id: r.id.to_string(),
            started_at: r.started_at.to_rfc3339(),
            finished_at: r.finished_at.to_rfc3339(),
            added: r.added,
            updated: r.updated,
            removed: r.removed,
            failed: r.failed,
            outcome: r.outcome.as_str().to_string(),
            error: r.error.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ProjectStatusResponse {
    #[serde(flatten)]
    pub project: ProjectInfo,
    pub recent_runs: Vec<RunInfo>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct UnreadableFile {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct PlanResponse {
    pub project_id: String,
    pub to_add: Vec<String>,
    pub to_update: Vec<String>,
    pub to_remove: Vec<String>,
    pub unchanged_count: usize,
    pub unreadable: Vec<UnreadableFile>,
}

impl PlanResponse {
    pub fn new(project_id: &str, plan: ReconciliationPlan) -> Self {
        Self {
            project_id: project_id.to_string(),
            unchanged_count: plan.unchanged.len(),
            unreadable: plan
                .unreadable
                .into_iter()
                .map(|(path, reason)| UnreadableFile { path, reason })
                .collect(),
            to_add: plan.to_add,
            to_update: plan.to_update,
            to_remove: plan.to_remove,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct FailedFile {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ReconcileResponse {
    pub project_id: String,
    /// Manifest generation after this reconciliation
    pub generation: u64,
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged_count: usize,
    /// Files that could not be applied; they will be retried next time
    pub failed: Vec<FailedFile>,
    pub cancelled: bool,
}

impl From<ReconcileOutcome> for ReconcileResponse {
    fn from(outcome: ReconcileOutcome) -> Self {
        let ApplyResult {
            added,
            updated,
            removed,
            failed,
            cancelled,
        } = outcome.result;
        Self {
            project_id: outcome.project_id,
            generation: outcome.generation,
            added,
            updated,
            removed,
            unchanged_count: outcome.plan.unchanged.len(),
            failed: failed
                .into_iter()
                .map(|f| FailedFile {
                    path: f.path,
                    reason: f.reason,
                })
                .collect(),
            cancelled,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct DropResponse {
    pub project_id: String,
    pub state: String,
}
