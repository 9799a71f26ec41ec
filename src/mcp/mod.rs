//! MCP server exposing knowledge-store reconciliation as tools.

mod types;

use std::path::PathBuf;

pub use types::*;

use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use serde::Serialize;

use crate::config::Config;
use crate::db::Database;
use crate::error::ReconcileError;
use crate::reconcile::Reconciler;

const DEFAULT_RUN_LIMIT: u32 = 5;

#[derive(Clone)]
pub struct McpServer {
    db: Database,
    reconciler: Reconciler,
    config: Config,
    tool_router: ToolRouter<Self>,
}

#[derive(Clone, Copy)]
enum SyncMode {
    Preview,
    Reconcile,
    Rebuild,
}

impl McpServer {
    pub fn new(db: Database, config: Config) -> Self {
        Self::with_reconciler(crate::reconciler_for(&db), db, config)
    }

    pub fn with_reconciler(reconciler: Reconciler, db: Database, config: Config) -> Self {
        Self {
            reconciler,
            db,
            config,
            tool_router: Self::tool_router(),
        }
    }

    fn reconcile_error(e: ReconcileError) -> McpError {
        match e {
            ReconcileError::Walk(msg) => McpError::invalid_params(msg, None),
            other => McpError::internal_error(other.to_string(), None),
        }
    }

    fn to_json<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    fn check_project_id(project_id: &str) -> Result<(), McpError> {
        if project_id.trim().is_empty() {
            return Err(McpError::invalid_params("project_id must not be empty", None));
        }
        Ok(())
    }

    // ============================================================
    // Tool logic - shared by the tool handlers and tests
    // ============================================================

    pub fn list_project_infos(&self) -> Result<ProjectListResponse, McpError> {
        let summaries = self
            .db
            .get_project_summaries()
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(ProjectListResponse {
            projects: summaries.iter().map(ProjectInfo::from).collect(),
        })
    }

    pub async fn project_status(
        &self,
        project_id: &str,
        runs: Option<u32>,
    ) -> Result<ProjectStatusResponse, McpError> {
        Self::check_project_id(project_id)?;
        // Goes through the reconciler so a corrupt manifest is reset here too.
        let reconciler = self.reconciler.clone();
        let id = project_id.to_string();
        Self::blocking(move || reconciler.state(&id)).await?;

        let summary = self
            .db
            .get_project_summary(project_id)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        let recent = self
            .db
            .get_runs(project_id, runs.unwrap_or(DEFAULT_RUN_LIMIT) as usize)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;

        Ok(ProjectStatusResponse {
            project: ProjectInfo::from(&summary),
            recent_runs: recent.iter().map(RunInfo::from).collect(),
        })
    }

    pub async fn preview(&self, req: SyncRequest) -> Result<PlanResponse, McpError> {
        let project_id = req.project_id.clone();
        match self.sync(req, SyncMode::Preview).await? {
            SyncResult::Plan(plan) => Ok(PlanResponse::new(&project_id, plan)),
            SyncResult::Outcome(_) => Err(McpError::internal_error("unexpected sync result", None)),
        }
    }

    pub async fn reconcile(&self, req: SyncRequest) -> Result<ReconcileResponse, McpError> {
        match self.sync(req, SyncMode::Reconcile).await? {
            SyncResult::Outcome(outcome) => Ok(outcome.into()),
            SyncResult::Plan(_) => Err(McpError::internal_error("unexpected sync result", None)),
        }
    }

    pub async fn rebuild(&self, req: SyncRequest) -> Result<ReconcileResponse, McpError> {
        match self.sync(req, SyncMode::Rebuild).await? {
            SyncResult::Outcome(outcome) => Ok(outcome.into()),
            SyncResult::Plan(_) => Err(McpError::internal_error("unexpected sync result", None)),
        }
    }

    pub async fn remove_project(&self, project_id: &str) -> Result<DropResponse, McpError> {
        Self::check_project_id(project_id)?;
        let reconciler = self.reconciler.clone();
        let id = project_id.to_string();
        Self::blocking(move || reconciler.drop_project(&id)).await?;
        Ok(DropResponse {
            project_id: project_id.to_string(),
            state: "uninitialized".to_string(),
        })
    }

    /// Walk and reconcile on the blocking pool.
    async fn sync(&self, req: SyncRequest, mode: SyncMode) -> Result<SyncResult, McpError> {
        Self::check_project_id(&req.project_id)?;
        let root = PathBuf::from(&req.root);
        if !root.is_absolute() {
            return Err(McpError::invalid_params(
                format!("root must be an absolute path: {}", req.root),
                None,
            ));
        }
        let walker = self
            .config
            .walker(&req.exclude)
            .map_err(|e| McpError::invalid_params(format!("{:#}", e), None))?;

        let reconciler = self.reconciler.clone();
        let project_id = req.project_id;
        Self::blocking(move || match mode {
            SyncMode::Preview => reconciler
                .preview_directory(&project_id, &root, &walker)
                .map(SyncResult::Plan),
            SyncMode::Reconcile => reconciler
                .sync_directory(&project_id, &root, &walker, None)
                .map(SyncResult::Outcome),
            SyncMode::Rebuild => reconciler
                .rebuild_directory(&project_id, &root, &walker, None)
                .map(SyncResult::Outcome),
        })
        .await
    }

    /// Run reconciler work on the blocking pool; it may wait on a project lock.
    async fn blocking<T, F>(f: F) -> Result<T, McpError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, ReconcileError> + Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?
            .map_err(Self::reconcile_error)
    }
}

enum SyncResult {
    Plan(crate::models::ReconciliationPlan),
    Outcome(crate::models::ReconcileOutcome),
}

#[tool_router]
impl McpServer {
    // ============================================================
    // Discovery Tools
    // ============================================================

    #[tool(
        description = "List every project known to the knowledge store with its state ('ingested' or 'uninitialized'), tracked file count and manifest generation."
    )]
    async fn list_projects(&self) -> Result<CallToolResult, McpError> {
        Self::to_json(&self.list_project_infos()?)
    }

    #[tool(
        description = "Show one project's store status: state, tracked file count, manifest generation and the most recent reconciliation runs (outcome, counts, errors)."
    )]
    async fn get_project_status(
        &self,
        params: Parameters<ProjectStatusRequest>,
    ) -> Result<CallToolResult, McpError> {
        let req = params.0;
        Self::to_json(&self.project_status(&req.project_id, req.runs).await?)
    }

    // ============================================================
    // Reconciliation Tools
    // ============================================================

    #[tool(
        description = "Dry run: walk the project root and report which files would be added, updated or removed from the knowledge store. Changes nothing."
    )]
    async fn preview_reconciliation(
        &self,
        params: Parameters<SyncRequest>,
    ) -> Result<CallToolResult, McpError> {
        Self::to_json(&self.preview(params.0).await?)
    }

    #[tool(
        description = "Bring the knowledge store up to date with the project's files. Only new, changed and deleted files are touched; unchanged files are not re-indexed. Files that fail are reported and retried on the next call. Safe to re-run."
    )]
    async fn reconcile_project(
        &self,
        params: Parameters<SyncRequest>,
    ) -> Result<CallToolResult, McpError> {
        Self::to_json(&self.reconcile(params.0).await?)
    }

    #[tool(
        description = "Drop everything stored for the project and re-ingest all of its files from scratch. Use after a corrupt manifest or for a periodic clean rebuild."
    )]
    async fn rebuild_project(
        &self,
        params: Parameters<SyncRequest>,
    ) -> Result<CallToolResult, McpError> {
        Self::to_json(&self.rebuild(params.0).await?)
    }

    #[tool(
        description = "Remove all knowledge store rows tagged with the project and delete its manifest. The project returns to 'uninitialized'."
    )]
    async fn drop_project(
        &self,
        params: Parameters<ProjectRequest>,
    ) -> Result<CallToolResult, McpError> {
        Self::to_json(&self.remove_project(&params.0.project_id).await?)
    }
}

#[tool_handler]
impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: rmcp::model::Implementation {
                name: "knowledge-sync".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            instructions: Some(
                r#"knowledge-sync keeps a per-project knowledge store in step with the project's files.

Each project is identified by a service name (project_id). The store tracks a manifest of
every ingested file and its content fingerprint, so only new, changed and deleted files are
re-processed.

TYPICAL FLOW:
1. preview_reconciliation to see what is stale
2. reconcile_project to apply it
3. get_project_status to check the outcome and any files waiting for retry

RECOVERY:
- A failed file is retried automatically on the next reconcile_project.
- If the store was unavailable, simply call reconcile_project again; it is safe to repeat.
- If a manifest is reported corrupt, the project has been reset: run rebuild_project.
- drop_project removes a project entirely."#
                    .into(),
            ),
            ..Default::default()
        }
    }
}

pub async fn run_stdio_server(db: Database, config: Config) -> anyhow::Result<()> {
    use tokio::io::{stdin, stdout};

    tracing::info!("Starting MCP server via stdio");

    let service = McpServer::new(db, config);
    let server = service.serve((stdin(), stdout())).await?;

    let quit_reason = server.waiting().await?;
    tracing::info!("MCP server stopped: {:?}", quit_reason);

    Ok(())
}
