use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a project in the knowledge store.
///
/// - `Uninitialized`: no manifest exists (never ingested, or dropped)
/// - `Ingested`: a manifest exists and reflects confirmed store content
///
/// There is no durable "partially ingested" state; an interrupted
/// reconciliation leaves the manifest reflecting only applied paths.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProjectState {
    Uninitialized,
    Ingested,
}

impl ProjectState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Ingested => "ingested",
        }
    }
}

impl fmt::Display for ProjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a reconciliation run ended.
///
/// - `Completed`: every planned path was applied
/// - `Partial`: some paths failed and will be retried
/// - `Cancelled`: stopped early on request
/// - `Failed`: aborted by a store or registry error
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Partial,
    Cancelled,
    Failed,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for RunOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completed" => Ok(Self::Completed),
            "partial" => Ok(Self::Partial),
            "cancelled" => Ok(Self::Cancelled),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown run outcome '{}'", other)),
        }
    }
}

/// An append-only log entry recording one reconciliation.
///
/// This is the audit trail for a project's store: what was changed, when,
/// and whether anything is waiting for a retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileRun {
    pub id: Uuid,
    pub project_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub failed: usize,
    pub outcome: RunOutcome,
    pub error: Option<String>,
}

/// A project with its current store status, used for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub project_id: String,
    pub state: ProjectState,
    pub file_count: usize,
    pub generation: u64,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_run: Option<ReconcileRun>,
}
