//! Error taxonomy for reconciliation.
//!
//! Per-path problems ([`FingerprintError`], [`IndexerError::Rejected`]) are
//! reported in the apply result and never abort a reconciliation. Store and
//! registry problems surface as a single [`ReconcileError`] for the whole
//! operation.

use thiserror::Error;

/// A single file could not be fingerprinted. Non-fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FingerprintError {
    #[error("unreadable: {0}")]
    Io(String),
    #[error("file is {size} bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },
}

impl From<std::io::Error> for FingerprintError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Errors reported by a content indexer.
#[derive(Error, Debug)]
pub enum IndexerError {
    /// The store cannot be reached. Aborts the current application.
    #[error("indexer unavailable: {0}")]
    Unavailable(String),
    /// The store refused one path. Only that path fails.
    #[error("indexer rejected '{path}': {reason}")]
    Rejected { path: String, reason: String },
}

/// Errors reported by a manifest registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("manifest for '{project_id}' is corrupt: {reason}")]
    Corrupt { project_id: String, reason: String },
    #[error("manifest registry error: {0}")]
    Backend(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    /// The indexer or store went away mid-application. Paths applied before
    /// the failure are kept; re-running is safe.
    #[error("indexer unavailable: {0}")]
    IndexerUnavailable(String),
    /// The persisted manifest could not be trusted. The project has been
    /// reset and needs a full re-ingestion.
    #[error("manifest for '{project_id}' is corrupt ({reason}); project reset, full re-ingestion required")]
    ManifestCorrupt { project_id: String, reason: String },
    #[error("manifest registry error: {0}")]
    Registry(String),
    #[error("failed to walk project tree: {0}")]
    Walk(String),
}

impl ReconcileError {
    /// Whether re-running the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::IndexerUnavailable(_) | Self::Registry(_))
    }
}

impl From<RegistryError> for ReconcileError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::Corrupt { project_id, reason } => {
                Self::ManifestCorrupt { project_id, reason }
            }
            RegistryError::Backend(e) => Self::Registry(format!("{:#}", e)),
        }
    }
}
