//! Contracts for the collaborators a reconciliation drives.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{IndexerError, RegistryError};
use crate::models::{Fingerprint, ProjectManifest, ReconcileRun};

/// The knowledge store rows for each project, keyed by (project, path).
///
/// Every operation must be idempotent under repeated identical calls.
pub trait ContentIndexer: Send + Sync {
    /// Compute and store whatever the store keeps for `path`.
    fn upsert(&self, project_id: &str, path: &str, content: &[u8]) -> Result<(), IndexerError>;

    /// Delete the rows for one path. Deleting a missing path succeeds.
    fn delete_path(&self, project_id: &str, path: &str) -> Result<(), IndexerError>;

    /// Delete every row tagged with the project.
    fn delete_project(&self, project_id: &str) -> Result<(), IndexerError>;
}

/// Durable storage for project manifests.
pub trait ManifestRegistry: Send + Sync {
    /// `None` when the project has never been ingested or was dropped.
    fn load(&self, project_id: &str) -> Result<Option<ProjectManifest>, RegistryError>;

    fn save(&self, project_id: &str, manifest: &ProjectManifest) -> Result<(), RegistryError>;

    fn drop(&self, project_id: &str) -> Result<(), RegistryError>;

    /// Identifiers of every project with a manifest, sorted.
    fn list(&self) -> Result<Vec<String>, RegistryError>;

    /// Append a run to the project's reconciliation log.
    fn record_run(&self, _run: &ReconcileRun) -> Result<(), RegistryError> {
        Ok(())
    }
}

/// Where apply reads the current content of a planned path.
pub trait ContentSource: Send + Sync {
    fn read(&self, path: &str) -> io::Result<Vec<u8>>;
}

/// Deterministic content digest used for change detection.
pub trait Fingerprinter: Send + Sync {
    fn fingerprint(&self, content: &[u8]) -> Fingerprint;
}

impl<F> Fingerprinter for F
where
    F: Fn(&[u8]) -> Fingerprint + Send + Sync,
{
    fn fingerprint(&self, content: &[u8]) -> Fingerprint {
        self(content)
    }
}

/// BLAKE3, hex encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct Blake3Fingerprinter;

impl Fingerprinter for Blake3Fingerprinter {
    fn fingerprint(&self, content: &[u8]) -> Fingerprint {
        Fingerprint::of(content)
    }
}

/// Cooperative cancellation for an in-flight apply.
///
/// Checked between paths: the path being applied when `cancel` is called
/// still completes.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
