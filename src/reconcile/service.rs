use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use uuid::Uuid;

use super::{apply_plan, compute_plan, drop_project, ApplyContext};
use super::{CancelFlag, ContentIndexer, ContentSource, Fingerprinter, ManifestRegistry};
use crate::error::{ReconcileError, RegistryError};
use crate::models::*;
use crate::walker::{FilesystemWalker, FsContentSource};

/// Runs reconciliations against one registry and one indexer.
///
/// Only one reconciliation may touch a project's manifest at a time; the
/// project's lock is held from manifest load until the updated manifest is
/// saved. Different projects proceed independently.
#[derive(Clone)]
pub struct Reconciler {
    registry: Arc<dyn ManifestRegistry>,
    indexer: Arc<dyn ContentIndexer>,
    fingerprinter: Arc<dyn Fingerprinter>,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl Reconciler {
    pub fn new(
        registry: Arc<dyn ManifestRegistry>,
        indexer: Arc<dyn ContentIndexer>,
        fingerprinter: Arc<dyn Fingerprinter>,
    ) -> Self {
        Self {
            registry,
            indexer,
            fingerprinter,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn fingerprinter(&self) -> &dyn Fingerprinter {
        self.fingerprinter.as_ref()
    }

    /// Run `f` holding the project's lock.
    ///
    /// The table entry is removed once no other caller holds or waits on it,
    /// so the table only tracks projects with work in flight.
    fn with_project_lock<T>(&self, project_id: &str, f: impl FnOnce() -> T) -> T {
        let lock = {
            let mut locks = self.locks.lock().expect("project lock table poisoned");
            locks
                .entry(project_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let result = {
            let _guard = lock.lock().expect("project lock poisoned");
            f()
        };

        let mut locks = self.locks.lock().expect("project lock table poisoned");
        // One reference in the table, one here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(project_id);
        }
        result
    }

    /// Projects with a reconciliation, preview or drop in flight.
    pub fn active_projects(&self) -> usize {
        self.locks.lock().expect("project lock table poisoned").len()
    }

    /// Load the manifest, resetting the project if it cannot be trusted.
    fn load(&self, project_id: &str) -> Result<Option<ProjectManifest>, ReconcileError> {
        match self.registry.load(project_id) {
            Ok(manifest) => Ok(manifest),
            Err(RegistryError::Corrupt { reason, .. }) => {
                tracing::error!(
                    project = project_id,
                    "Manifest corrupt, resetting project: {}",
                    reason
                );
                drop_project(project_id, self.indexer.as_ref(), self.registry.as_ref())?;
                Err(ReconcileError::ManifestCorrupt {
                    project_id: project_id.to_string(),
                    reason,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn state(&self, project_id: &str) -> Result<ProjectState, ReconcileError> {
        self.with_project_lock(project_id, || -> Result<_, ReconcileError> {
            Ok(match self.load(project_id)? {
                Some(_) => ProjectState::Ingested,
                None => ProjectState::Uninitialized,
            })
        })
    }

    /// Compute what a reconciliation would do, without changing anything.
    pub fn preview(
        &self,
        project_id: &str,
        snapshot: &FilesystemSnapshot,
    ) -> Result<ReconciliationPlan, ReconcileError> {
        self.with_project_lock(project_id, || -> Result<_, ReconcileError> {
            let manifest = self
                .load(project_id)?
                .unwrap_or_else(|| ProjectManifest::empty(project_id));
            Ok(compute_plan(&manifest, snapshot))
        })
    }

    /// Bring the project's store in line with `snapshot`.
    pub fn reconcile(
        &self,
        project_id: &str,
        source: &dyn ContentSource,
        snapshot: &FilesystemSnapshot,
        cancel: Option<&CancelFlag>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        self.with_project_lock(project_id, || -> Result<_, ReconcileError> {
            let manifest = self.load(project_id)?;
            self.reconcile_locked(project_id, manifest, source, snapshot, cancel)
        })
    }

    /// Drop the project and ingest `snapshot` from scratch.
    ///
    /// A full rebuild is a reconciliation against an empty manifest.
    pub fn rebuild(
        &self,
        project_id: &str,
        source: &dyn ContentSource,
        snapshot: &FilesystemSnapshot,
        cancel: Option<&CancelFlag>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        self.with_project_lock(project_id, || -> Result<_, ReconcileError> {
            drop_project(project_id, self.indexer.as_ref(), self.registry.as_ref())?;
            self.reconcile_locked(project_id, None, source, snapshot, cancel)
        })
    }

    /// Remove the project's store rows and manifest.
    pub fn drop_project(&self, project_id: &str) -> Result<(), ReconcileError> {
        self.with_project_lock(project_id, || {
            drop_project(project_id, self.indexer.as_ref(), self.registry.as_ref())
        })
    }

    /// Walk `root` and reconcile the project against it.
    pub fn sync_directory(
        &self,
        project_id: &str,
        root: &Path,
        walker: &FilesystemWalker,
        cancel: Option<&CancelFlag>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let snapshot = walker.snapshot(root, self.fingerprinter.as_ref())?;
        let source = FsContentSource::new(root, walker.max_file_bytes());
        self.reconcile(project_id, &source, &snapshot, cancel)
    }

    /// Walk `root` and rebuild the project from it.
    pub fn rebuild_directory(
        &self,
        project_id: &str,
        root: &Path,
        walker: &FilesystemWalker,
        cancel: Option<&CancelFlag>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let snapshot = walker.snapshot(root, self.fingerprinter.as_ref())?;
        let source = FsContentSource::new(root, walker.max_file_bytes());
        self.rebuild(project_id, &source, &snapshot, cancel)
    }

    /// Walk `root` and preview the plan for it.
    pub fn preview_directory(
        &self,
        project_id: &str,
        root: &Path,
        walker: &FilesystemWalker,
    ) -> Result<ReconciliationPlan, ReconcileError> {
        let snapshot = walker.snapshot(root, self.fingerprinter.as_ref())?;
        self.preview(project_id, &snapshot)
    }

    fn reconcile_locked(
        &self,
        project_id: &str,
        existing: Option<ProjectManifest>,
        source: &dyn ContentSource,
        snapshot: &FilesystemSnapshot,
        cancel: Option<&CancelFlag>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let started_at = Utc::now();
        let was_ingested = existing.is_some();
        let mut manifest = existing.unwrap_or_else(|| ProjectManifest::empty(project_id));

        let plan = compute_plan(&manifest, snapshot);
        tracing::info!(
            project = project_id,
            add = plan.to_add.len(),
            update = plan.to_update.len(),
            remove = plan.to_remove.len(),
            unchanged = plan.unchanged.len(),
            "Computed reconciliation plan"
        );

        let ctx = ApplyContext {
            project_id,
            source,
            indexer: self.indexer.as_ref(),
            fingerprinter: self.fingerprinter.as_ref(),
            cancel,
        };
        let applied = apply_plan(&plan, &ctx, &mut manifest);

        // Persist whatever was applied, even on abort, so the manifest never
        // claims a path the store no longer holds. A project that was never
        // ingested stays uninitialized until something lands in the store.
        let finished = matches!(&applied, Ok(result) if !result.cancelled);
        if finished || was_ingested || !manifest.is_empty() {
            self.registry.save(project_id, &manifest)?;
        }

        match applied {
            Ok(result) => {
                let outcome = if result.cancelled {
                    RunOutcome::Cancelled
                } else if result.failed.is_empty() {
                    RunOutcome::Completed
                } else {
                    RunOutcome::Partial
                };
                self.record(ReconcileRun {
                    id: Uuid::new_v4(),
                    project_id: project_id.to_string(),
                    started_at,
                    finished_at: Utc::now(),
                    added: result.added.len(),
                    updated: result.updated.len(),
                    removed: result.removed.len(),
                    failed: result.failed.len(),
                    outcome,
                    error: None,
                });
                Ok(ReconcileOutcome {
                    project_id: project_id.to_string(),
                    plan,
                    result,
                    generation: manifest.generation,
                })
            }
            Err(e) => {
                self.record(ReconcileRun {
                    id: Uuid::new_v4(),
                    project_id: project_id.to_string(),
                    started_at,
                    finished_at: Utc::now(),
                    added: 0,
                    updated: 0,
                    removed: 0,
                    failed: 0,
                    outcome: RunOutcome::Failed,
                    error: Some(e.to_string()),
                });
                Err(e)
            }
        }
    }

    fn record(&self, run: ReconcileRun) {
        if let Err(e) = self.registry.record_run(&run) {
            tracing::warn!(project = %run.project_id, "Failed to record reconciliation run: {}", e);
        }
    }
}
