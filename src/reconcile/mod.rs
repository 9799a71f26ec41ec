//! Freshness reconciliation: bring a knowledge store back in sync with a
//! project's files without re-indexing unchanged content.
//!
//! The three primitives are free functions over the
//! collaborator traits:
//!
//! - [`compute_plan`]: pure diff of a manifest against a snapshot
//! - [`apply_plan`]: drives the indexer and mirrors successes into the manifest
//! - [`drop_project`]: removes a project's rows and manifest
//!
//! [`Reconciler`] wires them to a registry and serialises work per project.

mod collab;
mod service;

use std::cmp::Ordering;

use tracing::{debug, error, info, warn};

pub use collab::*;
pub use service::*;

use crate::error::{IndexerError, ReconcileError};
use crate::models::*;

/// Diff `manifest` against `snapshot`.
///
/// Both inputs are ordered by path, so this is a single merge pass, linear
/// in their combined size. A path that is present in the snapshot but could
/// not be fingerprinted goes to `to_remove`: dropping stale content is
/// preferred over indexing something we could not read.
pub fn compute_plan(manifest: &ProjectManifest, snapshot: &FilesystemSnapshot) -> ReconciliationPlan {
    let mut plan = ReconciliationPlan::default();
    let mut known = manifest.entries.iter().peekable();
    let mut current = snapshot.iter().peekable();

    loop {
        let order = match (known.peek(), current.peek()) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some((held, _)), Some((seen, _))) => held.as_str().cmp(seen.as_str()),
        };

        match order {
            // Only in the manifest: gone from disk.
            Ordering::Less => {
                if let Some((path, _)) = known.next() {
                    plan.to_remove.push(path.clone());
                }
            }
            // Only on disk.
            Ordering::Greater => {
                if let Some((path, entry)) = current.next() {
                    match entry {
                        Ok(fingerprint) => {
                            plan.to_add.push(path.clone());
                            plan.fingerprints.insert(path.clone(), fingerprint.clone());
                        }
                        Err(e) => {
                            plan.to_remove.push(path.clone());
                            plan.unreadable.insert(path.clone(), e.to_string());
                        }
                    }
                }
            }
            Ordering::Equal => {
                if let (Some((path, held)), Some((_, entry))) = (known.next(), current.next()) {
                    match entry {
                        Ok(fingerprint) if *fingerprint == held.fingerprint => {
                            plan.unchanged.push(path.clone());
                        }
                        Ok(fingerprint) => {
                            plan.to_update.push(path.clone());
                            plan.fingerprints.insert(path.clone(), fingerprint.clone());
                        }
                        Err(e) => {
                            plan.to_remove.push(path.clone());
                            plan.unreadable.insert(path.clone(), e.to_string());
                        }
                    }
                }
            }
        }
    }

    plan
}

/// Everything [`apply_plan`] needs besides the plan and the manifest.
pub struct ApplyContext<'a> {
    pub project_id: &'a str,
    pub source: &'a dyn ContentSource,
    pub indexer: &'a dyn ContentIndexer,
    pub fingerprinter: &'a dyn Fingerprinter,
    pub cancel: Option<&'a CancelFlag>,
}

enum Upsert {
    Add,
    Update,
}

/// Apply `plan` through the indexer, mirroring every successful path into
/// `manifest`.
///
/// Content is re-read and re-fingerprinted at apply time, and the manifest
/// records what was actually indexed. A path that fails is left untouched in
/// the manifest so the next reconciliation retries it. When the indexer
/// becomes unavailable the remaining paths are skipped and
/// [`ReconcileError::IndexerUnavailable`] is returned; `manifest` still
/// reflects the paths applied before the failure.
pub fn apply_plan(
    plan: &ReconciliationPlan,
    ctx: &ApplyContext<'_>,
    manifest: &mut ProjectManifest,
) -> Result<ApplyResult, ReconcileError> {
    let generation = manifest.advance();
    let mut result = ApplyResult::default();

    let upserts = plan
        .to_add
        .iter()
        .map(|p| (p, Upsert::Add))
        .chain(plan.to_update.iter().map(|p| (p, Upsert::Update)));

    for (path, kind) in upserts {
        if is_cancelled(ctx) {
            result.cancelled = true;
            return Ok(result);
        }

        let content = match ctx.source.read(path) {
            Ok(content) => content,
            Err(e) => {
                warn!(project = ctx.project_id, path = %path, "Failed to read file: {}", e);
                result.failed.push(FailedPath {
                    path: path.clone(),
                    reason: format!("unreadable: {}", e),
                });
                continue;
            }
        };

        let fingerprint = ctx.fingerprinter.fingerprint(&content);
        if plan.fingerprints.get(path) != Some(&fingerprint) {
            debug!(project = ctx.project_id, path = %path, "Content changed since snapshot");
        }

        match ctx.indexer.upsert(ctx.project_id, path, &content) {
            Ok(()) => {
                manifest.confirm(path.clone(), fingerprint);
                debug!(project = ctx.project_id, path = %path, generation, "Indexed");
                match kind {
                    Upsert::Add => result.added.push(path.clone()),
                    Upsert::Update => result.updated.push(path.clone()),
                }
            }
            Err(IndexerError::Rejected { reason, .. }) => {
                warn!(project = ctx.project_id, path = %path, "Indexer rejected file: {}", reason);
                result.failed.push(FailedPath {
                    path: path.clone(),
                    reason,
                });
            }
            Err(IndexerError::Unavailable(msg)) => {
                return Err(abort(ctx, &result, msg));
            }
        }
    }

    for path in &plan.to_remove {
        if is_cancelled(ctx) {
            result.cancelled = true;
            return Ok(result);
        }

        match ctx.indexer.delete_path(ctx.project_id, path) {
            Ok(()) => {
                manifest.forget(path);
                debug!(project = ctx.project_id, path = %path, "Removed");
                result.removed.push(path.clone());
            }
            Err(IndexerError::Rejected { reason, .. }) => {
                warn!(project = ctx.project_id, path = %path, "Indexer refused removal: {}", reason);
                result.failed.push(FailedPath {
                    path: path.clone(),
                    reason,
                });
            }
            Err(IndexerError::Unavailable(msg)) => {
                return Err(abort(ctx, &result, msg));
            }
        }
    }

    info!(
        project = ctx.project_id,
        generation,
        added = result.added.len(),
        updated = result.updated.len(),
        removed = result.removed.len(),
        failed = result.failed.len(),
        "Applied reconciliation plan"
    );

    Ok(result)
}

fn is_cancelled(ctx: &ApplyContext<'_>) -> bool {
    let cancelled = ctx.cancel.is_some_and(CancelFlag::is_cancelled);
    if cancelled {
        info!(project = ctx.project_id, "Reconciliation cancelled");
    }
    cancelled
}

fn abort(ctx: &ApplyContext<'_>, partial: &ApplyResult, msg: String) -> ReconcileError {
    error!(
        project = ctx.project_id,
        applied = partial.applied_count(),
        "Indexer unavailable, aborting plan: {}",
        msg
    );
    ReconcileError::IndexerUnavailable(msg)
}

/// Remove every store row for `project_id` and forget its manifest.
///
/// Store rows go first: if dropping the manifest then fails, the store
/// holds nothing the manifest doesn't know about, and re-running finishes
/// the job.
pub fn drop_project(
    project_id: &str,
    indexer: &dyn ContentIndexer,
    registry: &dyn ManifestRegistry,
) -> Result<(), ReconcileError> {
    indexer
        .delete_project(project_id)
        .map_err(|e| ReconcileError::IndexerUnavailable(e.to_string()))?;
    registry.drop(project_id)?;
    info!(project = project_id, "Dropped project from knowledge store");
    Ok(())
}
