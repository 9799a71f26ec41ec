//! Domain models for knowledge-sync.
//!
//! # Core Concepts
//!
//! ## Persistent Entities
//!
//! - [`ProjectManifest`]: What a knowledge store believes it holds for one project,
//!   keyed by normalized relative path. Created on first ingestion, dropped with the project.
//! - [`ReconcileRun`]: Append-only log of reconciliations applied to a project.
//! - [`Document`]: The indexed content of one file, keyed by (project, path).
//!
//! ## Transient Entities
//!
//! These are computed per reconciliation and never stored:
//!
//! - [`FilesystemSnapshot`]: Fingerprints of a project's files at walk time.
//! - [`ReconciliationPlan`]: The add/update/remove delta between manifest and snapshot.
//! - [`ApplyResult`]: Which planned paths were applied and which failed.

mod document;
mod manifest;
mod plan;
mod project;
mod snapshot;

pub use document::*;
pub use manifest::*;
pub use plan::*;
pub use project::*;
pub use snapshot::*;
