//! knowledge-sync keeps per-project knowledge stores fresh.
//!
//! A project's files are walked into a [`models::FilesystemSnapshot`],
//! diffed against the persisted [`models::ProjectManifest`], and only the
//! added, changed and deleted files are pushed to the store. See
//! [`reconcile`] for the core operations.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod mcp;
pub mod models;
pub mod reconcile;
pub mod walker;

use std::sync::Arc;

use crate::db::Database;
use crate::reconcile::{Blake3Fingerprinter, Reconciler};

/// A reconciler backed by `db` for both manifests and content.
pub fn reconciler_for(db: &Database) -> Reconciler {
    Reconciler::new(
        Arc::new(db.clone()),
        Arc::new(db.clone()),
        Arc::new(Blake3Fingerprinter),
    )
}
