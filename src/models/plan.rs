use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Fingerprint;

/// The delta needed to bring a knowledge store in line with a snapshot.
///
/// Every path of the manifest and snapshot lands in exactly one of
/// `to_add`, `to_update`, `to_remove` or `unchanged`. Lists are sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationPlan {
    /// In the snapshot, not in the manifest.
    pub to_add: Vec<String>,
    /// In both, with differing fingerprints.
    pub to_update: Vec<String>,
    /// In the manifest only, or unreadable in the snapshot.
    pub to_remove: Vec<String>,
    /// In both with identical fingerprints. No action needed.
    pub unchanged: Vec<String>,
    /// Snapshot fingerprint for each add/update path.
    #[serde(default)]
    pub fingerprints: BTreeMap<String, Fingerprint>,
    /// Why each unreadable snapshot path could not be fingerprinted.
    #[serde(default)]
    pub unreadable: BTreeMap<String, String>,
}

impl ReconciliationPlan {
    /// True when nothing needs to be added, updated or removed.
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_update.is_empty() && self.to_remove.is_empty()
    }
}

/// A path whose application failed and will be retried next reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedPath {
    pub path: String,
    pub reason: String,
}

/// Outcome of applying a plan.
///
/// Only paths listed in `added`, `updated` and `removed` were mirrored into
/// the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyResult {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
    pub failed: Vec<FailedPath>,
    /// Application stopped early because cancellation was requested.
    pub cancelled: bool,
}

impl ApplyResult {
    pub fn applied_count(&self) -> usize {
        self.added.len() + self.updated.len() + self.removed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }

    pub fn failed_paths(&self) -> impl Iterator<Item = &str> {
        self.failed.iter().map(|f| f.path.as_str())
    }
}

/// A plan together with the result of applying it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub project_id: String,
    pub plan: ReconciliationPlan,
    pub result: ApplyResult,
    pub generation: u64,
}
