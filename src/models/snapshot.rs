use std::collections::BTreeMap;

use crate::error::FingerprintError;

use super::Fingerprint;

/// A transient enumeration of a project's files at reconciliation time.
///
/// Each normalized relative path maps to its fingerprint, or to the error
/// that prevented fingerprinting it. Snapshots are never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilesystemSnapshot {
    entries: BTreeMap<String, Result<Fingerprint, FingerprintError>>,
}

impl FilesystemSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, fingerprint: Fingerprint) {
        self.entries.insert(path.into(), Ok(fingerprint));
    }

    pub fn insert_error(&mut self, path: impl Into<String>, error: FingerprintError) {
        self.entries.insert(path.into(), Err(error));
    }

    pub fn get(&self, path: &str) -> Option<&Result<Fingerprint, FingerprintError>> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Result<Fingerprint, FingerprintError>)> {
        self.entries.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn error_count(&self) -> usize {
        self.entries.values().filter(|e| e.is_err()).count()
    }
}

impl FromIterator<(String, Fingerprint)> for FilesystemSnapshot {
    fn from_iter<T: IntoIterator<Item = (String, Fingerprint)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().map(|(p, f)| (p, Ok(f))).collect(),
        }
    }
}
