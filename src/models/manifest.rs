use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A deterministic, change-sensitive digest of a file's content.
///
/// Opaque to the reconciler: only equality matters, so any caller-supplied
/// [`Fingerprinter`](crate::reconcile::Fingerprinter) format round-trips
/// through the registry. Two files with identical content always share a
/// fingerprint, so unchanged content never triggers an update.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// BLAKE3 digest of `content`.
    pub fn of(content: &[u8]) -> Self {
        Self(blake3::hash(content).to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the knowledge store believes it holds for one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub fingerprint: Fingerprint,
    /// Manifest generation in which this entry was last confirmed.
    pub seen_at: u64,
}

/// Persisted record of the content a knowledge store holds for a project.
///
/// Keyed by normalized relative path. The `generation` counter is a logical
/// clock advanced once per applied plan; entries carry the generation that
/// last confirmed them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectManifest {
    pub project_id: String,
    pub generation: u64,
    pub entries: BTreeMap<String, ManifestEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectManifest {
    /// A manifest for a project that has never been ingested.
    pub fn empty(project_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            project_id: project_id.into(),
            generation: 0,
            entries: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Record `path` as holding `fingerprint` as of the current generation.
    pub fn confirm(&mut self, path: impl Into<String>, fingerprint: Fingerprint) {
        self.entries.insert(
            path.into(),
            ManifestEntry {
                fingerprint,
                seen_at: self.generation,
            },
        );
    }

    pub fn forget(&mut self, path: &str) -> Option<ManifestEntry> {
        self.entries.remove(path)
    }

    /// Advance the logical clock. Returns the new generation.
    pub fn advance(&mut self) -> u64 {
        self.generation += 1;
        self.updated_at = Utc::now();
        self.generation
    }

    /// Check the invariants a loaded manifest must hold.
    pub fn validate(&self) -> Result<(), String> {
        for (path, entry) in &self.entries {
            if entry.fingerprint.is_empty() {
                return Err(format!("entry '{}' has an empty fingerprint", path));
            }
            if entry.seen_at > self.generation {
                return Err(format!(
                    "entry '{}' seen at generation {} beyond manifest generation {}",
                    path, entry.seen_at, self.generation
                ));
            }
            if normalize_path(Path::new(path)).as_deref() != Some(path.as_str()) {
                return Err(format!("entry '{}' is not a normalized path", path));
            }
        }
        Ok(())
    }
}

/// Normalize a project-relative path to the manifest key form.
///
/// Separators become `/`, `.` components are dropped, and the result is
/// case-sensitive. Absolute paths, `..` components and empty paths are
/// rejected.
pub fn normalize_path(path: &Path) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str()?;
                // A Windows-style separator inside a component on Unix.
                parts.extend(
                    part.split('\\')
                        .filter(|p| !p.is_empty() && *p != ".")
                        .map(str::to_string),
                );
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if parts.is_empty() || parts.iter().any(|p| p == "..") {
        return None;
    }
    Some(parts.join("/"))
}
