//! Filesystem walking: produce a [`FilesystemSnapshot`] of a project tree.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::error::{FingerprintError, ReconcileError};
use crate::models::{normalize_path, FilesystemSnapshot};
use crate::reconcile::{ContentSource, Fingerprinter};

/// Dependency, VCS and build output directories skipped by default.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "__pycache__",
    ".venv",
    "venv",
    "dist",
    "build",
    ".mypy_cache",
    ".pytest_cache",
];

/// Files larger than this are not fingerprinted.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 2 * 1024 * 1024;

/// Walks a project root and fingerprints every regular file.
///
/// Exclusion patterns are globs matched against directory *names*: a
/// directory whose name matches is pruned with everything under it.
/// Symlinks are not followed.
#[derive(Debug, Clone)]
pub struct FilesystemWalker {
    patterns: Vec<String>,
    excludes: GlobSet,
    max_file_bytes: u64,
}

impl FilesystemWalker {
    pub fn new<I, S>(patterns: I, max_file_bytes: u64) -> Result<Self, globset::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = GlobSetBuilder::new();
        let mut kept = Vec::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            builder.add(Glob::new(pattern)?);
            kept.push(pattern.to_string());
        }
        Ok(Self {
            patterns: kept,
            excludes: builder.build()?,
            max_file_bytes,
        })
    }

    pub fn with_defaults() -> Result<Self, globset::Error> {
        Self::new(DEFAULT_EXCLUDES, DEFAULT_MAX_FILE_BYTES)
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_bytes
    }

    fn is_excluded_dir(&self, name: &std::ffi::OsStr) -> bool {
        self.excludes.is_match(Path::new(name))
    }

    /// Fingerprint every file under `root`.
    ///
    /// Files that cannot be read, or exceed the size limit, are recorded as
    /// errors rather than omitted, so reconciliation can drop their stale
    /// content. Edits made while the walk runs may or may not be observed.
    pub fn snapshot(
        &self,
        root: &Path,
        fingerprinter: &dyn Fingerprinter,
    ) -> Result<FilesystemSnapshot, ReconcileError> {
        if !root.is_dir() {
            return Err(ReconcileError::Walk(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let mut snapshot = FilesystemSnapshot::new();
        let walk = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0 || !(e.file_type().is_dir() && self.is_excluded_dir(e.file_name()))
            });

        for entry in walk {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    // Files under an unreadable directory are absent from the
                    // snapshot and will be removed from the store.
                    tracing::warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            let Some(key) = normalize_path(relative) else {
                tracing::warn!("Skipping path that cannot be normalized: {}", relative.display());
                continue;
            };

            match self.read_limited(entry.path()) {
                Ok(content) => snapshot.insert(key, fingerprinter.fingerprint(&content)),
                Err(e) => {
                    tracing::debug!(path = %key, "Cannot fingerprint: {}", e);
                    snapshot.insert_error(key, e);
                }
            }
        }

        tracing::debug!(
            root = %root.display(),
            files = snapshot.len(),
            errors = snapshot.error_count(),
            "Walked project tree"
        );
        Ok(snapshot)
    }

    fn read_limited(&self, path: &Path) -> Result<Vec<u8>, FingerprintError> {
        let size = fs::metadata(path)?.len();
        if size > self.max_file_bytes {
            return Err(FingerprintError::TooLarge {
                size,
                limit: self.max_file_bytes,
            });
        }
        Ok(fs::read(path)?)
    }
}

/// Reads planned paths from a project root on disk.
#[derive(Debug, Clone)]
pub struct FsContentSource {
    root: PathBuf,
    max_file_bytes: u64,
}

impl FsContentSource {
    pub fn new(root: impl Into<PathBuf>, max_file_bytes: u64) -> Self {
        Self {
            root: root.into(),
            max_file_bytes,
        }
    }
}

impl ContentSource for FsContentSource {
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        let full = path.split('/').fold(self.root.clone(), |acc, part| acc.join(part));
        let size = fs::metadata(&full)?.len();
        if size > self.max_file_bytes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("file is {} bytes, limit is {}", size, self.max_file_bytes),
            ));
        }
        fs::read(full)
    }
}
