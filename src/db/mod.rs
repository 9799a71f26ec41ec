mod schema;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::{IndexerError, RegistryError};
use crate::models::*;
use crate::reconcile::{ContentIndexer, ManifestRegistry};

/// SQLite-backed manifest registry, knowledge store and run log.
///
/// Cloning shares the underlying connection. Pass the handle to whatever
/// needs it; there is no process-wide instance.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_default() -> Result<Self> {
        Self::open(default_path()?)
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        schema::run_migrations(&conn)
    }

    // ============================================================
    // Manifest operations
    // ============================================================

    /// Load a project's manifest, checking it is internally consistent.
    pub fn load_manifest(&self, project_id: &str) -> Result<Option<ProjectManifest>, RegistryError> {
        let Some(raw) = self.load_manifest_rows(project_id)? else {
            return Ok(None);
        };

        let corrupt = |reason: String| RegistryError::Corrupt {
            project_id: project_id.to_string(),
            reason,
        };

        let generation = u64::try_from(raw.generation)
            .map_err(|_| corrupt(format!("negative generation {}", raw.generation)))?;

        let mut entries = BTreeMap::new();
        for (path, fingerprint, seen_at) in raw.entries {
            let seen_at = u64::try_from(seen_at)
                .map_err(|_| corrupt(format!("entry '{}' has negative seen_at", path)))?;
            entries.insert(
                path,
                ManifestEntry {
                    fingerprint: Fingerprint::new(fingerprint),
                    seen_at,
                },
            );
        }

        let manifest = ProjectManifest {
            project_id: project_id.to_string(),
            generation,
            entries,
            created_at: parse_datetime(raw.created_at),
            updated_at: parse_datetime(raw.updated_at),
        };
        manifest.validate().map_err(corrupt)?;

        Ok(Some(manifest))
    }

    fn load_manifest_rows(&self, project_id: &str) -> Result<Option<RawManifest>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let header = conn
            .query_row(
                "SELECT generation, created_at, updated_at FROM manifests WHERE project_id = ?",
                [project_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((generation, created_at, updated_at)) = header else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT path, fingerprint, seen_at FROM manifest_entries
             WHERE project_id = ? ORDER BY path",
        )?;
        let entries = stmt
            .query_map([project_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(RawManifest {
            generation,
            created_at,
            updated_at,
            entries,
        }))
    }

    /// Replace the stored manifest for a project in one transaction.
    pub fn save_manifest(&self, manifest: &ProjectManifest) -> Result<()> {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO manifests (project_id, generation, created_at, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(project_id) DO UPDATE SET
                generation = excluded.generation,
                updated_at = excluded.updated_at",
            (
                &manifest.project_id,
                manifest.generation as i64,
                manifest.created_at.to_rfc3339(),
                manifest.updated_at.to_rfc3339(),
            ),
        )?;
        tx.execute(
            "DELETE FROM manifest_entries WHERE project_id = ?",
            [&manifest.project_id],
        )?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO manifest_entries (project_id, path, fingerprint, seen_at)
                 VALUES (?, ?, ?, ?)",
            )?;
            for (path, entry) in &manifest.entries {
                insert.execute((
                    &manifest.project_id,
                    path,
                    entry.fingerprint.as_str(),
                    entry.seen_at as i64,
                ))?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub fn drop_manifest(&self, project_id: &str) -> Result<bool> {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM manifest_entries WHERE project_id = ?",
            [project_id],
        )?;
        let rows = tx.execute("DELETE FROM manifests WHERE project_id = ?", [project_id])?;
        tx.commit()?;
        Ok(rows > 0)
    }

    pub fn get_manifest_projects(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare("SELECT project_id FROM manifests ORDER BY project_id")?;
        let projects = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(projects)
    }

    // ============================================================
    // Document operations
    // ============================================================

    pub fn upsert_document(&self, project_id: &str, path: &str, content: &str) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute(
            "INSERT INTO documents (project_id, path, content, byte_size, indexed_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(project_id, path) DO UPDATE SET
                content = excluded.content,
                byte_size = excluded.byte_size,
                indexed_at = excluded.indexed_at",
            (
                project_id,
                path,
                content,
                content.len() as i64,
                Utc::now().to_rfc3339(),
            ),
        )?;
        Ok(())
    }

    pub fn delete_document(&self, project_id: &str, path: &str) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute(
            "DELETE FROM documents WHERE project_id = ? AND path = ?",
            (project_id, path),
        )?;
        Ok(rows > 0)
    }

    pub fn delete_project_documents(&self, project_id: &str) -> Result<usize> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute("DELETE FROM documents WHERE project_id = ?", [project_id])?;
        Ok(rows)
    }

    pub fn get_document(&self, project_id: &str, path: &str) -> Result<Option<Document>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let doc = conn
            .query_row(
                "SELECT project_id, path, content, byte_size, indexed_at
                 FROM documents WHERE project_id = ? AND path = ?",
                (project_id, path),
                |row| {
                    Ok(Document {
                        project_id: row.get(0)?,
                        path: row.get(1)?,
                        content: row.get(2)?,
                        byte_size: row.get::<_, i64>(3)?.max(0) as u64,
                        indexed_at: parse_datetime(row.get::<_, String>(4)?),
                    })
                },
            )
            .optional()?;
        Ok(doc)
    }

    pub fn get_document_paths(&self, project_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt =
            conn.prepare("SELECT path FROM documents WHERE project_id = ? ORDER BY path")?;
        let paths = stmt
            .query_map([project_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(paths)
    }

    pub fn count_documents(&self, project_id: &str) -> Result<usize> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE project_id = ?",
            [project_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ============================================================
    // Reconcile run operations
    // ============================================================

    pub fn create_run(&self, run: &ReconcileRun) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute(
            "INSERT INTO reconcile_runs
                (id, project_id, started_at, finished_at, added, updated, removed, failed, outcome, error)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                run.id.to_string(),
                &run.project_id,
                run.started_at.to_rfc3339(),
                run.finished_at.to_rfc3339(),
                run.added as i64,
                run.updated as i64,
                run.removed as i64,
                run.failed as i64,
                run.outcome.as_str(),
                &run.error,
            ),
        )?;
        Ok(())
    }

    /// Most recent runs first.
    pub fn get_runs(&self, project_id: &str, limit: usize) -> Result<Vec<ReconcileRun>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, project_id, started_at, finished_at, added, updated, removed, failed, outcome, error
             FROM reconcile_runs WHERE project_id = ?
             ORDER BY started_at DESC, rowid DESC LIMIT ?",
        )?;

        let runs = stmt
            .query_map((project_id, limit as i64), |row| {
                Ok(ReconcileRun {
                    id: parse_uuid(row.get::<_, String>(0)?),
                    project_id: row.get(1)?,
                    started_at: parse_datetime(row.get::<_, String>(2)?),
                    finished_at: parse_datetime(row.get::<_, String>(3)?),
                    added: row.get::<_, i64>(4)? as usize,
                    updated: row.get::<_, i64>(5)? as usize,
                    removed: row.get::<_, i64>(6)? as usize,
                    failed: row.get::<_, i64>(7)? as usize,
                    outcome: row
                        .get::<_, String>(8)?
                        .parse()
                        .unwrap_or(RunOutcome::Failed),
                    error: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(runs)
    }

    // ============================================================
    // Project summaries
    // ============================================================

    /// Summaries for every project with a manifest or a run history.
    pub fn get_project_summaries(&self) -> Result<Vec<ProjectSummary>> {
        let ids = {
            let conn = self.conn.lock().expect("database lock poisoned");
            let mut stmt = conn.prepare(
                "SELECT project_id FROM manifests
                 UNION SELECT project_id FROM reconcile_runs
                 ORDER BY project_id",
            )?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            ids
        };

        ids.iter().map(|id| self.get_project_summary(id)).collect()
    }

    pub fn get_project_summary(&self, project_id: &str) -> Result<ProjectSummary> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let header = conn
            .query_row(
                "SELECT m.generation, m.updated_at,
                        (SELECT COUNT(*) FROM manifest_entries e WHERE e.project_id = m.project_id)
                 FROM manifests m WHERE m.project_id = ?",
                [project_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;
        drop(conn);

        let last_run = self.get_runs(project_id, 1)?.into_iter().next();

        Ok(match header {
            Some((generation, updated_at, count)) => ProjectSummary {
                project_id: project_id.to_string(),
                state: ProjectState::Ingested,
                file_count: count.max(0) as usize,
                generation: generation.max(0) as u64,
                updated_at: Some(parse_datetime(updated_at)),
                last_run,
            },
            None => ProjectSummary {
                project_id: project_id.to_string(),
                state: ProjectState::Uninitialized,
                file_count: 0,
                generation: 0,
                updated_at: None,
                last_run,
            },
        })
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

impl ManifestRegistry for Database {
    fn load(&self, project_id: &str) -> Result<Option<ProjectManifest>, RegistryError> {
        self.load_manifest(project_id)
    }

    fn save(&self, project_id: &str, manifest: &ProjectManifest) -> Result<(), RegistryError> {
        if manifest.project_id != project_id {
            return Err(RegistryError::Backend(anyhow::anyhow!(
                "manifest belongs to '{}', not '{}'",
                manifest.project_id,
                project_id
            )));
        }
        Ok(self.save_manifest(manifest)?)
    }

    fn drop(&self, project_id: &str) -> Result<(), RegistryError> {
        self.drop_manifest(project_id)?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, RegistryError> {
        Ok(self.get_manifest_projects()?)
    }

    fn record_run(&self, run: &ReconcileRun) -> Result<(), RegistryError> {
        Ok(self.create_run(run)?)
    }
}

/// The store keeps text documents; content that is not UTF-8 is rejected
/// per path.
impl ContentIndexer for Database {
    fn upsert(&self, project_id: &str, path: &str, content: &[u8]) -> Result<(), IndexerError> {
        let text = std::str::from_utf8(content).map_err(|_| IndexerError::Rejected {
            path: path.to_string(),
            reason: "content is not valid UTF-8".to_string(),
        })?;
        self.upsert_document(project_id, path, text)
            .map_err(|e| IndexerError::Unavailable(e.to_string()))
    }

    fn delete_path(&self, project_id: &str, path: &str) -> Result<(), IndexerError> {
        self.delete_document(project_id, path)
            .map(|_| ())
            .map_err(|e| IndexerError::Unavailable(e.to_string()))
    }

    fn delete_project(&self, project_id: &str) -> Result<(), IndexerError> {
        self.delete_project_documents(project_id)
            .map(|_| ())
            .map_err(|e| IndexerError::Unavailable(e.to_string()))
    }
}

struct RawManifest {
    generation: i64,
    created_at: String,
    updated_at: String,
    entries: Vec<(String, String, i64)>,
}

/// `<data dir>/knowledge-sync/knowledge-sync.db`
pub fn default_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "knowledge-sync")
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
    Ok(dirs.data_dir().join("knowledge-sync.db"))
}

fn parse_uuid(s: String) -> Uuid {
    Uuid::parse_str(&s).unwrap_or_else(|_| Uuid::nil())
}

fn parse_datetime(s: String) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
