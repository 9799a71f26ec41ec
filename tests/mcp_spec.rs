//! MCP server integration tests.
//!
//! These call the tool logic on `McpServer` directly against an in-memory
//! database and a temporary project tree.

use std::path::Path;

use knowledge_sync::config::Config;
use knowledge_sync::db::Database;
use knowledge_sync::mcp::{McpServer, SyncRequest};
use tempfile::TempDir;

/// Helper to create a test MCP server with in-memory database.
fn setup() -> (McpServer, Database) {
    let db = Database::open_memory().expect("Failed to create database");
    db.migrate().expect("Failed to migrate");
    let server = McpServer::new(db.clone(), Config::default());
    (server, db)
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// A small project with one dependency directory that must be skipped.
fn project_tree() -> TempDir {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    write(dir.path(), "README.md", "# Billing");
    write(dir.path(), "src/invoice.py", "def invoice(): ...");
    write(dir.path(), "node_modules/pkg/index.js", "module.exports = {}");
    dir
}

fn sync_request(project_id: &str, root: &Path) -> SyncRequest {
    SyncRequest {
        project_id: project_id.to_string(),
        root: root.to_string_lossy().into_owned(),
        exclude: vec![],
    }
}

// ============================================================
// Discovery Tools
// ============================================================

mod discovery_tools {
    use super::*;

    #[tokio::test]
    async fn list_projects_is_empty_for_a_new_store() {
        let (server, _db) = setup();

        let response = server.list_project_infos().expect("list_projects failed");
        assert!(response.projects.is_empty());
    }

    #[tokio::test]
    async fn list_projects_shows_ingested_projects() {
        let (server, _db) = setup();
        let tree = project_tree();
        server.reconcile(sync_request("billing", tree.path())).await.unwrap();

        let response = server.list_project_infos().unwrap();
        assert_eq!(response.projects.len(), 1);
        assert_eq!(response.projects[0].project_id, "billing");
        assert_eq!(response.projects[0].state, "ingested");
        assert_eq!(response.projects[0].file_count, 2);
    }

    #[tokio::test]
    async fn status_of_unknown_project_is_uninitialized() {
        let (server, _db) = setup();

        let status = server.project_status("nobody", None).await.unwrap();
        assert_eq!(status.project.state, "uninitialized");
        assert!(status.recent_runs.is_empty());
    }

    #[tokio::test]
    async fn status_includes_recent_runs() {
        let (server, _db) = setup();
        let tree = project_tree();
        server.reconcile(sync_request("billing", tree.path())).await.unwrap();
        server.reconcile(sync_request("billing", tree.path())).await.unwrap();

        let status = server.project_status("billing", Some(1)).await.unwrap();
        assert_eq!(status.project.generation, 2);
        assert_eq!(status.recent_runs.len(), 1);
        assert_eq!(status.recent_runs[0].outcome, "completed");
        assert_eq!(status.recent_runs[0].added, 0);
    }

    #[tokio::test]
    async fn empty_project_id_is_rejected() {
        let (server, _db) = setup();
        assert!(server.project_status("  ", None).await.is_err());
    }
}

// ============================================================
// Reconciliation Tools
// ============================================================

mod reconciliation_tools {
    use super::*;

    #[tokio::test]
    async fn preview_lists_new_files_without_ingesting() {
        let (server, db) = setup();
        let tree = project_tree();

        let plan = server.preview(sync_request("billing", tree.path())).await.unwrap();

        assert_eq!(plan.to_add, vec!["README.md", "src/invoice.py"]);
        assert_eq!(db.count_documents("billing").unwrap(), 0);
        assert!(db.load_manifest("billing").unwrap().is_none());
    }

    #[tokio::test]
    async fn reconcile_ingests_and_then_is_a_no_op() {
        let (server, db) = setup();
        let tree = project_tree();

        let first = server.reconcile(sync_request("billing", tree.path())).await.unwrap();
        assert_eq!(first.added.len(), 2);
        assert_eq!(db.count_documents("billing").unwrap(), 2);

        let second = server.reconcile(sync_request("billing", tree.path())).await.unwrap();
        assert!(second.added.is_empty());
        assert!(second.updated.is_empty());
        assert_eq!(second.unchanged_count, 2);
    }

    #[tokio::test]
    async fn reconcile_picks_up_edits_and_deletions() {
        let (server, db) = setup();
        let tree = project_tree();
        server.reconcile(sync_request("billing", tree.path())).await.unwrap();

        write(tree.path(), "src/invoice.py", "def invoice(total): ...");
        std::fs::remove_file(tree.path().join("README.md")).unwrap();

        let response = server.reconcile(sync_request("billing", tree.path())).await.unwrap();
        assert_eq!(response.updated, vec!["src/invoice.py"]);
        assert_eq!(response.removed, vec!["README.md"]);
        assert_eq!(db.get_document_paths("billing").unwrap(), vec!["src/invoice.py"]);
    }

    #[tokio::test]
    async fn extra_exclusions_apply_per_request() {
        let (server, _db) = setup();
        let tree = project_tree();
        write(tree.path(), "generated/schema.py", "SCHEMA = {}");

        let mut req = sync_request("billing", tree.path());
        req.exclude = vec!["generated".to_string()];
        let response = server.reconcile(req).await.unwrap();

        assert!(!response.added.contains(&"generated/schema.py".to_string()));
    }

    #[tokio::test]
    async fn failed_files_are_reported() {
        let (server, _db) = setup();
        let tree = project_tree();
        std::fs::write(tree.path().join("logo.png"), [0xffu8, 0xfe, 0x00]).unwrap();

        let response = server.reconcile(sync_request("billing", tree.path())).await.unwrap();

        assert_eq!(response.failed.len(), 1);
        assert_eq!(response.failed[0].path, "logo.png");
    }

    #[tokio::test]
    async fn relative_root_is_rejected() {
        let (server, _db) = setup();
        let req = SyncRequest {
            project_id: "billing".to_string(),
            root: "src".to_string(),
            exclude: vec![],
        };
        assert!(server.reconcile(req).await.is_err());
    }

    #[tokio::test]
    async fn missing_root_is_rejected() {
        let (server, _db) = setup();
        let tree = project_tree();
        let missing = tree.path().join("missing");
        assert!(server.reconcile(sync_request("billing", &missing)).await.is_err());
    }

    #[tokio::test]
    async fn rebuild_reingests_everything() {
        let (server, _db) = setup();
        let tree = project_tree();
        server.reconcile(sync_request("billing", tree.path())).await.unwrap();

        let response = server.rebuild(sync_request("billing", tree.path())).await.unwrap();

        assert_eq!(response.added.len(), 2);
        assert_eq!(response.generation, 1);
    }

    #[tokio::test]
    async fn drop_returns_project_to_uninitialized() {
        let (server, db) = setup();
        let tree = project_tree();
        server.reconcile(sync_request("billing", tree.path())).await.unwrap();

        let response = server.remove_project("billing").await.unwrap();

        assert_eq!(response.state, "uninitialized");
        assert_eq!(db.count_documents("billing").unwrap(), 0);
        let status = server.project_status("billing", None).await.unwrap();
        assert_eq!(status.project.state, "uninitialized");
    }
}

mod locking {
    use super::*;
    use knowledge_sync::error::IndexerError;
    use knowledge_sync::reconcile::{Blake3Fingerprinter, ContentIndexer, Reconciler};
    use std::sync::{mpsc, Arc, Mutex};
    use std::time::Duration;

    /// The first upsert parks until the test releases it.
    struct GatedIndexer {
        db: Database,
        entered: tokio::sync::mpsc::UnboundedSender<()>,
        release: Mutex<Option<mpsc::Receiver<()>>>,
    }

    impl ContentIndexer for GatedIndexer {
        fn upsert(&self, project_id: &str, path: &str, content: &[u8]) -> Result<(), IndexerError> {
            let gate = self.release.lock().unwrap().take();
            if let Some(gate) = gate {
                let _ = self.entered.send(());
                let _ = gate.recv();
            }
            self.db.upsert(project_id, path, content)
        }

        fn delete_path(&self, project_id: &str, path: &str) -> Result<(), IndexerError> {
            self.db.delete_path(project_id, path)
        }

        fn delete_project(&self, project_id: &str) -> Result<(), IndexerError> {
            self.db.delete_project(project_id)
        }
    }

    #[tokio::test]
    async fn status_waits_for_a_running_reconcile_without_stalling_the_runtime() {
        let db = Database::open_memory().expect("Failed to create database");
        db.migrate().expect("Failed to migrate");
        let (entered_tx, mut entered_rx) = tokio::sync::mpsc::unbounded_channel();
        let (release_tx, release_rx) = mpsc::channel();
        let reconciler = Reconciler::new(
            Arc::new(db.clone()),
            Arc::new(GatedIndexer {
                db: db.clone(),
                entered: entered_tx,
                release: Mutex::new(Some(release_rx)),
            }),
            Arc::new(Blake3Fingerprinter),
        );
        let server = McpServer::with_reconciler(reconciler, db.clone(), Config::default());
        let tree = project_tree();

        let running = server.reconcile(sync_request("billing", tree.path()));
        let observer = async {
            entered_rx.recv().await.expect("reconcile never reached the store");
            let waited = tokio::time::timeout(
                Duration::from_millis(100),
                server.project_status("billing", None),
            )
            .await;
            assert!(waited.is_err(), "status must wait for the project lock");
            release_tx.send(()).unwrap();
        };
        let (outcome, ()) = tokio::join!(running, observer);
        assert_eq!(outcome.unwrap().added.len(), 2);

        let status = server.project_status("billing", None).await.unwrap();
        assert_eq!(status.project.state, "ingested");

        server.remove_project("billing").await.unwrap();
        assert_eq!(db.count_documents("billing").unwrap(), 0);
    }
}
