use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use knowledge_sync::{
    api,
    config::Config,
    db::Database,
    mcp,
    models::{ReconcileOutcome, ReconciliationPlan},
    reconcile::CancelFlag,
    reconciler_for,
};

#[derive(Parser)]
#[command(name = "ksync")]
#[command(about = "Keep a per-project knowledge store in step with the project's files")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Port for HTTP API (defaults to the configured port)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Start MCP server via stdio
    Mcp,
    /// Reconcile a project against its root directory
    Sync {
        /// Project identifier (service name)
        project: String,
        /// Project root directory
        root: PathBuf,
        /// Extra directory-name glob patterns to skip
        #[arg(short, long)]
        exclude: Vec<String>,
        /// Print the plan without applying it
        #[arg(long)]
        dry_run: bool,
    },
    /// Drop a project and re-ingest every file under its root
    Rebuild {
        project: String,
        root: PathBuf,
        #[arg(short, long)]
        exclude: Vec<String>,
    },
    /// Remove a project's store rows and manifest
    Drop { project: String },
    /// List known projects
    List,
    /// Check whether the HTTP server is running
    Status {
        /// Server base URL
        #[arg(long, default_value = "http://127.0.0.1:3000")]
        url: String,
    },
}

/// Initialize tracing with output to stderr (for MCP mode) or stdout
fn init_tracing(use_stderr: bool) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG")
            .unwrap_or_else(|_| "knowledge_sync=debug,ksync=debug,tower_http=debug".into()),
    );

    if use_stderr {
        // MCP mode: log to stderr so stdout is clean for protocol
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn open_database(config: &Config) -> anyhow::Result<Database> {
    let db = Database::open(config.database_path()?)?;
    db.migrate()?;
    Ok(db)
}

async fn serve(config: Config, port: u16) -> anyhow::Result<()> {
    tracing::info!("Starting knowledge-sync server on port {}", port);

    let db = open_database(&config)?;
    if config.api_key.is_none() {
        tracing::warn!("KSYNC_API_KEY not set, HTTP API is unauthenticated");
    }
    let app = api::create_router(db, config);

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!("knowledge-sync listening on http://127.0.0.1:{}", port);

    axum::serve(listener, app).await?;
    Ok(())
}

fn absolute_root(root: PathBuf) -> anyhow::Result<PathBuf> {
    std::fs::canonicalize(&root).with_context(|| format!("Cannot open root {}", root.display()))
}

fn print_plan(project: &str, plan: &ReconciliationPlan) {
    println!(
        "{}: {} to add, {} to update, {} to remove, {} unchanged",
        project,
        plan.to_add.len(),
        plan.to_update.len(),
        plan.to_remove.len(),
        plan.unchanged.len()
    );
    for path in &plan.to_add {
        println!("  + {}", path);
    }
    for path in &plan.to_update {
        println!("  ~ {}", path);
    }
    for path in &plan.to_remove {
        println!("  - {}", path);
    }
    for (path, reason) in &plan.unreadable {
        println!("  ! {} ({})", path, reason);
    }
}

fn print_outcome(outcome: &ReconcileOutcome) {
    let result = &outcome.result;
    println!(
        "{}: {} added, {} updated, {} removed, {} unchanged (generation {})",
        outcome.project_id,
        result.added.len(),
        result.updated.len(),
        result.removed.len(),
        outcome.plan.unchanged.len(),
        outcome.generation
    );
    for failed in &result.failed {
        println!("  failed {}: {}", failed.path, failed.reason);
    }
    if result.cancelled {
        println!("  cancelled, remaining paths will be picked up by the next sync");
    }
}

/// Run a reconciliation on the blocking pool, cancelling it on Ctrl-C.
async fn run_reconcile(
    config: Config,
    project: String,
    root: PathBuf,
    exclude: Vec<String>,
    rebuild: bool,
) -> anyhow::Result<()> {
    let db = open_database(&config)?;
    let reconciler = reconciler_for(&db);
    let walker = config.walker(&exclude)?;
    let root = absolute_root(root)?;

    let cancel = CancelFlag::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current file");
            on_signal.cancel();
        }
    });

    let outcome = tokio::task::spawn_blocking(move || {
        if rebuild {
            reconciler.rebuild_directory(&project, &root, &walker, Some(&cancel))
        } else {
            reconciler.sync_directory(&project, &root, &walker, Some(&cancel))
        }
    })
    .await??;

    print_outcome(&outcome);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // MCP mode needs stderr for logging since stdout is the protocol channel
    let use_stderr = matches!(cli.command, Some(Commands::Mcp));
    init_tracing(use_stderr);

    let config = Config::load();

    match cli.command {
        Some(Commands::Serve { port }) => {
            let port = port.unwrap_or(config.port);
            serve(config, port).await?;
        }
        Some(Commands::Mcp) => {
            let db = open_database(&config)?;
            mcp::run_stdio_server(db, config).await?;
        }
        Some(Commands::Sync {
            project,
            root,
            exclude,
            dry_run: true,
        }) => {
            let db = open_database(&config)?;
            let walker = config.walker(&exclude)?;
            let root = absolute_root(root)?;
            let plan = reconciler_for(&db).preview_directory(&project, &root, &walker)?;
            print_plan(&project, &plan);
        }
        Some(Commands::Sync {
            project,
            root,
            exclude,
            dry_run: false,
        }) => {
            run_reconcile(config, project, root, exclude, false).await?;
        }
        Some(Commands::Rebuild {
            project,
            root,
            exclude,
        }) => {
            run_reconcile(config, project, root, exclude, true).await?;
        }
        Some(Commands::Drop { project }) => {
            let db = open_database(&config)?;
            reconciler_for(&db).drop_project(&project)?;
            println!("{}: dropped", project);
        }
        Some(Commands::List) => {
            let db = open_database(&config)?;
            for summary in db.get_project_summaries()? {
                println!(
                    "{}\t{}\t{} files\tgeneration {}",
                    summary.project_id, summary.state, summary.file_count, summary.generation
                );
            }
        }
        Some(Commands::Status { url }) => {
            let health = format!("{}/api/v1/health", url.trim_end_matches('/'));
            match reqwest::get(&health).await {
                Ok(resp) if resp.status().is_success() => {
                    println!("knowledge-sync server is running at {}", url);
                }
                Ok(resp) => {
                    println!("knowledge-sync server at {} returned {}", url, resp.status());
                }
                Err(_) => {
                    println!("knowledge-sync server is not running at {}", url);
                }
            }
        }
        None => {
            let port = config.port;
            serve(config, port).await?;
        }
    }

    Ok(())
}
