//! # vaultsync CLI (`vsync`)
//!
//! ## Usage
//!
//! ```bash
//! vsync --config ./config/vsync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vsync init` | Create the SQLite database and run schema migrations |
//! | `vsync setup` | Clone (or pull) the vault and index every document |
//! | `vsync sync` | Pull upstream changes and re-index what changed |
//! | `vsync sync --full` | Re-index every document without pulling |
//! | `vsync rebuild` | Pull, clear the index, and re-index everything |
//! | `vsync reindex <path>` | Re-index a single document |
//! | `vsync cleanup` | Remove index entries for deleted documents |
//! | `vsync status` | Repository, index, and sync status |
//! | `vsync stats` | Index statistics |
//! | `vsync search "<query>"` | Search the index |
//! | `vsync serve` | Start the HTTP server |
//!
//! Results are printed as JSON on stdout; progress and logs go to stderr.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

use vaultsync::progress::ProgressMode;
use vaultsync::reconcile::{SyncMode, SyncOutcome};
use vaultsync::{app, config, db, logging, migrate, server};
use vaultsync_core::models::SearchQuery;

/// vaultsync: keeps a semantic search index in step with a markdown vault.
#[derive(Parser)]
#[command(name = "vsync", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/vsync.toml")]
    config: PathBuf,

    /// Debug-level logging (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Clone the vault (or pull an existing checkout) and index everything.
    Setup {
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Index upstream changes since the last sync.
    Sync {
        /// Re-index every document instead of diffing.
        #[arg(long)]
        full: bool,

        /// Progress output on stderr. Defaults to `human` on a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Pull, clear the index, and re-index every document.
    Rebuild {
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Re-index a single document.
    Reindex {
        /// Vault-relative path, e.g. `notes/ideas.md`.
        path: String,
    },

    /// Remove index entries whose file no longer exists.
    Cleanup,

    /// Show repository, index, and sync status.
    Status,

    /// Show index statistics.
    Stats,

    /// Search the index.
    Search {
        query: String,

        #[arg(long, default_value_t = 10)]
        limit: usize,

        /// Glob over document paths, e.g. `daily/**`.
        #[arg(long)]
        path: Option<String>,

        /// Keep hits with this tag. Repeatable; any tag matches.
        #[arg(long = "tag")]
        tags: Vec<String>,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn finish(outcome: SyncOutcome) -> Result<()> {
    print_json(&outcome)?;
    if let (false, Some(err)) = (outcome.success, outcome.error) {
        bail!(err.message);
    }
    Ok(())
}

async fn run_sync(cfg: &config::Config, mode: SyncMode, progress: Option<ProgressMode>) -> Result<()> {
    let reconciler = app::build_reconciler(cfg).await?;
    let sink = progress.unwrap_or_else(ProgressMode::default_for_tty).sink();
    finish(reconciler.run(mode, sink.as_ref()).await)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Setup { progress } => {
            run_sync(&cfg, SyncMode::InitialSetup, progress).await?;
        }
        Commands::Sync { full, progress } => {
            let mode = if full {
                SyncMode::Full
            } else {
                SyncMode::Incremental
            };
            run_sync(&cfg, mode, progress).await?;
        }
        Commands::Rebuild { progress } => {
            run_sync(&cfg, SyncMode::Rebuild, progress).await?;
        }
        Commands::Reindex { path } => {
            let reconciler = app::build_reconciler(&cfg).await?;
            let outcome = reconciler.force_reindex(&path).await;
            print_json(&outcome)?;
            if let (false, Some(err)) = (outcome.success, outcome.error) {
                bail!(err.message);
            }
        }
        Commands::Cleanup => {
            let reconciler = app::build_reconciler(&cfg).await?;
            print_json(&reconciler.sweep_orphans().await?)?;
        }
        Commands::Status => {
            let reconciler = app::build_reconciler(&cfg).await?;
            print_json(&reconciler.status().await?)?;
        }
        Commands::Stats => {
            let reconciler = app::build_reconciler(&cfg).await?;
            print_json(&reconciler.stats().await?)?;
        }
        Commands::Search {
            query,
            limit,
            path,
            tags,
        } => {
            let reconciler = app::build_reconciler(&cfg).await?;
            let mut search = SearchQuery::new(query, limit).with_tags(tags);
            search.path_filter = path;
            let hits = reconciler.search(&search).await?;
            if hits.is_empty() {
                eprintln!("No results.");
            }
            print_json(&hits)?;
        }
        Commands::Serve => {
            let reconciler = app::build_reconciler(&cfg).await?;
            server::run_server(&cfg, reconciler).await?;
        }
    }

    Ok(())
}
