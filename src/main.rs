//! # NeuroSCAN ingestion CLI (`neuroscan`)
//!
//! Loads a connectome dataset tree (3-D scene files and CSV tables) into the
//! NeuroSCAN SQLite store.
//!
//! ## Usage
//!
//! ```bash
//! neuroscan --config ./config/neuroscan.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `neuroscan init` | Create the SQLite database and run schema migrations |
//! | `neuroscan ingest --dir <root>` | Walk a dataset tree and upsert every entity |
//! | `neuroscan stats` | Per-table row counts and recent ingest runs |
//! | `neuroscan classify <path>` | Show what the path classifier derives for a path |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! neuroscan init --db ./data/neuroscan.sqlite
//!
//! # Full ingest, replacing rows that already exist
//! neuroscan ingest --dir /data/ingest --force
//!
//! # Re-run only contacts and synapses, leaving existing rows alone
//! neuroscan ingest --dir /data/ingest --types contacts,synapses --skip-existing
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use neuroscan::classify;
use neuroscan::config::{self, Config};
use neuroscan::ingest::{self, IngestOptions};
use neuroscan::migrate;
use neuroscan::models::EntityType;
use neuroscan::progress::ProgressMode;
use neuroscan::stats;

/// Failures listed on stderr after an ingest; the rest are only counted.
const MAX_LISTED_FAILURES: usize = 20;

/// NeuroSCAN ingestion CLI.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. When the file does not exist, built-in defaults are used.
#[derive(Parser)]
#[command(
    name = "neuroscan",
    about = "NeuroSCAN — connectome dataset ingestion",
    version,
    long_about = "Walks a developmental-connectome dataset tree, classifies every scene file \
    and CSV table by its path, decodes the identifiers embedded in scene node names, and \
    upserts neurons, contacts, synapses, cphate trees and their metadata into SQLite."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/neuroscan.toml`.
    #[arg(long, global = true, default_value = "./config/neuroscan.toml")]
    config: PathBuf,

    /// Database file, overriding `[db].path` from the config.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Log at debug level (RUST_LOG takes precedence when set).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and every entity table. This command
    /// is idempotent; running it multiple times is safe.
    Init,

    /// Ingest a dataset directory.
    ///
    /// Walks the tree once, routes every classified path to its entity-type
    /// queue and drains the queues with a worker pool. Per-item failures are
    /// reported but never abort the run.
    Ingest {
        /// Root of the dataset tree.
        #[arg(long)]
        dir: PathBuf,

        /// Number of concurrent workers (default: `[ingest].workers`).
        #[arg(long)]
        threads: Option<usize>,

        /// Comma-separated entity types to process (default: all).
        ///
        /// One of: neurons, contacts, synapses, cphate, nerveRing, scale,
        /// promoters, dev_stages, meta.
        #[arg(long, value_delimiter = ',')]
        types: Vec<EntityType>,

        /// Leave rows that already exist untouched.
        #[arg(long)]
        skip_existing: bool,

        /// Replace rows that already exist.
        #[arg(long)]
        force: bool,

        /// Truncate the selected entity tables before ingesting.
        #[arg(long)]
        clean: bool,

        /// Drain every queue in a single phase instead of neurons first.
        #[arg(long)]
        no_barrier: bool,

        /// Progress on stderr: off, human, or json (default: human on a TTY).
        #[arg(long)]
        progress: Option<ProgressMode>,
    },

    /// Show database statistics.
    ///
    /// Row counts for every entity table, measurement coverage, and the most
    /// recent ingest runs.
    Stats,

    /// Classify a path.
    ///
    /// Prints the entity type, developmental stage and timepoint derived
    /// from the path segments. Does not touch the database.
    Classify {
        /// Path to classify (need not exist).
        path: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut cfg = config::load_or_minimal(&cli.config)?;
    if let Some(db) = &cli.db {
        cfg.db.path = db.clone();
    }
    Ok(cfg)
}

fn print_classification(path: &std::path::Path) {
    let show = |value: Option<String>| value.unwrap_or_else(|| "not found".to_string());
    let c = classify::classify(path);
    println!("classify {}", path.display());
    println!("  entity type: {}", show(c.entity_type.map(|t| t.to_string())));
    println!("  dev stage:   {}", show(c.dev_stage.map(|s| s.to_string())));
    println!("  timepoint:   {}", show(c.timepoint.map(|t| t.to_string())));
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Commands that don't require config
    if let Commands::Classify { path } = &cli.command {
        print_classification(path);
        return Ok(());
    }

    let cfg = load_config(&cli)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            dir,
            threads,
            types,
            skip_existing,
            force,
            clean,
            no_barrier,
            progress,
        } => {
            let mut options = IngestOptions::from_config(&cfg, dir);
            options.types = types;
            options.skip_existing |= skip_existing;
            options.force = force;
            options.clean = clean;
            if no_barrier {
                options.phase_barrier = false;
            }
            if let Some(threads) = threads {
                if threads == 0 {
                    anyhow::bail!("--threads must be >= 1");
                }
                options.workers = threads;
            }

            let reporter = progress
                .unwrap_or_else(ProgressMode::default_for_tty)
                .reporter();
            let report = ingest::run_ingest(&cfg, &options, reporter.as_ref()).await?;
            report.print(&options.root, MAX_LISTED_FAILURES);
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Classify { .. } => {
            // Handled above (before config loading)
        }
    }

    Ok(())
}
