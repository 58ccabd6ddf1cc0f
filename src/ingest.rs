//! Ingestion run orchestration.
//!
//! Owns the lifecycle of a run: open the store, optionally truncate the
//! selected entity tables, walk the tree once, drain the typed queues in
//! phases, and return the aggregated [`IngestReport`].
//!
//! With the phase barrier on (the default), phases run in dependency order:
//!
//! 1. neurons, nerveRing, scale, promoters, dev_stages
//! 2. contacts, synapses, cphate (these resolve neurons)
//! 3. meta (writes onto neurons and contacts)
//!
//! Phase 1 queues are fed live by the walk with backpressure; paths for later
//! phases are held in walk order and fed once the previous phase has fully
//! drained. Without the barrier every selected type shares one phase.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::codec::DecodePolicy;
use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::models::EntityType;
use crate::pool::{join_workers, JobHandler, Queues};
use crate::processor::{Processor, Stores};
use crate::progress::{IngestProgressEvent, ProgressReporter};
use crate::report::{IngestReport, ItemError, ItemFailure, WorkerTally};
use crate::repository::{IngestMode, LookupCache};
use crate::walker::{self, WalkFilter};

const PHASES: [&[EntityType]; 3] = [
    &[
        EntityType::Neurons,
        EntityType::NerveRing,
        EntityType::Scale,
        EntityType::Promoters,
        EntityType::DevStages,
    ],
    &[EntityType::Contacts, EntityType::Synapses, EntityType::Cphate],
    &[EntityType::Meta],
];

/// Per-run settings, seeded from config and overridden by the CLI.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub root: PathBuf,
    /// Empty means every entity type.
    pub types: Vec<EntityType>,
    pub workers: usize,
    pub skip_existing: bool,
    pub force: bool,
    pub clean: bool,
    pub phase_barrier: bool,
}

impl IngestOptions {
    pub fn from_config(config: &Config, root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            types: Vec::new(),
            workers: config.ingest.workers,
            skip_existing: config.ingest.skip_existing,
            force: false,
            clean: false,
            phase_barrier: config.ingest.phase_barrier,
        }
    }

    pub fn selected_types(&self) -> BTreeSet<EntityType> {
        if self.types.is_empty() {
            EntityType::ALL.into_iter().collect()
        } else {
            self.types.iter().copied().collect()
        }
    }
}

/// Group the selected types into phases, dropping empty ones.
pub fn plan_phases(selected: &BTreeSet<EntityType>, barrier: bool) -> Vec<Vec<EntityType>> {
    let phases: Vec<Vec<EntityType>> = PHASES
        .iter()
        .map(|phase| {
            phase
                .iter()
                .copied()
                .filter(|t| selected.contains(t))
                .collect::<Vec<_>>()
        })
        .filter(|phase| !phase.is_empty())
        .collect();

    if barrier {
        phases
    } else {
        vec![phases.into_iter().flatten().collect()]
    }
}

/// Run a full ingest. Only an unreadable root or an unusable store is fatal;
/// everything else ends up in the report.
pub async fn run_ingest(
    config: &Config,
    options: &IngestOptions,
    progress: &dyn ProgressReporter,
) -> Result<IngestReport> {
    let started = Instant::now();
    let started_at = chrono::Utc::now().timestamp();

    std::fs::read_dir(&options.root)
        .with_context(|| format!("Cannot read ingestion root: {}", options.root.display()))?;

    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;

    let selected = options.selected_types();
    let filter = WalkFilter::new(
        selected.iter().copied(),
        &config.ingest.scene_extensions,
        &config.ingest.exclude_globs,
    )?;

    let cache = Arc::new(LookupCache::new(Duration::from_secs(
        config.ingest.cache_ttl_secs,
    )));
    let stores = Stores::new(pool.clone(), cache);

    let phases = plan_phases(&selected, options.phase_barrier);
    let mut report = IngestReport {
        phases: phases.len(),
        ..Default::default()
    };

    if options.clean {
        clean(&stores, &selected, &options.root, &mut report).await;
    }

    let mode = IngestMode {
        skip_existing: options.skip_existing,
        force: options.force,
    };
    let policy = if config.ingest.strict_decode {
        DecodePolicy::Strict
    } else {
        DecodePolicy::ZeroFill
    };
    let handler: Arc<dyn JobHandler> = Arc::new(Processor::new(
        stores,
        mode,
        policy,
        config.ingest.scene_extensions.clone(),
    ));

    let total_phases = phases.len();

    // Phase 1 runs while the tree is walked.
    let Some((first, rest)) = phases.split_first() else {
        pool.close().await;
        return Ok(report);
    };

    progress.report(IngestProgressEvent::Walking {
        root: options.root.display().to_string(),
    });
    progress.report(IngestProgressEvent::PhaseStarted {
        phase: 1,
        phases: total_phases,
        types: first.clone(),
    });

    let mut queues = Queues::open(first, &config.ingest.queues);
    let handles = queues.spawn_workers(options.workers, Arc::clone(&handler));
    let senders = queues.take_senders();

    let root = options.root.clone();
    let walk = tokio::task::spawn_blocking(move || {
        let mut deferred: BTreeMap<EntityType, Vec<PathBuf>> = BTreeMap::new();
        let summary = walker::walk(&root, &filter, |entity_type, path| {
            match senders.get(&entity_type) {
                Some(tx) => tx.blocking_send(path).is_ok(),
                None => {
                    deferred.entry(entity_type).or_default().push(path);
                    true
                }
            }
        });
        (summary, deferred)
    });
    let (summary, mut deferred) = walk.await.context("directory walk failed")?;

    report.routed = summary.routed;
    report.filtered = summary.filtered;
    report.unclassified = summary.unclassified;
    for (path, error) in summary.errors {
        report.failures.push(ItemFailure {
            entity_type: None,
            path,
            key: None,
            error: ItemError::Walk(error),
        });
    }
    progress.report(IngestProgressEvent::Walked {
        routed: summary.routed,
        deferred: deferred.values().map(|paths| paths.len() as u64).sum(),
    });

    let tallies = join_workers(handles).await?;
    finish_phase(&mut report, tallies, 1, total_phases, progress);

    for (offset, phase) in rest.iter().enumerate() {
        let number = offset + 2;
        progress.report(IngestProgressEvent::PhaseStarted {
            phase: number,
            phases: total_phases,
            types: phase.clone(),
        });

        let mut queues = Queues::open(phase, &config.ingest.queues);
        let handles = queues.spawn_workers(options.workers, Arc::clone(&handler));

        let mut feeders = Vec::new();
        for (entity_type, tx) in queues.take_senders() {
            let paths = deferred.remove(&entity_type).unwrap_or_default();
            feeders.push(tokio::spawn(async move {
                for path in paths {
                    if tx.send(path).await.is_err() {
                        break;
                    }
                }
            }));
        }

        for feeder in feeders {
            feeder.await.context("queue feeder failed")?;
        }
        let tallies = join_workers(handles).await?;
        finish_phase(&mut report, tallies, number, total_phases, progress);
    }

    report.elapsed = started.elapsed();

    if let Err(e) = record_run(&pool, &options.root, started_at, &report).await {
        tracing::warn!(error = %e, "failed to record ingest run");
    }

    pool.close().await;
    Ok(report)
}

/// Truncate selected tables, dependents first. A failed truncate is reported
/// against the root and the run goes on.
async fn clean(
    stores: &Stores,
    selected: &BTreeSet<EntityType>,
    root: &Path,
    report: &mut IngestReport,
) {
    for phase in PHASES.iter().rev() {
        for &entity_type in phase.iter().filter(|t| selected.contains(*t)) {
            match stores.truncate(entity_type).await {
                Ok(removed) => tracing::info!(entity = %entity_type, removed, "truncated"),
                Err(e) => {
                    tracing::warn!(entity = %entity_type, error = %e, "truncate failed");
                    report.failures.push(ItemFailure {
                        entity_type: Some(entity_type),
                        path: root.to_path_buf(),
                        key: None,
                        error: ItemError::Store(e),
                    });
                }
            }
        }
    }
}

fn finish_phase(
    report: &mut IngestReport,
    tallies: Vec<WorkerTally>,
    phase: usize,
    phases: usize,
    progress: &dyn ProgressReporter,
) {
    let mut jobs = 0;
    let mut failed = 0;
    for worker in tallies {
        for tally in worker.tallies.values() {
            jobs += tally.jobs;
            failed += tally.failed;
        }
        report.merge_worker(worker);
    }
    progress.report(IngestProgressEvent::PhaseFinished {
        phase,
        phases,
        jobs,
        failed,
    });
}

async fn record_run(
    pool: &SqlitePool,
    root: &Path,
    started_at: i64,
    report: &IngestReport,
) -> Result<()> {
    let total = report.total();
    sqlx::query(
        r#"
        INSERT INTO ingest_runs (root, started_at, finished_at, ingested, skipped, failed)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(root.display().to_string())
    .bind(started_at)
    .bind(chrono::Utc::now().timestamp())
    .bind(total.ingested() as i64)
    .bind(total.skipped as i64)
    .bind(report.failures.len() as i64)
    .execute(pool)
    .await?;
    Ok(())
}
