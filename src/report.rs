//! Per-item outcomes and the aggregated run report.
//!
//! Every job a worker pulls produces exactly one [`JobOutcome`]. Workers keep
//! their own [`TypeTally`] per entity type and the orchestrator merges them
//! into an [`IngestReport`] when the phase joins.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::classify::ClassifyError;
use crate::codec::CodecError;
use crate::models::{EntityType, Timepoint};
use crate::repository::{Applied, StoreError};
use crate::scene::SceneError;
use crate::tabular::RowError;

/// Why one item (file, node or row) was not written.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error(transparent)]
    Classify(#[from] ClassifyError),
    #[error(transparent)]
    Scene(#[from] SceneError),
    #[error("decode failed: {0}")]
    Decode(#[from] CodecError),
    #[error("line {line}: {source}")]
    Row {
        line: u64,
        #[source]
        source: RowError,
    },
    #[error("failed to read CSV: {0}")]
    Csv(String),
    #[error("no measurement kind in meta file name")]
    UnknownMetaFile,
    #[error("duplicate node '{0}' in cphate tree")]
    DuplicateNode(String),
    #[error("neuron {uid} not found at timepoint {timepoint}")]
    DependencyMiss { uid: String, timepoint: Timepoint },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("unreadable entry: {0}")]
    Walk(String),
    #[error("task failed: {0}")]
    Task(String),
}

impl ItemError {
    pub fn is_dependency_miss(&self) -> bool {
        matches!(self, ItemError::DependencyMiss { .. })
    }
}

#[derive(Debug)]
pub struct ItemFailure {
    pub entity_type: Option<EntityType>,
    pub path: PathBuf,
    pub key: Option<String>,
    pub error: ItemError,
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entity = self.entity_type.map(|t| t.as_str()).unwrap_or("-");
        write!(f, "[{}] {}", entity, self.path.display())?;
        if let Some(key) = &self.key {
            write!(f, " ({})", key)?;
        }
        write!(f, ": {}", self.error)
    }
}

/// Result of processing one queued path.
#[derive(Debug, Default)]
pub struct JobOutcome {
    pub inserted: u64,
    pub replaced: u64,
    pub skipped: u64,
    pub failures: Vec<ItemFailure>,
}

impl JobOutcome {
    pub fn applied(&mut self, applied: Applied) {
        match applied {
            Applied::Inserted => self.inserted += 1,
            Applied::Replaced => self.replaced += 1,
            Applied::Skipped => self.skipped += 1,
        }
    }

    pub fn fail(
        &mut self,
        entity_type: EntityType,
        path: impl Into<PathBuf>,
        key: Option<String>,
        error: impl Into<ItemError>,
    ) {
        let failure = ItemFailure {
            entity_type: Some(entity_type),
            path: path.into(),
            key,
            error: error.into(),
        };
        tracing::warn!(
            entity = %entity_type,
            path = %failure.path.display(),
            key = failure.key.as_deref().unwrap_or(""),
            error = %failure.error,
            "item skipped"
        );
        self.failures.push(failure);
    }
}

/// Counts for one entity type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeTally {
    /// Queue items (files, or cphate directories) processed.
    pub jobs: u64,
    pub inserted: u64,
    pub replaced: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl TypeTally {
    pub fn record(&mut self, outcome: &JobOutcome) {
        self.jobs += 1;
        self.inserted += outcome.inserted;
        self.replaced += outcome.replaced;
        self.skipped += outcome.skipped;
        self.failed += outcome.failures.len() as u64;
    }

    pub fn merge(&mut self, other: &TypeTally) {
        self.jobs += other.jobs;
        self.inserted += other.inserted;
        self.replaced += other.replaced;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }

    /// Rows written by this run.
    pub fn ingested(&self) -> u64 {
        self.inserted + self.replaced
    }
}

/// What one worker accumulated over its lifetime.
#[derive(Debug, Default)]
pub struct WorkerTally {
    pub tallies: BTreeMap<EntityType, TypeTally>,
    pub failures: Vec<ItemFailure>,
}

impl WorkerTally {
    pub fn record(&mut self, entity_type: EntityType, outcome: JobOutcome) {
        self.tallies.entry(entity_type).or_default().record(&outcome);
        self.failures.extend(outcome.failures);
    }
}

/// Aggregated result of an ingest run.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub tallies: BTreeMap<EntityType, TypeTally>,
    pub failures: Vec<ItemFailure>,
    pub routed: u64,
    pub filtered: u64,
    /// Files whose path carries no entity type, in walk order.
    pub unclassified: Vec<PathBuf>,
    pub phases: usize,
    pub elapsed: Duration,
}

impl IngestReport {
    pub fn merge_worker(&mut self, worker: WorkerTally) {
        for (entity_type, tally) in &worker.tallies {
            self.tallies.entry(*entity_type).or_default().merge(tally);
        }
        self.failures.extend(worker.failures);
    }

    pub fn tally(&self, entity_type: EntityType) -> TypeTally {
        self.tallies.get(&entity_type).copied().unwrap_or_default()
    }

    pub fn total(&self) -> TypeTally {
        let mut total = TypeTally::default();
        for tally in self.tallies.values() {
            total.merge(tally);
        }
        total
    }

    pub fn dependency_misses(&self) -> usize {
        self.failures
            .iter()
            .filter(|f| f.error.is_dependency_miss())
            .count()
    }

    /// Print the per-type table on stdout and the first `max_failures`
    /// failures on stderr.
    pub fn print(&self, root: &std::path::Path, max_failures: usize) {
        println!("ingest {}", root.display());
        println!(
            "  {:<12} {:>8} {:>10} {:>9} {:>8} {:>8}",
            "TYPE", "JOBS", "INSERTED", "REPLACED", "SKIPPED", "FAILED"
        );
        for (entity_type, t) in &self.tallies {
            println!(
                "  {:<12} {:>8} {:>10} {:>9} {:>8} {:>8}",
                entity_type.as_str(),
                t.jobs,
                t.inserted,
                t.replaced,
                t.skipped,
                t.failed
            );
        }
        let total = self.total();
        println!("  ingested: {}", total.ingested());
        println!("  skipped: {}", total.skipped);
        println!("  failed: {}", self.failures.len());
        println!("  unclassified: {}", self.unclassified.len());
        println!("  phases: {}", self.phases);
        println!("  elapsed: {:.2}s", self.elapsed.as_secs_f64());
        println!("ok");

        if !self.failures.is_empty() {
            eprintln!("failures ({} total):", self.failures.len());
            for failure in self.failures.iter().take(max_failures) {
                eprintln!("  {}", failure);
            }
            if self.failures.len() > max_failures {
                eprintln!("  ... {} more", self.failures.len() - max_failures);
            }
        }

        if !self.unclassified.is_empty() {
            eprintln!("unclassified ({} total):", self.unclassified.len());
            for path in self.unclassified.iter().take(max_failures) {
                eprintln!("  {}: no entity type in path", path.display());
            }
            if self.unclassified.len() > max_failures {
                eprintln!("  ... {} more", self.unclassified.len() - max_failures);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_tallies_merge_per_type() {
        let mut a = WorkerTally::default();
        let mut outcome = JobOutcome::default();
        outcome.applied(Applied::Inserted);
        outcome.applied(Applied::Skipped);
        a.record(EntityType::Neurons, outcome);

        let mut b = WorkerTally::default();
        let mut outcome = JobOutcome::default();
        outcome.applied(Applied::Replaced);
        outcome.fail(
            EntityType::Contacts,
            "contacts/L1/0/x.gltf",
            Some("ADALbyAVAL".to_string()),
            ItemError::DependencyMiss {
                uid: "AVAL".to_string(),
                timepoint: 0,
            },
        );
        b.record(EntityType::Contacts, outcome);
        b.record(EntityType::Neurons, JobOutcome::default());

        let mut report = IngestReport::default();
        report.merge_worker(a);
        report.merge_worker(b);

        let neurons = report.tally(EntityType::Neurons);
        assert_eq!(neurons.jobs, 2);
        assert_eq!(neurons.inserted, 1);
        assert_eq!(neurons.skipped, 1);

        let contacts = report.tally(EntityType::Contacts);
        assert_eq!(contacts.replaced, 1);
        assert_eq!(contacts.failed, 1);
        assert_eq!(report.dependency_misses(), 1);
        assert_eq!(report.total().ingested(), 2);
    }

    #[test]
    fn failure_display_carries_context() {
        let failure = ItemFailure {
            entity_type: Some(EntityType::Synapses),
            path: PathBuf::from("synapses/L1/0/s.gltf"),
            key: Some("AchemicalB".to_string()),
            error: ItemError::Decode(CodecError::Empty),
        };
        let line = failure.to_string();
        assert!(line.starts_with("[synapses] synapses/L1/0/s.gltf (AchemicalB): decode failed"));
    }
}
