//! Typed job queues and the worker pool that drains them.
//!
//! Each entity type gets its own bounded queue. Workers share the receiving
//! ends and, on every pull, race all queues of the active phase, starting
//! from a different queue each time, so no queue is drained strictly before
//! another. A queue leaves a worker's set once it is closed and empty; the
//! worker exits when its set is empty. Each pulled job is handed to the
//! [`JobHandler`] and produces exactly one [`JobOutcome`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::{select_all, BoxFuture, FutureExt};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::config::QueueConfig;
use crate::models::EntityType;
use crate::report::{JobOutcome, WorkerTally};

/// Processes one queued path.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, entity_type: EntityType, path: &Path) -> JobOutcome;
}

type SharedReceiver = Arc<Mutex<mpsc::Receiver<PathBuf>>>;

/// Producer and consumer ends for the queues of one phase.
pub struct Queues {
    pub senders: BTreeMap<EntityType, mpsc::Sender<PathBuf>>,
    receivers: Vec<(EntityType, SharedReceiver)>,
}

impl Queues {
    pub fn open(types: &[EntityType], capacities: &QueueConfig) -> Self {
        let mut senders = BTreeMap::new();
        let mut receivers = Vec::new();
        for &entity_type in types {
            let (tx, rx) = mpsc::channel(capacities.capacity(entity_type).max(1));
            senders.insert(entity_type, tx);
            receivers.push((entity_type, Arc::new(Mutex::new(rx))));
        }
        Self { senders, receivers }
    }

    /// Take the producer ends; the queues close once every sender is dropped.
    pub fn take_senders(&mut self) -> BTreeMap<EntityType, mpsc::Sender<PathBuf>> {
        std::mem::take(&mut self.senders)
    }

    /// Start `workers` consumers over every queue of this phase.
    pub fn spawn_workers(
        &self,
        workers: usize,
        handler: Arc<dyn JobHandler>,
    ) -> Vec<tokio::task::JoinHandle<WorkerTally>> {
        (0..workers.max(1))
            .map(|id| {
                let queues = self.receivers.clone();
                let handler = Arc::clone(&handler);
                tokio::spawn(async move { run_worker(id, queues, handler).await })
            })
            .collect()
    }
}

async fn run_worker(
    id: usize,
    mut open: Vec<(EntityType, SharedReceiver)>,
    handler: Arc<dyn JobHandler>,
) -> WorkerTally {
    let mut tally = WorkerTally::default();
    let mut start = id;

    while !open.is_empty() {
        start %= open.len();
        let (index, job) = next_job(&open, start).await;
        start += 1;

        match job {
            Some(path) => {
                let entity_type = open[index].0;
                let outcome = handler.handle(entity_type, &path).await;
                tally.record(entity_type, outcome);
            }
            None => {
                let (entity_type, _) = open.remove(index);
                tracing::debug!(worker = id, entity = %entity_type, "queue drained");
            }
        }
    }

    tally
}

/// Wait on every open queue; returns the index of the queue that yielded
/// and its item, or `None` if that queue is closed and empty.
async fn next_job(open: &[(EntityType, SharedReceiver)], start: usize) -> (usize, Option<PathBuf>) {
    let pulls: Vec<BoxFuture<'_, (usize, Option<PathBuf>)>> = (0..open.len())
        .map(|offset| {
            let index = (start + offset) % open.len();
            let receiver = &open[index].1;
            async move {
                let mut rx = receiver.lock().await;
                (index, rx.recv().await)
            }
            .boxed()
        })
        .collect();

    let (result, _, _) = select_all(pulls).await;
    result
}

/// Wait for every worker and collect their tallies.
pub async fn join_workers(
    handles: Vec<tokio::task::JoinHandle<WorkerTally>>,
) -> Result<Vec<WorkerTally>> {
    let mut tallies = Vec::with_capacity(handles.len());
    for handle in handles {
        tallies.push(handle.await.context("worker task failed")?);
    }
    Ok(tallies)
}
