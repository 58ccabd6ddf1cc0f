//! Turns queued paths into store writes.
//!
//! Scene-file types fan out into one record per node. Dependent types
//! (contacts, synapses, cphate nodes) resolve every neuron they reference at
//! the same timepoint before writing; a reference that does not resolve is a
//! dependency miss and that record is dropped. Tabular types process every
//! CSV row independently. File reads and parsing run on blocking threads.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::classify;
use crate::codec::{self, DecodePolicy};
use crate::models::{
    Contact, Cphate, CphateNode, EntityType, Landmark, LandmarkKind, Neuron, Synapse, Timepoint,
};
use crate::pool::JobHandler;
use crate::report::{ItemError, JobOutcome};
use crate::repository::{
    Applied, ContactRepository, CphateRepository, DevStageRepository, IngestMode, LandmarkRepository,
    LookupCache, MetaRepository, NeuronRepository, PromoterRepository, Repository, StoreError,
    SynapseRepository,
};
use crate::scene::{self, SceneNode};
use crate::tabular::{self, Row};
use crate::walker;

/// Every repository the pipeline writes through.
pub struct Stores {
    pub neurons: NeuronRepository,
    pub contacts: ContactRepository,
    pub synapses: SynapseRepository,
    pub cphates: CphateRepository,
    pub nerve_rings: LandmarkRepository,
    pub scales: LandmarkRepository,
    pub promoters: PromoterRepository,
    pub dev_stages: DevStageRepository,
    pub meta: MetaRepository,
}

impl Stores {
    pub fn new(pool: sqlx::SqlitePool, cache: Arc<LookupCache>) -> Self {
        Self {
            neurons: NeuronRepository::new(pool.clone(), cache),
            contacts: ContactRepository::new(pool.clone()),
            synapses: SynapseRepository::new(pool.clone()),
            cphates: CphateRepository::new(pool.clone()),
            nerve_rings: LandmarkRepository::new(pool.clone(), LandmarkKind::NerveRing),
            scales: LandmarkRepository::new(pool.clone(), LandmarkKind::Scale),
            promoters: PromoterRepository::new(pool.clone()),
            dev_stages: DevStageRepository::new(pool.clone()),
            meta: MetaRepository::new(pool),
        }
    }

    /// Empty the tables of one entity type.
    pub async fn truncate(&self, entity_type: EntityType) -> Result<u64, StoreError> {
        match entity_type {
            EntityType::Neurons => self.neurons.truncate().await,
            EntityType::Contacts => self.contacts.truncate().await,
            EntityType::Synapses => self.synapses.truncate().await,
            EntityType::Cphate => self.cphates.truncate().await,
            EntityType::NerveRing => self.nerve_rings.truncate().await,
            EntityType::Scale => self.scales.truncate().await,
            EntityType::Promoters => self.promoters.truncate().await,
            EntityType::DevStages => self.dev_stages.truncate().await,
            EntityType::Meta => self.meta.truncate().await,
        }
    }
}

pub struct Processor {
    stores: Stores,
    mode: IngestMode,
    policy: DecodePolicy,
    scene_extensions: Vec<String>,
}

impl Processor {
    pub fn new(
        stores: Stores,
        mode: IngestMode,
        policy: DecodePolicy,
        scene_extensions: Vec<String>,
    ) -> Self {
        Self {
            stores,
            mode,
            policy,
            scene_extensions,
        }
    }

    async fn neurons(&self, path: &Path, nodes: Vec<SceneNode>, out: &mut JobOutcome) {
        for node in nodes {
            if let Err(e) = codec::plain_uid(&node.uid) {
                out.fail(EntityType::Neurons, path, None, e);
                continue;
            }
            let neuron = Neuron {
                uid: node.uid,
                timepoint: node.timepoint,
                filename: node.filename,
                file_hash: node.file_hash,
                dev_stage: node.dev_stage,
                color: node.color,
            };
            match self.stores.neurons.ingest(&neuron, self.mode).await {
                Ok(applied) => out.applied(applied),
                Err(e) => out.fail(EntityType::Neurons, path, Some(neuron.uid), e),
            }
        }
    }

    async fn landmarks(
        &self,
        kind: LandmarkKind,
        path: &Path,
        nodes: Vec<SceneNode>,
        out: &mut JobOutcome,
    ) {
        let repo = match kind {
            LandmarkKind::NerveRing => &self.stores.nerve_rings,
            LandmarkKind::Scale => &self.stores.scales,
        };
        for node in nodes {
            if let Err(e) = codec::plain_uid(&node.uid) {
                out.fail(kind.entity_type(), path, None, e);
                continue;
            }
            let landmark = Landmark {
                kind,
                uid: node.uid,
                timepoint: node.timepoint,
                filename: node.filename,
                file_hash: node.file_hash,
                dev_stage: node.dev_stage,
                color: node.color,
            };
            match repo.ingest(&landmark, self.mode).await {
                Ok(applied) => out.applied(applied),
                Err(e) => out.fail(kind.entity_type(), path, Some(landmark.uid), e),
            }
        }
    }

    /// Resolve neuron uids at one timepoint, in order. Misses are returned
    /// as errors, one per unresolved uid.
    async fn resolve_all(
        &self,
        uids: &[String],
        timepoint: Timepoint,
    ) -> Result<Vec<i64>, Vec<ItemError>> {
        let mut ids = Vec::with_capacity(uids.len());
        let mut errors = Vec::new();
        for uid in uids {
            match self.stores.neurons.resolve_id(uid, timepoint).await {
                Ok(Some(id)) => ids.push(id),
                Ok(None) => errors.push(ItemError::DependencyMiss {
                    uid: uid.clone(),
                    timepoint,
                }),
                Err(e) => errors.push(e.into()),
            }
        }
        if errors.is_empty() {
            Ok(ids)
        } else {
            Err(errors)
        }
    }

    async fn contacts(&self, path: &Path, nodes: Vec<SceneNode>, out: &mut JobOutcome) {
        for node in nodes {
            let sides = match codec::parse_contact(&node.uid) {
                Ok(sides) => sides,
                Err(e) => {
                    out.fail(EntityType::Contacts, path, Some(node.uid), e);
                    continue;
                }
            };
            let ids = match self
                .resolve_all(&[sides.before, sides.after], node.timepoint)
                .await
            {
                Ok(ids) => ids,
                Err(errors) => {
                    for e in errors {
                        out.fail(EntityType::Contacts, path, Some(node.uid.clone()), e);
                    }
                    continue;
                }
            };
            let contact = Contact {
                uid: node.uid,
                timepoint: node.timepoint,
                filename: node.filename,
                file_hash: node.file_hash,
                dev_stage: node.dev_stage,
                color: node.color,
                neuron_before_id: ids[0],
                neuron_after_id: ids[1],
            };
            match self.stores.contacts.ingest(&contact, self.mode).await {
                Ok(applied) => out.applied(applied),
                Err(e) => out.fail(EntityType::Contacts, path, Some(contact.uid), e),
            }
        }
    }

    async fn synapses(&self, path: &Path, nodes: Vec<SceneNode>, out: &mut JobOutcome) {
        for node in nodes {
            let name = match codec::parse_synapse(&node.uid) {
                Ok(name) => name,
                Err(e) => {
                    out.fail(EntityType::Synapses, path, Some(node.uid), e);
                    continue;
                }
            };
            let mut uids = Vec::with_capacity(name.post.len() + 1);
            uids.push(name.pre.clone());
            uids.extend(name.post.iter().cloned());
            let ids = match self.resolve_all(&uids, node.timepoint).await {
                Ok(ids) => ids,
                Err(errors) => {
                    for e in errors {
                        out.fail(EntityType::Synapses, path, Some(node.uid.clone()), e);
                    }
                    continue;
                }
            };
            let synapse = Synapse {
                uid: node.uid,
                timepoint: node.timepoint,
                synapse_type: name.synapse_type,
                section: name.descriptor.section,
                position: name.descriptor.position,
                site: name.descriptor.site,
                filename: node.filename,
                file_hash: node.file_hash,
                dev_stage: node.dev_stage,
                color: node.color,
                pre_neuron_id: ids[0],
                post_neuron_ids: ids[1..].to_vec(),
            };
            match self.stores.synapses.ingest(&synapse, self.mode).await {
                Ok(applied) => out.applied(applied),
                Err(e) => out.fail(EntityType::Synapses, path, Some(synapse.uid), e),
            }
        }
    }

    /// One cphate per timepoint directory; its nodes come from every scene
    /// file below it.
    async fn cphate(&self, dir: &Path, out: &mut JobOutcome) {
        let timepoint = match classify::timepoint(dir) {
            Ok(tp) => tp,
            Err(e) => {
                out.fail(EntityType::Cphate, dir, None, e);
                return;
            }
        };
        let uid = Cphate::uid_for(timepoint);

        let extensions = self.scene_extensions.clone();
        let owned_dir = dir.to_path_buf();
        let parsed = tokio::task::spawn_blocking(move || {
            walker::scene_files_under(&owned_dir, &extensions)
                .into_iter()
                .map(|file| {
                    let result = scene::parse_scene_file(&file);
                    (file, result)
                })
                .collect::<Vec<_>>()
        })
        .await;
        let parsed = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                out.fail(EntityType::Cphate, dir, Some(uid), ItemError::Task(e.to_string()));
                return;
            }
        };

        let mut nodes = Vec::new();
        let mut seen = HashSet::new();
        for (file, result) in parsed {
            let scene_nodes = match result {
                Ok(nodes) => nodes,
                Err(e) => {
                    out.fail(EntityType::Cphate, &file, Some(uid.clone()), e);
                    continue;
                }
            };
            for node in scene_nodes {
                let name = match codec::parse_cphate_node(&node.uid, self.policy) {
                    Ok(name) => name,
                    Err(e) => {
                        out.fail(EntityType::Cphate, &file, Some(node.uid), e);
                        continue;
                    }
                };
                if !seen.insert(node.uid.clone()) {
                    out.fail(
                        EntityType::Cphate,
                        &file,
                        Some(uid.clone()),
                        ItemError::DuplicateNode(node.uid),
                    );
                    continue;
                }

                let mut neuron_ids = Vec::with_capacity(name.neurons.len());
                for member in &name.neurons {
                    match self.stores.neurons.resolve_id(member, timepoint).await {
                        Ok(Some(id)) => neuron_ids.push(id),
                        Ok(None) => out.fail(
                            EntityType::Cphate,
                            &file,
                            Some(node.uid.clone()),
                            ItemError::DependencyMiss {
                                uid: member.clone(),
                                timepoint,
                            },
                        ),
                        Err(e) => out.fail(EntityType::Cphate, &file, Some(node.uid.clone()), e),
                    }
                }

                nodes.push(CphateNode {
                    uid: node.uid,
                    filename: node.filename,
                    color: node.color,
                    cluster: name.cluster,
                    cluster_count: name.cluster_count,
                    iteration: name.iteration,
                    iteration_count: name.iteration_count,
                    serial: name.serial,
                    neuron_ids,
                });
            }
        }

        let cphate = Cphate {
            uid,
            timepoint,
            dev_stage: classify::dev_stage(dir).ok(),
            nodes,
        };
        tracing::debug!(
            dir = %dir.display(),
            nodes = cphate.nodes.len(),
            "cphate tree assembled"
        );
        match self.stores.cphates.ingest(&cphate, self.mode).await {
            Ok(applied) => out.applied(applied),
            Err(e) => out.fail(EntityType::Cphate, dir, Some(cphate.uid), e),
        }
    }

    async fn read_csv(&self, entity_type: EntityType, path: &Path, out: &mut JobOutcome) -> Vec<Row> {
        let owned = path.to_path_buf();
        match tokio::task::spawn_blocking(move || tabular::read_rows(&owned)).await {
            Ok(Ok(rows)) => rows,
            Ok(Err(e)) => {
                out.fail(entity_type, path, None, ItemError::Csv(e.to_string()));
                Vec::new()
            }
            Err(e) => {
                out.fail(entity_type, path, None, ItemError::Task(e.to_string()));
                Vec::new()
            }
        }
    }

    async fn promoters(&self, path: &Path, out: &mut JobOutcome) {
        for row in self.read_csv(EntityType::Promoters, path, out).await {
            let line = row.line;
            let promoter = match row.record.and_then(|r| tabular::parse_promoter(&r)) {
                Ok(p) => p,
                Err(source) => {
                    out.fail(EntityType::Promoters, path, None, ItemError::Row { line, source });
                    continue;
                }
            };
            match self.stores.promoters.ingest(&promoter, self.mode).await {
                Ok(applied) => out.applied(applied),
                Err(e) => out.fail(EntityType::Promoters, path, Some(promoter.uid), e),
            }
        }
    }

    async fn dev_stages(&self, path: &Path, out: &mut JobOutcome) {
        for row in self.read_csv(EntityType::DevStages, path, out).await {
            let line = row.line;
            let stage = match row.record.and_then(|r| tabular::parse_dev_stage(&r)) {
                Ok(s) => s,
                Err(source) => {
                    out.fail(EntityType::DevStages, path, None, ItemError::Row { line, source });
                    continue;
                }
            };
            match self.stores.dev_stages.ingest(&stage, self.mode).await {
                Ok(applied) => out.applied(applied),
                Err(e) => out.fail(EntityType::DevStages, path, Some(stage.uid), e),
            }
        }
    }

    async fn meta(&self, path: &Path, out: &mut JobOutcome) {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let Some((subject, kind)) = tabular::meta_kind(&filename) else {
            out.fail(EntityType::Meta, path, None, ItemError::UnknownMetaFile);
            return;
        };
        let timepoint = match classify::timepoint(path) {
            Ok(tp) => tp,
            Err(e) => {
                out.fail(EntityType::Meta, path, None, e);
                return;
            }
        };

        for row in self.read_csv(EntityType::Meta, path, out).await {
            let line = row.line;
            let measurement = match row
                .record
                .and_then(|r| tabular::parse_meta(&r, subject, kind, timepoint))
            {
                Ok(m) => m,
                Err(source) => {
                    out.fail(EntityType::Meta, path, None, ItemError::Row { line, source });
                    continue;
                }
            };
            match self.stores.meta.apply(&measurement).await {
                Ok(true) => out.applied(Applied::Inserted),
                Ok(false) => out.fail(
                    EntityType::Meta,
                    path,
                    Some(measurement.uid.clone()),
                    ItemError::DependencyMiss {
                        uid: measurement.uid,
                        timepoint,
                    },
                ),
                Err(e) => out.fail(EntityType::Meta, path, Some(measurement.uid), e),
            }
        }
    }
}

async fn parse_scene(path: &Path) -> Result<Vec<SceneNode>, ItemError> {
    let owned = path.to_path_buf();
    match tokio::task::spawn_blocking(move || scene::parse_scene_file(&owned)).await {
        Ok(result) => result.map_err(ItemError::from),
        Err(e) => Err(ItemError::Task(e.to_string())),
    }
}

#[async_trait]
impl JobHandler for Processor {
    async fn handle(&self, entity_type: EntityType, path: &Path) -> JobOutcome {
        let mut out = JobOutcome::default();

        match entity_type {
            EntityType::Cphate => self.cphate(path, &mut out).await,
            EntityType::Promoters => self.promoters(path, &mut out).await,
            EntityType::DevStages => self.dev_stages(path, &mut out).await,
            EntityType::Meta => self.meta(path, &mut out).await,
            scene_type => {
                let nodes = match parse_scene(path).await {
                    Ok(nodes) => nodes,
                    Err(e) => {
                        out.fail(scene_type, path, None, e);
                        return out;
                    }
                };
                match scene_type {
                    EntityType::Neurons => self.neurons(path, nodes, &mut out).await,
                    EntityType::NerveRing => {
                        self.landmarks(LandmarkKind::NerveRing, path, nodes, &mut out)
                            .await
                    }
                    EntityType::Scale => {
                        self.landmarks(LandmarkKind::Scale, path, nodes, &mut out)
                            .await
                    }
                    EntityType::Contacts => self.contacts(path, nodes, &mut out).await,
                    EntityType::Synapses => self.synapses(path, nodes, &mut out).await,
                    _ => {}
                }
            }
        }

        tracing::debug!(
            entity = %entity_type,
            path = %path.display(),
            inserted = out.inserted,
            replaced = out.replaced,
            skipped = out.skipped,
            failed = out.failures.len(),
            "job done"
        );
        out
    }
}
