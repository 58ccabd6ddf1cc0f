use sqlx::{Row, SqlitePool};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use neuroscan::config::Config;
use neuroscan::db;
use neuroscan::ingest::{run_ingest, IngestOptions};
use neuroscan::migrate;
use neuroscan::models::{
    Color, Cphate, CphateNode, DevStage, EntityType, Synapse, SynapsePosition, SynapseType,
};
use neuroscan::progress::NoProgress;
use neuroscan::report::{IngestReport, ItemError};
use neuroscan::repository::{
    CphateRepository, Repository, StoreError, SynapseRepository, TimedKey,
};

const NEURON_COLOR: [f64; 4] = [0.5, 0.25, 1.0, 1.0];

fn gltf(nodes: &[&str]) -> String {
    let nodes: Vec<String> = nodes
        .iter()
        .map(|n| format!(r#"{{"name": "{}"}}"#, n))
        .collect();
    format!(
        r#"{{
  "asset": {{"version": "2.0"}},
  "materials": [{{"pbrMetallicRoughness": {{"baseColorFactor": [0.5, 0.25, 1.0, 1.0]}}}}],
  "nodes": [{}]
}}"#,
        nodes.join(", ")
    )
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// A small but complete dataset: three neurons at L1/0, one of every
/// dependent type, landmarks, and the tabular files.
fn dataset(root: &Path) {
    write(root, "neurons/L1/0/ADAL.gltf", &gltf(&["ADAL"]));
    write(root, "neurons/L1/0/AVAL.gltf", &gltf(&["AVAL"]));
    write(root, "neurons/L1/0/RIAR.gltf", &gltf(&["RIAR"]));
    write(root, "nerveRing/L1/0/nr.gltf", &gltf(&["nerveRing"]));
    write(root, "scale/L1/0/scale.gltf", &gltf(&["scale"]));

    write(root, "contacts/L1/0/ADALbyAVAL.gltf", &gltf(&["ADALbyAVAL"]));
    write(
        root,
        "synapses/L1/0/ADAL.gltf",
        &gltf(&["ADALchemicalAVAL&RIAR~A_post2"]),
    );
    write(
        root,
        "cphate/L1/0/clusters.gltf",
        &gltf(&["ADAL_AVAL-i1/2-c1/3-s5", "RIAR-i2/2-c3/3-s6"]),
    );

    write(
        root,
        "meta/L1/0/cell_sa.csv",
        "uid,surface_area\nADAL,12.5\nGHOST,1.0\n",
    );
    write(
        root,
        "meta/L1/0/patch_sa.csv",
        "uid,surface_area\nADALbyAVAL,4.0\n",
    );
    write(
        root,
        "promoters/promoters.csv",
        "uid,wormbase,pattern,start,end,lineaging,patterns,info,other\n\
         ceh-36,WBGene1,AWC,5,20,ABpl,neurons,note,none\n\
         unc-86,WBGene2,,0,,,,,\n",
    );
    write(
        root,
        "dev_stages/stages.csv",
        "uid,begin,end,order,promoter_db,timepoints\n\
         L1,0,16,1,t,\"{0,5,8}\"\n\
         L2,17,25,2,f,\n",
    );

    // Never routed.
    write(root, "README.md", "dataset notes");
}

struct Env {
    _tmp: TempDir,
    data: PathBuf,
    config: Config,
}

fn env() -> Env {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("ingest");
    fs::create_dir_all(&data).unwrap();
    dataset(&data);

    let mut config = Config::minimal();
    config.db.path = tmp.path().join("db").join("neuroscan.sqlite");
    config.ingest.workers = 4;

    Env {
        _tmp: tmp,
        data,
        config,
    }
}

impl Env {
    fn options(&self) -> IngestOptions {
        IngestOptions::from_config(&self.config, &self.data)
    }

    async fn ingest(&self, options: IngestOptions) -> IngestReport {
        run_ingest(&self.config, &options, &NoProgress).await.unwrap()
    }

    async fn pool(&self) -> SqlitePool {
        db::connect(&self.config).await.unwrap()
    }

    async fn count(&self, table: &str) -> i64 {
        let pool = self.pool().await;
        let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&pool)
            .await
            .unwrap();
        pool.close().await;
        n
    }
}

#[tokio::test]
async fn full_tree_ingests_every_entity_type() {
    let env = env();
    let report = env.ingest(env.options()).await;

    assert_eq!(report.phases, 3);
    assert_eq!(report.tally(EntityType::Neurons).inserted, 3);
    assert_eq!(report.tally(EntityType::NerveRing).inserted, 1);
    assert_eq!(report.tally(EntityType::Scale).inserted, 1);
    assert_eq!(report.tally(EntityType::Contacts).inserted, 1);
    assert_eq!(report.tally(EntityType::Synapses).inserted, 1);
    assert_eq!(report.tally(EntityType::Cphate).inserted, 1);
    assert_eq!(report.tally(EntityType::Promoters).inserted, 2);
    assert_eq!(report.tally(EntityType::DevStages).inserted, 2);
    assert_eq!(report.tally(EntityType::Meta).inserted, 2);
    assert_eq!(report.unclassified.len(), 1);
    assert!(report.unclassified[0].ends_with("README.md"));

    // Only the measurement for an unknown neuron fails.
    assert_eq!(report.failures.len(), 1, "{:?}", report.failures);
    assert_eq!(report.dependency_misses(), 1);
    match &report.failures[0].error {
        ItemError::DependencyMiss { uid, timepoint } => {
            assert_eq!(uid, "GHOST");
            assert_eq!(*timepoint, 0);
        }
        other => panic!("unexpected failure: {}", other),
    }

    assert_eq!(env.count("neurons").await, 3);
    assert_eq!(env.count("contacts").await, 1);
    assert_eq!(env.count("synapses").await, 1);
    assert_eq!(env.count("cphates").await, 1);
    assert_eq!(env.count("nerve_rings").await, 1);
    assert_eq!(env.count("scales").await, 1);
    assert_eq!(env.count("promoters").await, 2);
    assert_eq!(env.count("developmental_stages").await, 2);
    assert_eq!(env.count("ingest_runs").await, 1);
}

#[tokio::test]
async fn neuron_fields_round_trip() {
    let env = env();
    env.ingest(env.options()).await;

    let pool = env.pool().await;
    let row = sqlx::query(
        "SELECT ext_id, timepoint, filename, dev_stage, color, surface_area FROM neurons WHERE uid = 'ADAL'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();

    let ext_id: String = row.get("ext_id");
    assert!(ext_id.starts_with("nrn_"));
    assert_eq!(row.get::<i64, _>("timepoint"), 0);
    assert_eq!(row.get::<String, _>("filename"), "ADAL.gltf");
    assert_eq!(row.get::<String, _>("dev_stage"), "L1");
    let color = Color::from_json(&row.get::<String, _>("color")).unwrap();
    assert_eq!(color, Color(NEURON_COLOR));
    assert_eq!(row.get::<Option<f64>, _>("surface_area"), Some(12.5));
    pool.close().await;
}

#[tokio::test]
async fn dependents_reference_resolved_neurons() {
    let env = env();
    env.ingest(env.options()).await;
    let pool = env.pool().await;

    let neuron_id = |uid: &'static str| {
        let pool = pool.clone();
        async move {
            sqlx::query_scalar::<_, i64>("SELECT id FROM neurons WHERE uid = ? AND timepoint = 0")
                .bind(uid)
                .fetch_one(&pool)
                .await
                .unwrap()
        }
    };
    let adal = neuron_id("ADAL").await;
    let aval = neuron_id("AVAL").await;
    let riar = neuron_id("RIAR").await;

    let contact = sqlx::query("SELECT neuron_before_id, neuron_after_id FROM contacts")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(contact.get::<i64, _>("neuron_before_id"), adal);
    assert_eq!(contact.get::<i64, _>("neuron_after_id"), aval);

    let synapse = sqlx::query(
        "SELECT id, synapse_type, section, position, site, pre_neuron_id FROM synapses",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(synapse.get::<String, _>("synapse_type"), "chemical");
    assert_eq!(synapse.get::<Option<String>, _>("section").as_deref(), Some("A"));
    assert_eq!(synapse.get::<Option<String>, _>("position").as_deref(), Some("post"));
    assert_eq!(synapse.get::<i64, _>("site"), 2);
    assert_eq!(synapse.get::<i64, _>("pre_neuron_id"), adal);

    let synapses = SynapseRepository::new(pool.clone());
    let post = synapses
        .post_neuron_ids(synapse.get::<i64, _>("id"))
        .await
        .unwrap();
    assert_eq!(post, vec![aval, riar]);

    let nodes = sqlx::query(
        "SELECT uid, iteration, iteration_count, cluster, cluster_count, serial FROM cphate_nodes ORDER BY serial",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0].get::<String, _>("uid"), "ADAL_AVAL-i1/2-c1/3-s5");
    assert_eq!(nodes[0].get::<i64, _>("iteration"), 1);
    assert_eq!(nodes[0].get::<i64, _>("iteration_count"), 2);
    assert_eq!(nodes[0].get::<i64, _>("cluster"), 1);
    assert_eq!(nodes[0].get::<i64, _>("cluster_count"), 3);
    assert_eq!(nodes[1].get::<i64, _>("serial"), 6);

    let cphate_uid: String = sqlx::query_scalar("SELECT uid FROM cphates")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(cphate_uid, "CPHATE 0");
    let cphates = CphateRepository::new(pool.clone());
    assert_eq!(cphates.node_count(0).await.unwrap(), 2);
    assert_eq!(cphates.node_count(1).await.unwrap(), 0);
    assert_eq!(
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM cphate_node_neurons")
            .fetch_one(&pool)
            .await
            .unwrap(),
        3
    );
    pool.close().await;
}

#[tokio::test]
async fn rerun_with_skip_existing_is_idempotent() {
    let env = env();
    env.ingest(env.options()).await;

    let mut options = env.options();
    options.skip_existing = true;
    let report = env.ingest(options).await;

    let neurons = report.tally(EntityType::Neurons);
    assert_eq!(neurons.inserted, 0);
    assert_eq!(neurons.skipped, 3);
    assert_eq!(report.tally(EntityType::Cphate).skipped, 1);
    assert_eq!(report.tally(EntityType::Promoters).skipped, 2);

    assert_eq!(env.count("neurons").await, 3);
    assert_eq!(env.count("cphate_nodes").await, 2);
    assert_eq!(env.count("synapse_post_neurons").await, 2);
}

#[tokio::test]
async fn rerun_without_flags_reports_conflicts() {
    let env = env();
    env.ingest(env.options()).await;
    let report = env.ingest(env.options()).await;

    assert_eq!(report.tally(EntityType::Neurons).failed, 3);
    let conflicts = report
        .failures
        .iter()
        .filter(|f| matches!(f.error, ItemError::Store(StoreError::Conflict(_))))
        .count();
    assert!(conflicts >= 3, "{:?}", report.failures);
    assert_eq!(env.count("neurons").await, 3);
}

/// Rows pointing at a neuron id that no longer exists.
const DANGLING: &[&str] = &[
    "SELECT COUNT(*) FROM contacts c LEFT JOIN neurons n ON n.id = c.neuron_before_id WHERE n.id IS NULL",
    "SELECT COUNT(*) FROM contacts c LEFT JOIN neurons n ON n.id = c.neuron_after_id WHERE n.id IS NULL",
    "SELECT COUNT(*) FROM synapses s LEFT JOIN neurons n ON n.id = s.pre_neuron_id WHERE n.id IS NULL",
    "SELECT COUNT(*) FROM synapse_post_neurons e LEFT JOIN neurons n ON n.id = e.neuron_id WHERE n.id IS NULL",
    "SELECT COUNT(*) FROM cphate_node_neurons e LEFT JOIN neurons n ON n.id = e.neuron_id WHERE n.id IS NULL",
];

async fn dangling_references(pool: &SqlitePool) -> Vec<i64> {
    let mut counts = Vec::new();
    for sql in DANGLING {
        counts.push(sqlx::query_scalar::<_, i64>(sql).fetch_one(pool).await.unwrap());
    }
    counts
}

async fn row_ids(pool: &SqlitePool, table: &str) -> Vec<(String, i64, Option<f64>)> {
    sqlx::query_as(&format!(
        "SELECT uid, id, surface_area FROM {} ORDER BY uid",
        table
    ))
    .fetch_all(pool)
    .await
    .unwrap()
}

#[tokio::test]
async fn force_keeps_row_ids_and_measurements() {
    let env = env();
    env.ingest(env.options()).await;

    let pool = env.pool().await;
    let neurons_before = row_ids(&pool, "neurons").await;
    let contacts_before = row_ids(&pool, "contacts").await;
    assert_eq!(dangling_references(&pool).await, vec![0; DANGLING.len()]);

    let mut options = env.options();
    options.force = true;
    options.types = vec![EntityType::Neurons];
    let report = env.ingest(options).await;

    let neurons = report.tally(EntityType::Neurons);
    assert_eq!(neurons.replaced, 3);
    assert_eq!(neurons.inserted, 0);
    assert!(report.failures.is_empty());
    assert_eq!(dangling_references(&pool).await, vec![0; DANGLING.len()]);
    assert_eq!(row_ids(&pool, "neurons").await, neurons_before);

    let mut options = env.options();
    options.force = true;
    options.types = vec![EntityType::Contacts];
    let report = env.ingest(options).await;

    assert_eq!(report.tally(EntityType::Contacts).replaced, 1);
    let contacts_after = row_ids(&pool, "contacts").await;
    assert_eq!(contacts_after, contacts_before);
    assert_eq!(contacts_after[0].2, Some(4.0));
    assert_eq!(neurons_before[0].0, "ADAL");
    assert_eq!(neurons_before[0].2, Some(12.5));
    pool.close().await;
}

#[tokio::test]
async fn dependents_without_neurons_are_misses() {
    let env = env();
    let mut options = env.options();
    options.types = vec![EntityType::Contacts];
    let report = env.ingest(options).await;

    assert_eq!(report.phases, 1);
    assert_eq!(report.tally(EntityType::Contacts).inserted, 0);
    // Both sides of the contact are unresolved.
    assert_eq!(report.dependency_misses(), 2);
    assert_eq!(env.count("contacts").await, 0);

    // Once neurons exist the same contact goes through.
    let mut options = env.options();
    options.types = vec![EntityType::Neurons, EntityType::Contacts];
    let report = env.ingest(options).await;
    assert_eq!(report.phases, 2);
    assert_eq!(report.dependency_misses(), 0);
    assert_eq!(env.count("contacts").await, 1);
}

#[tokio::test]
async fn no_barrier_runs_a_single_phase() {
    let env = env();
    let mut options = env.options();
    options.phase_barrier = false;
    options.types = vec![EntityType::Neurons, EntityType::Promoters];
    let report = env.ingest(options).await;

    assert_eq!(report.phases, 1);
    assert_eq!(report.tally(EntityType::Neurons).inserted, 3);
    assert_eq!(report.tally(EntityType::Promoters).inserted, 2);
    assert!(report.failures.is_empty());
}

#[tokio::test]
async fn tabular_rows_are_stored() {
    let env = env();
    let mut options = env.options();
    options.types = vec![EntityType::Promoters, EntityType::DevStages];
    env.ingest(options).await;

    let pool = env.pool().await;
    let promoter = sqlx::query(
        "SELECT wormbase, timepoint_start, timepoint_end FROM promoters WHERE uid = 'unc-86'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(promoter.get::<String, _>("wormbase"), "WBGene2");
    assert_eq!(promoter.get::<i64, _>("timepoint_start"), 0);
    assert_eq!(promoter.get::<i64, _>("timepoint_end"), 0);

    let stage = sqlx::query(
        "SELECT begin_tp, end_tp, stage_order, promoter_db, timepoints FROM developmental_stages WHERE uid = 'L1'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(stage.get::<i64, _>("end_tp"), 16);
    assert_eq!(stage.get::<Option<bool>, _>("promoter_db"), Some(true));
    let timepoints: Vec<i64> =
        serde_json::from_str(&stage.get::<String, _>("timepoints")).unwrap();
    assert_eq!(timepoints, vec![0, 5, 8]);
    pool.close().await;
}

#[tokio::test]
async fn bad_rows_do_not_stop_the_file() {
    let env = env();
    write(
        &env.data,
        "promoters/promoters.csv",
        "uid,wormbase,pattern,start,end,lineaging,patterns,info,other\n\
         ceh-36,WBGene1,AWC,five,20,ABpl,neurons,note,none\n\
         short,row\n\
         unc-86,WBGene2,,0,,,,,\n",
    );
    let mut options = env.options();
    options.types = vec![EntityType::Promoters];
    let report = env.ingest(options).await;

    assert_eq!(report.tally(EntityType::Promoters).inserted, 1);
    assert_eq!(report.failures.len(), 2);
    assert!(report
        .failures
        .iter()
        .all(|f| matches!(f.error, ItemError::Row { .. })));
}

#[tokio::test]
async fn clean_truncates_selected_types_first() {
    let env = env();
    env.ingest(env.options()).await;

    fs::remove_file(env.data.join("neurons/L1/0/RIAR.gltf")).unwrap();
    let mut options = env.options();
    options.clean = true;
    options.types = vec![EntityType::Neurons, EntityType::Meta];
    let report = env.ingest(options).await;

    assert_eq!(report.tally(EntityType::Neurons).inserted, 2);
    assert_eq!(env.count("neurons").await, 2);
    // Other entity types are untouched.
    assert_eq!(env.count("promoters").await, 2);
    assert_eq!(env.count("contacts").await, 1);
}

#[tokio::test]
async fn unreadable_root_is_fatal() {
    let env = env();
    let options = IngestOptions::from_config(&env.config, env.data.join("missing"));
    let err = run_ingest(&env.config, &options, &NoProgress).await.unwrap_err();
    assert!(err.to_string().contains("Cannot read ingestion root"));
}

fn synapse_record(pre: i64, post: Vec<i64>) -> Synapse {
    Synapse {
        uid: "ADALchemicalAVAL&RIAR~A_post2".to_string(),
        timepoint: 7,
        synapse_type: SynapseType::Chemical,
        section: Some("A".to_string()),
        position: Some(SynapsePosition::Post),
        site: 2,
        filename: "syn.gltf".to_string(),
        file_hash: "abc".to_string(),
        dev_stage: DevStage::L2,
        color: Color::WHITE,
        pre_neuron_id: pre,
        post_neuron_ids: post,
    }
}

fn cphate_record() -> Cphate {
    let node = |uid: &str, serial: u32, neuron_ids: Vec<i64>| CphateNode {
        uid: uid.to_string(),
        filename: "clusters.gltf".to_string(),
        color: Color::WHITE,
        cluster: 1,
        cluster_count: 2,
        iteration: 1,
        iteration_count: 1,
        serial,
        neuron_ids,
    };
    Cphate {
        uid: Cphate::uid_for(7),
        timepoint: 7,
        dev_stage: Some(DevStage::L2),
        nodes: vec![
            node("ADAL_AVAL-i1/1-c1/2-s1", 1, vec![1, 2]),
            node("RIAR-i1/1-c2/2-s2", 2, vec![3]),
        ],
    }
}

#[tokio::test]
async fn delete_removes_composite_records_with_children() {
    let env = env();
    let pool = env.pool().await;
    migrate::apply(&pool).await.unwrap();

    let synapses = SynapseRepository::new(pool.clone());
    let synapse = synapse_record(1, vec![2, 3]);
    let synapse_id = synapses.create(&synapse).await.unwrap();
    assert_eq!(synapses.post_neuron_ids(synapse_id).await.unwrap(), vec![2, 3]);

    let cphates = CphateRepository::new(pool.clone());
    cphates.create(&cphate_record()).await.unwrap();
    assert_eq!(cphates.node_count(7).await.unwrap(), 2);

    let key = TimedKey::new(&synapse.uid, 7);
    assert!(synapses.exists(&key).await.unwrap());
    assert_eq!(synapses.delete(&key).await.unwrap(), 1);
    assert!(!synapses.exists(&key).await.unwrap());
    assert!(synapses.post_neuron_ids(synapse_id).await.unwrap().is_empty());

    assert_eq!(cphates.delete(&7).await.unwrap(), 1);
    assert!(!cphates.exists(&7).await.unwrap());
    assert_eq!(cphates.node_count(7).await.unwrap(), 0);

    for table in ["synapse_post_neurons", "cphate_nodes", "cphate_node_neurons"] {
        let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(n, 0, "{} rows left after delete", table);
    }

    // Deleting an absent key is not an error.
    assert_eq!(synapses.delete(&key).await.unwrap(), 0);
    pool.close().await;
}

#[tokio::test]
async fn failed_truncate_is_reported_and_the_run_continues() {
    let env = env();
    env.ingest(env.options()).await;

    let pool = env.pool().await;
    sqlx::query(
        "CREATE TRIGGER keep_promoters BEFORE DELETE ON promoters BEGIN SELECT RAISE(ABORT, 'promoters are locked'); END",
    )
    .execute(&pool)
    .await
    .unwrap();
    pool.close().await;

    let mut options = env.options();
    options.clean = true;
    options.types = vec![EntityType::Neurons, EntityType::Promoters];
    let report = env.ingest(options).await;

    let truncate_failure = report
        .failures
        .iter()
        .find(|f| f.entity_type == Some(EntityType::Promoters) && f.path == env.data)
        .expect("truncate failure is reported");
    assert!(matches!(
        truncate_failure.error,
        ItemError::Store(StoreError::Database(_))
    ));
    assert!(truncate_failure.to_string().contains("promoters are locked"));

    // Neurons were still cleaned and re-ingested.
    assert_eq!(report.tally(EntityType::Neurons).inserted, 3);
    assert_eq!(env.count("neurons").await, 3);
    assert_eq!(env.count("promoters").await, 2);
}
