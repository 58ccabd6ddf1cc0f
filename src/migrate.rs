use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Neuron references on dependent rows are soft (looked up by uid and
/// timepoint at ingest time), so they carry no foreign key. Child tables of a
/// composite record cascade from their parent.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS neurons (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ext_id TEXT NOT NULL UNIQUE,
        uid TEXT NOT NULL,
        timepoint INTEGER NOT NULL,
        filename TEXT NOT NULL,
        file_hash TEXT NOT NULL,
        dev_stage TEXT NOT NULL,
        color TEXT NOT NULL,
        surface_area REAL,
        volume REAL,
        UNIQUE(uid, timepoint)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS contacts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ext_id TEXT NOT NULL UNIQUE,
        uid TEXT NOT NULL,
        timepoint INTEGER NOT NULL,
        filename TEXT NOT NULL,
        file_hash TEXT NOT NULL,
        dev_stage TEXT NOT NULL,
        color TEXT NOT NULL,
        neuron_before_id INTEGER NOT NULL,
        neuron_after_id INTEGER NOT NULL,
        surface_area REAL,
        UNIQUE(uid, timepoint)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS synapses (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ext_id TEXT NOT NULL UNIQUE,
        uid TEXT NOT NULL,
        timepoint INTEGER NOT NULL,
        synapse_type TEXT NOT NULL,
        section TEXT,
        position TEXT,
        site INTEGER NOT NULL DEFAULT 0,
        filename TEXT NOT NULL,
        file_hash TEXT NOT NULL,
        dev_stage TEXT NOT NULL,
        color TEXT NOT NULL,
        pre_neuron_id INTEGER NOT NULL,
        UNIQUE(uid, timepoint)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS synapse_post_neurons (
        synapse_id INTEGER NOT NULL,
        position INTEGER NOT NULL,
        neuron_id INTEGER NOT NULL,
        PRIMARY KEY (synapse_id, position),
        FOREIGN KEY (synapse_id) REFERENCES synapses(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cphates (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ext_id TEXT NOT NULL UNIQUE,
        uid TEXT NOT NULL,
        timepoint INTEGER NOT NULL UNIQUE,
        dev_stage TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cphate_nodes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        cphate_id INTEGER NOT NULL,
        uid TEXT NOT NULL,
        filename TEXT NOT NULL,
        color TEXT NOT NULL,
        cluster INTEGER NOT NULL,
        cluster_count INTEGER NOT NULL,
        iteration INTEGER NOT NULL,
        iteration_count INTEGER NOT NULL,
        serial INTEGER NOT NULL,
        UNIQUE(cphate_id, uid),
        FOREIGN KEY (cphate_id) REFERENCES cphates(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cphate_node_neurons (
        node_id INTEGER NOT NULL,
        position INTEGER NOT NULL,
        neuron_id INTEGER NOT NULL,
        PRIMARY KEY (node_id, position),
        FOREIGN KEY (node_id) REFERENCES cphate_nodes(id) ON DELETE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS nerve_rings (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        uid TEXT NOT NULL,
        timepoint INTEGER NOT NULL,
        filename TEXT NOT NULL,
        file_hash TEXT NOT NULL,
        dev_stage TEXT NOT NULL,
        color TEXT NOT NULL,
        UNIQUE(uid, timepoint)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS scales (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        uid TEXT NOT NULL,
        timepoint INTEGER NOT NULL,
        filename TEXT NOT NULL,
        file_hash TEXT NOT NULL,
        dev_stage TEXT NOT NULL,
        color TEXT NOT NULL,
        UNIQUE(uid, timepoint)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS promoters (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ext_id TEXT NOT NULL UNIQUE,
        uid TEXT NOT NULL UNIQUE,
        wormbase TEXT NOT NULL,
        cellular_expression_pattern TEXT NOT NULL,
        timepoint_start INTEGER NOT NULL,
        timepoint_end INTEGER NOT NULL,
        cells_by_lineaging TEXT NOT NULL,
        expression_patterns TEXT NOT NULL,
        information TEXT NOT NULL,
        other_cells TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS developmental_stages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ext_id TEXT NOT NULL UNIQUE,
        uid TEXT NOT NULL UNIQUE,
        begin_tp INTEGER NOT NULL,
        end_tp INTEGER NOT NULL,
        stage_order INTEGER NOT NULL,
        promoter_db INTEGER,
        timepoints TEXT NOT NULL DEFAULT '[]'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ingest_runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        root TEXT NOT NULL,
        started_at INTEGER NOT NULL,
        finished_at INTEGER NOT NULL,
        ingested INTEGER NOT NULL,
        skipped INTEGER NOT NULL,
        failed INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_neurons_timepoint ON neurons(timepoint)",
    "CREATE INDEX IF NOT EXISTS idx_contacts_timepoint ON contacts(timepoint)",
    "CREATE INDEX IF NOT EXISTS idx_synapses_timepoint ON synapses(timepoint)",
    "CREATE INDEX IF NOT EXISTS idx_cphate_nodes_cphate_id ON cphate_nodes(cphate_id)",
];

/// Create the database file if needed and bring the schema up to date.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Apply every schema statement on an open pool. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .with_context(|| "Failed to apply schema")?;
    }
    Ok(())
}
