//! Database statistics overview.
//!
//! Row counts per entity table, measurement coverage, and the most recent
//! ingest runs. Used by `neuroscan stats` to check what a run left behind.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::migrate;

const TABLES: &[(&str, &str)] = &[
    ("neurons", "Neurons"),
    ("contacts", "Contacts"),
    ("synapses", "Synapses"),
    ("synapse_post_neurons", "  post edges"),
    ("cphates", "Cphates"),
    ("cphate_nodes", "  nodes"),
    ("cphate_node_neurons", "  node members"),
    ("nerve_rings", "Nerve rings"),
    ("scales", "Scales"),
    ("promoters", "Promoters"),
    ("developmental_stages", "Dev stages"),
];

/// Row counts keyed by table name, in display order.
pub async fn table_counts(pool: &SqlitePool) -> Result<Vec<(&'static str, i64)>> {
    let mut counts = Vec::with_capacity(TABLES.len());
    for (table, _) in TABLES {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(pool)
            .await?;
        counts.push((*table, count));
    }
    Ok(counts)
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;

    let counts = table_counts(&pool).await?;

    let measured_neurons: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM neurons WHERE surface_area IS NOT NULL OR volume IS NOT NULL",
    )
    .fetch_one(&pool)
    .await?;
    let measured_contacts: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM contacts WHERE surface_area IS NOT NULL")
            .fetch_one(&pool)
            .await?;
    let timepoints: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT timepoint) FROM neurons")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("NeuroSCAN — Database Stats");
    println!("==========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Timepoints:  {}", timepoints);
    println!();
    for ((_, count), (_, label)) in counts.iter().zip(TABLES) {
        println!("  {:<16} {:>10}", label, count);
    }
    println!();
    println!("  Measured neurons:  {}", measured_neurons);
    println!("  Measured contacts: {}", measured_contacts);

    let runs = sqlx::query(
        r#"
        SELECT root, finished_at, ingested, skipped, failed
        FROM ingest_runs
        ORDER BY id DESC
        LIMIT 5
        "#,
    )
    .fetch_all(&pool)
    .await?;

    if !runs.is_empty() {
        println!();
        println!("  Recent ingests:");
        println!(
            "  {:<32} {:>9} {:>8} {:>7}   {}",
            "ROOT", "INGESTED", "SKIPPED", "FAILED", "FINISHED"
        );
        println!("  {}", "-".repeat(76));
        for row in &runs {
            let root: String = row.get("root");
            let finished_at: i64 = row.get("finished_at");
            println!(
                "  {:<32} {:>9} {:>8} {:>7}   {}",
                truncate_left(&root, 32),
                row.get::<i64, _>("ingested"),
                row.get::<i64, _>("skipped"),
                row.get::<i64, _>("failed"),
                format_ts_relative(finished_at)
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Keep the tail of long paths, which is the informative part.
fn truncate_left(s: &str, width: usize) -> String {
    let count = s.chars().count();
    if count <= width {
        return s.to_string();
    }
    let tail: String = s.chars().skip(count - (width - 3)).collect();
    format!("...{}", tail)
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
