use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};

use super::{ext_id, Repository, StoreError};
use crate::models::{Cphate, Timepoint};

/// A cphate is keyed by timepoint alone; its node tree is written with it.
pub struct CphateRepository {
    pool: SqlitePool,
}

impl CphateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn node_count(&self, timepoint: Timepoint) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM cphate_nodes n
            JOIN cphates c ON c.id = n.cphate_id
            WHERE c.timepoint = ?
            "#,
        )
        .bind(timepoint)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[async_trait]
impl Repository for CphateRepository {
    type Record = Cphate;
    type Key = Timepoint;

    fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn key(record: &Cphate) -> Timepoint {
        record.timepoint
    }

    async fn exists(&self, key: &Timepoint) -> Result<bool, StoreError> {
        let found: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM cphates WHERE timepoint = ?")
            .bind(key)
            .fetch_one(&self.pool)
            .await?;
        Ok(found)
    }

    async fn insert_with(
        &self,
        conn: &mut SqliteConnection,
        record: &Cphate,
    ) -> Result<i64, StoreError> {
        let result =
            sqlx::query("INSERT INTO cphates (ext_id, uid, timepoint, dev_stage) VALUES (?, ?, ?, ?)")
                .bind(ext_id("cph"))
                .bind(&record.uid)
                .bind(record.timepoint)
                .bind(record.dev_stage.map(|s| s.as_str()))
                .execute(&mut *conn)
                .await
                .map_err(|e| StoreError::from_insert(e, &record.uid))?;
        let cphate_id = result.last_insert_rowid();

        for node in &record.nodes {
            let node_result = sqlx::query(
                r#"
                INSERT INTO cphate_nodes (cphate_id, uid, filename, color, cluster, cluster_count,
                                          iteration, iteration_count, serial)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(cphate_id)
            .bind(&node.uid)
            .bind(&node.filename)
            .bind(node.color.to_json())
            .bind(node.cluster as i64)
            .bind(node.cluster_count as i64)
            .bind(node.iteration as i64)
            .bind(node.iteration_count as i64)
            .bind(node.serial as i64)
            .execute(&mut *conn)
            .await
            .map_err(|e| StoreError::from_insert(e, &format!("{} node {}", record.uid, node.uid)))?;
            let node_id = node_result.last_insert_rowid();

            for (position, neuron_id) in node.neuron_ids.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO cphate_node_neurons (node_id, position, neuron_id) VALUES (?, ?, ?)",
                )
                .bind(node_id)
                .bind(position as i64)
                .bind(neuron_id)
                .execute(&mut *conn)
                .await?;
            }
        }

        Ok(cphate_id)
    }

    async fn delete_with(
        &self,
        conn: &mut SqliteConnection,
        key: &Timepoint,
    ) -> Result<u64, StoreError> {
        // Nodes and their neuron edges cascade.
        let result = sqlx::query("DELETE FROM cphates WHERE timepoint = ?")
            .bind(key)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    async fn truncate(&self) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM cphate_node_neurons")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM cphate_nodes").execute(&mut *tx).await?;
        let result = sqlx::query("DELETE FROM cphates").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }
}
