use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};

use super::{ext_id, Repository, StoreError, TimedKey};
use crate::models::Synapse;

pub struct SynapseRepository {
    pool: SqlitePool,
}

impl SynapseRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Post-synaptic neuron ids of a synapse, in edge order.
    pub async fn post_neuron_ids(&self, synapse_id: i64) -> Result<Vec<i64>, StoreError> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT neuron_id FROM synapse_post_neurons WHERE synapse_id = ? ORDER BY position",
        )
        .bind(synapse_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}

#[async_trait]
impl Repository for SynapseRepository {
    type Record = Synapse;
    type Key = TimedKey;

    fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn key(record: &Synapse) -> TimedKey {
        TimedKey::new(&record.uid, record.timepoint)
    }

    async fn exists(&self, key: &TimedKey) -> Result<bool, StoreError> {
        let found: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM synapses WHERE uid = ? AND timepoint = ?",
        )
        .bind(&key.uid)
        .bind(key.timepoint)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    async fn insert_with(
        &self,
        conn: &mut SqliteConnection,
        record: &Synapse,
    ) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO synapses (ext_id, uid, timepoint, synapse_type, section, position, site,
                                  filename, file_hash, dev_stage, color, pre_neuron_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(ext_id("syn"))
        .bind(&record.uid)
        .bind(record.timepoint)
        .bind(record.synapse_type.as_str())
        .bind(&record.section)
        .bind(record.position.map(|p| p.as_str()))
        .bind(record.site as i64)
        .bind(&record.filename)
        .bind(&record.file_hash)
        .bind(record.dev_stage.as_str())
        .bind(record.color.to_json())
        .bind(record.pre_neuron_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| StoreError::from_insert(e, &Self::key(record)))?;

        let synapse_id = result.last_insert_rowid();

        for (position, neuron_id) in record.post_neuron_ids.iter().enumerate() {
            sqlx::query(
                "INSERT INTO synapse_post_neurons (synapse_id, position, neuron_id) VALUES (?, ?, ?)",
            )
            .bind(synapse_id)
            .bind(position as i64)
            .bind(neuron_id)
            .execute(&mut *conn)
            .await?;
        }

        Ok(synapse_id)
    }

    async fn delete_with(
        &self,
        conn: &mut SqliteConnection,
        key: &TimedKey,
    ) -> Result<u64, StoreError> {
        // Edges cascade from the synapse row.
        let result = sqlx::query("DELETE FROM synapses WHERE uid = ? AND timepoint = ?")
            .bind(&key.uid)
            .bind(key.timepoint)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    async fn truncate(&self) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM synapse_post_neurons")
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM synapses").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }
}
