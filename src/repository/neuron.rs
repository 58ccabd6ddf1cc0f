use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;

use super::{ext_id, LookupCache, Repository, StoreError, TimedKey};
use crate::models::{Neuron, Timepoint};

pub struct NeuronRepository {
    pool: SqlitePool,
    cache: Arc<LookupCache>,
}

impl NeuronRepository {
    pub fn new(pool: SqlitePool, cache: Arc<LookupCache>) -> Self {
        Self { pool, cache }
    }

    /// Store id of the neuron with this uid at this timepoint.
    pub async fn resolve_id(
        &self,
        uid: &str,
        timepoint: Timepoint,
    ) -> Result<Option<i64>, StoreError> {
        let key = TimedKey::new(uid, timepoint);
        if let Some(id) = self.cache.get(&key) {
            return Ok(Some(id));
        }

        let id: Option<i64> =
            sqlx::query_scalar("SELECT id FROM neurons WHERE uid = ? AND timepoint = ?")
                .bind(uid)
                .bind(timepoint)
                .fetch_optional(&self.pool)
                .await?;

        if let Some(id) = id {
            self.cache.insert(key, id);
        }
        Ok(id)
    }
}

#[async_trait]
impl Repository for NeuronRepository {
    type Record = Neuron;
    type Key = TimedKey;

    fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn key(record: &Neuron) -> TimedKey {
        TimedKey::new(&record.uid, record.timepoint)
    }

    async fn exists(&self, key: &TimedKey) -> Result<bool, StoreError> {
        let found: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM neurons WHERE uid = ? AND timepoint = ?",
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
        record: &Neuron,
    ) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO neurons (ext_id, uid, timepoint, filename, file_hash, dev_stage, color)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(ext_id("nrn"))
        .bind(&record.uid)
        .bind(record.timepoint)
        .bind(&record.filename)
        .bind(&record.file_hash)
        .bind(record.dev_stage.as_str())
        .bind(record.color.to_json())
        .execute(&mut *conn)
        .await
        .map_err(|e| StoreError::from_insert(e, &Self::key(record)))?;

        Ok(result.last_insert_rowid())
    }

    async fn delete_with(
        &self,
        conn: &mut SqliteConnection,
        key: &TimedKey,
    ) -> Result<u64, StoreError> {
        self.cache.invalidate(key);
        let result = sqlx::query("DELETE FROM neurons WHERE uid = ? AND timepoint = ?")
            .bind(&key.uid)
            .bind(key.timepoint)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// Rewrite the file-derived columns in place. The row id, external id
    /// and measurements stay, so dependent rows keep resolving to it.
    async fn replace(&self, record: &Neuron) -> Result<i64, StoreError> {
        let id: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE neurons SET filename = ?, file_hash = ?, dev_stage = ?, color = ?
            WHERE uid = ? AND timepoint = ?
            RETURNING id
            "#,
        )
        .bind(&record.filename)
        .bind(&record.file_hash)
        .bind(record.dev_stage.as_str())
        .bind(record.color.to_json())
        .bind(&record.uid)
        .bind(record.timepoint)
        .fetch_optional(&self.pool)
        .await?;

        match id {
            Some(id) => Ok(id),
            None => self.create(record).await,
        }
    }

    async fn truncate(&self) -> Result<u64, StoreError> {
        self.cache.clear();
        let result = sqlx::query("DELETE FROM neurons").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
