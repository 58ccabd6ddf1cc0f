//! Nerve rings and scale bars share one row shape; the kind picks the table.

use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};

use super::{Repository, StoreError, TimedKey};
use crate::models::{Landmark, LandmarkKind};

pub struct LandmarkRepository {
    pool: SqlitePool,
    kind: LandmarkKind,
}

impl LandmarkRepository {
    pub fn new(pool: SqlitePool, kind: LandmarkKind) -> Self {
        Self { pool, kind }
    }

    pub fn kind(&self) -> LandmarkKind {
        self.kind
    }
}

#[async_trait]
impl Repository for LandmarkRepository {
    type Record = Landmark;
    type Key = TimedKey;

    fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn key(record: &Landmark) -> TimedKey {
        TimedKey::new(&record.uid, record.timepoint)
    }

    async fn exists(&self, key: &TimedKey) -> Result<bool, StoreError> {
        let sql = format!(
            "SELECT COUNT(*) > 0 FROM {} WHERE uid = ? AND timepoint = ?",
            self.kind.table()
        );
        let found: bool = sqlx::query_scalar(&sql)
            .bind(&key.uid)
            .bind(key.timepoint)
            .fetch_one(&self.pool)
            .await?;
        Ok(found)
    }

    async fn insert_with(
        &self,
        conn: &mut SqliteConnection,
        record: &Landmark,
    ) -> Result<i64, StoreError> {
        let sql = format!(
            "INSERT INTO {} (uid, timepoint, filename, file_hash, dev_stage, color) VALUES (?, ?, ?, ?, ?, ?)",
            self.kind.table()
        );
        let result = sqlx::query(&sql)
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
        let sql = format!(
            "DELETE FROM {} WHERE uid = ? AND timepoint = ?",
            self.kind.table()
        );
        let result = sqlx::query(&sql)
            .bind(&key.uid)
            .bind(key.timepoint)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    async fn truncate(&self) -> Result<u64, StoreError> {
        let sql = format!("DELETE FROM {}", self.kind.table());
        let result = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
