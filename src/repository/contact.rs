use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};

use super::{ext_id, Repository, StoreError, TimedKey};
use crate::models::Contact;

pub struct ContactRepository {
    pool: SqlitePool,
}

impl ContactRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for ContactRepository {
    type Record = Contact;
    type Key = TimedKey;

    fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn key(record: &Contact) -> TimedKey {
        TimedKey::new(&record.uid, record.timepoint)
    }

    async fn exists(&self, key: &TimedKey) -> Result<bool, StoreError> {
        let found: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM contacts WHERE uid = ? AND timepoint = ?",
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
        record: &Contact,
    ) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO contacts (ext_id, uid, timepoint, filename, file_hash, dev_stage, color,
                                  neuron_before_id, neuron_after_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(ext_id("cntct"))
        .bind(&record.uid)
        .bind(record.timepoint)
        .bind(&record.filename)
        .bind(&record.file_hash)
        .bind(record.dev_stage.as_str())
        .bind(record.color.to_json())
        .bind(record.neuron_before_id)
        .bind(record.neuron_after_id)
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
        let result = sqlx::query("DELETE FROM contacts WHERE uid = ? AND timepoint = ?")
            .bind(&key.uid)
            .bind(key.timepoint)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    /// Rewrite in place so the row id and a measured surface area survive.
    async fn replace(&self, record: &Contact) -> Result<i64, StoreError> {
        let id: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE contacts
            SET filename = ?, file_hash = ?, dev_stage = ?, color = ?,
                neuron_before_id = ?, neuron_after_id = ?
            WHERE uid = ? AND timepoint = ?
            RETURNING id
            "#,
        )
        .bind(&record.filename)
        .bind(&record.file_hash)
        .bind(record.dev_stage.as_str())
        .bind(record.color.to_json())
        .bind(record.neuron_before_id)
        .bind(record.neuron_after_id)
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
        let result = sqlx::query("DELETE FROM contacts").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
