use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};

use super::{ext_id, Repository, StoreError};
use crate::models::DevelopmentalStage;

pub struct DevStageRepository {
    pool: SqlitePool,
}

impl DevStageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for DevStageRepository {
    type Record = DevelopmentalStage;
    type Key = String;

    fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn key(record: &DevelopmentalStage) -> String {
        record.uid.clone()
    }

    async fn exists(&self, key: &String) -> Result<bool, StoreError> {
        let found: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM developmental_stages WHERE uid = ?")
                .bind(key)
                .fetch_one(&self.pool)
                .await?;
        Ok(found)
    }

    async fn insert_with(
        &self,
        conn: &mut SqliteConnection,
        record: &DevelopmentalStage,
    ) -> Result<i64, StoreError> {
        let timepoints =
            serde_json::to_string(&record.timepoints).unwrap_or_else(|_| "[]".to_string());

        let result = sqlx::query(
            r#"
            INSERT INTO developmental_stages (ext_id, uid, begin_tp, end_tp, stage_order,
                                              promoter_db, timepoints)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(ext_id("devstg"))
        .bind(&record.uid)
        .bind(record.begin)
        .bind(record.end)
        .bind(record.order)
        .bind(record.promoter_db)
        .bind(timepoints)
        .execute(&mut *conn)
        .await
        .map_err(|e| StoreError::from_insert(e, &record.uid))?;

        Ok(result.last_insert_rowid())
    }

    async fn delete_with(
        &self,
        conn: &mut SqliteConnection,
        key: &String,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM developmental_stages WHERE uid = ?")
            .bind(key)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    async fn truncate(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM developmental_stages")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
