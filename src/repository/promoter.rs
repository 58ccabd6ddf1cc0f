use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};

use super::{ext_id, Repository, StoreError};
use crate::models::Promoter;

pub struct PromoterRepository {
    pool: SqlitePool,
}

impl PromoterRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PromoterRepository {
    type Record = Promoter;
    type Key = String;

    fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn key(record: &Promoter) -> String {
        record.uid.clone()
    }

    async fn exists(&self, key: &String) -> Result<bool, StoreError> {
        let found: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM promoters WHERE uid = ?")
            .bind(key)
            .fetch_one(&self.pool)
            .await?;
        Ok(found)
    }

    async fn insert_with(
        &self,
        conn: &mut SqliteConnection,
        record: &Promoter,
    ) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO promoters (ext_id, uid, wormbase, cellular_expression_pattern,
                                   timepoint_start, timepoint_end, cells_by_lineaging,
                                   expression_patterns, information, other_cells)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(ext_id("prmtr"))
        .bind(&record.uid)
        .bind(&record.wormbase)
        .bind(&record.cellular_expression_pattern)
        .bind(record.timepoint_start)
        .bind(record.timepoint_end)
        .bind(&record.cells_by_lineaging)
        .bind(&record.expression_patterns)
        .bind(&record.information)
        .bind(&record.other_cells)
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
        let result = sqlx::query("DELETE FROM promoters WHERE uid = ?")
            .bind(key)
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }

    async fn truncate(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM promoters").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
