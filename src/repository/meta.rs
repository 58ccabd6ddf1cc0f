//! Measurement writes onto existing neuron and contact rows.
//!
//! Measurements have no rows of their own, so this is not a [`super::Repository`]:
//! a write either updates its parent row or reports that the parent is absent.

use sqlx::SqlitePool;

use super::StoreError;
use crate::models::{MeasurementSubject, MetaMeasurement};

pub struct MetaRepository {
    pool: SqlitePool,
}

impl MetaRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Set the measurement on its parent row. Returns false when no parent
    /// row with that uid and timepoint exists.
    pub async fn apply(&self, measurement: &MetaMeasurement) -> Result<bool, StoreError> {
        let table = match measurement.subject {
            MeasurementSubject::Neuron => "neurons",
            MeasurementSubject::Contact => "contacts",
        };
        let sql = format!(
            "UPDATE {} SET {} = ? WHERE uid = ? AND timepoint = ?",
            table,
            measurement.kind.column()
        );
        let result = sqlx::query(&sql)
            .bind(measurement.value)
            .bind(&measurement.uid)
            .bind(measurement.timepoint)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Clear every stored measurement.
    pub async fn truncate(&self) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let neurons = sqlx::query(
            "UPDATE neurons SET surface_area = NULL, volume = NULL WHERE surface_area IS NOT NULL OR volume IS NOT NULL",
        )
        .execute(&mut *tx)
        .await?;
        let contacts = sqlx::query(
            "UPDATE contacts SET surface_area = NULL WHERE surface_area IS NOT NULL",
        )
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(neurons.rows_affected() + contacts.rows_affected())
    }
}
