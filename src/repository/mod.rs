//! Per-entity store access with shared upsert semantics.
//!
//! Every entity repository implements [`Repository`]: an existence check, a
//! strict insert that fails on an existing key, a delete, and a truncate.
//! [`Repository::ingest`] layers the skip-existing / force rules on top:
//!
//! | existing row | skip_existing | force | result                 |
//! |--------------|---------------|-------|------------------------|
//! | no           | any           | any   | insert                 |
//! | yes          | true          | any   | [`Applied::Skipped`]   |
//! | yes          | false         | true  | [`Repository::replace`] |
//! | yes          | false         | false | [`StoreError::Conflict`] |
//!
//! Inserts and replaces run in one transaction each, so composite records
//! (a synapse and its post-neuron edges, a cphate and its node tree) are
//! never left half-written. Rows that other rows point at (neurons, and
//! contacts carrying measurements) override `replace` to update in place and
//! keep their id.

pub mod cache;
pub mod contact;
pub mod cphate;
pub mod dev_stage;
pub mod landmark;
pub mod meta;
pub mod neuron;
pub mod promoter;
pub mod synapse;

use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

pub use cache::LookupCache;
pub use contact::ContactRepository;
pub use cphate::CphateRepository;
pub use dev_stage::DevStageRepository;
pub use landmark::LandmarkRepository;
pub use meta::MetaRepository;
pub use neuron::NeuronRepository;
pub use promoter::PromoterRepository;
pub use synapse::SynapseRepository;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record already exists: {0}")]
    Conflict(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    fn from_insert(err: sqlx::Error, key: &dyn fmt::Display) -> Self {
        let unique = err
            .as_database_error()
            .map(|e| e.is_unique_violation())
            .unwrap_or(false);
        if unique {
            StoreError::Conflict(key.to_string())
        } else {
            StoreError::Database(err)
        }
    }
}

/// How [`Repository::ingest`] treats a record whose key already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestMode {
    pub skip_existing: bool,
    pub force: bool,
}

/// What an ingest call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted,
    Skipped,
    Replaced,
}

/// Natural key of a row keyed by uid and timepoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimedKey {
    pub uid: String,
    pub timepoint: i64,
}

impl TimedKey {
    pub fn new(uid: impl Into<String>, timepoint: i64) -> Self {
        Self {
            uid: uid.into(),
            timepoint,
        }
    }
}

impl fmt::Display for TimedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.uid, self.timepoint)
    }
}

/// Time-sortable external id: `<prefix>_<uuid v7>`.
pub fn ext_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::now_v7())
}

#[async_trait]
pub trait Repository: Send + Sync {
    type Record: Send + Sync;
    type Key: Send + Sync + fmt::Display;

    fn pool(&self) -> &SqlitePool;

    fn key(record: &Self::Record) -> Self::Key;

    async fn exists(&self, key: &Self::Key) -> Result<bool, StoreError>;

    /// Insert the record on an open connection, returning its row id.
    async fn insert_with(
        &self,
        conn: &mut SqliteConnection,
        record: &Self::Record,
    ) -> Result<i64, StoreError>;

    /// Delete the row (and its children) on an open connection.
    async fn delete_with(
        &self,
        conn: &mut SqliteConnection,
        key: &Self::Key,
    ) -> Result<u64, StoreError>;

    /// Remove every row of this entity type and its child tables.
    async fn truncate(&self) -> Result<u64, StoreError>;

    /// Insert; fails with [`StoreError::Conflict`] if the key exists.
    async fn create(&self, record: &Self::Record) -> Result<i64, StoreError> {
        let mut tx = self.pool().begin().await?;
        let id = self.insert_with(&mut *tx, record).await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn delete(&self, key: &Self::Key) -> Result<u64, StoreError> {
        let mut tx = self.pool().begin().await?;
        let removed = self.delete_with(&mut *tx, key).await?;
        tx.commit().await?;
        Ok(removed)
    }

    /// Delete then insert in a single transaction. The row gets a new id.
    async fn replace(&self, record: &Self::Record) -> Result<i64, StoreError> {
        let key = Self::key(record);
        let mut tx = self.pool().begin().await?;
        self.delete_with(&mut *tx, &key).await?;
        let id = self.insert_with(&mut *tx, record).await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn ingest(&self, record: &Self::Record, mode: IngestMode) -> Result<Applied, StoreError> {
        let key = Self::key(record);
        if mode.skip_existing || mode.force {
            if self.exists(&key).await? {
                if mode.skip_existing {
                    return Ok(Applied::Skipped);
                }
                self.replace(record).await?;
                return Ok(Applied::Replaced);
            }
        }
        self.create(record).await?;
        Ok(Applied::Inserted)
    }
}
