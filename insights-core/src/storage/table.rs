use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{InsightsError, Result};

/// Opaque concurrency token returned by every write.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ETag(String);

impl ETag {
    pub fn generate() -> Self {
        Self(Uuid::now_v7().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A value paired with the concurrency token it was read at.
#[derive(Clone, Debug, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub etag: ETag,
}

impl<T> Versioned<T> {
    pub fn new(value: T, etag: ETag) -> Self {
        Self { value, etag }
    }
}

/// Untyped row. Typed layers serialise their records into `properties`.
#[derive(Clone, Debug, PartialEq)]
pub struct TableEntity {
    pub partition_key: String,
    pub row_key: String,
    pub properties: Value,
}

impl TableEntity {
    pub fn from_record<T: Serialize>(
        partition_key: impl Into<String>,
        row_key: impl Into<String>,
        record: &T,
    ) -> Result<Self> {
        Ok(Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            properties: serde_json::to_value(record)?,
        })
    }

    pub fn to_record<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.properties.clone())?)
    }
}

/// Decode a stored row into its typed record, keeping the token.
pub fn decode<T: DeserializeOwned>(
    row: Versioned<TableEntity>,
) -> Result<Versioned<T>> {
    let value = row.value.to_record()?;
    Ok(Versioned::new(value, row.etag))
}

/// One operation inside a transactional batch.
#[derive(Clone, Debug)]
pub enum TableOperation {
    Insert(TableEntity),
    Replace(TableEntity, ETag),
    Upsert(TableEntity),
    Delete {
        partition_key: String,
        row_key: String,
        etag: Option<ETag>,
    },
}

impl TableOperation {
    pub fn partition_key(&self) -> &str {
        match self {
            TableOperation::Insert(entity)
            | TableOperation::Replace(entity, _)
            | TableOperation::Upsert(entity) => &entity.partition_key,
            TableOperation::Delete { partition_key, .. } => partition_key,
        }
    }
}

/// Range query over `(partition_key, row_key)`. All bounds are inclusive and
/// compared ordinally; results come back in key order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableQuery {
    pub partition_min: Option<String>,
    pub partition_max: Option<String>,
    pub row_min: Option<String>,
    pub row_max: Option<String>,
    pub take: Option<usize>,
}

impl TableQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn partition(partition_key: impl Into<String>) -> Self {
        let partition_key = partition_key.into();
        Self {
            partition_min: Some(partition_key.clone()),
            partition_max: Some(partition_key),
            ..Self::default()
        }
    }

    pub fn rows(mut self, min: impl Into<String>, max: impl Into<String>) -> Self {
        self.row_min = Some(min.into());
        self.row_max = Some(max.into());
        self
    }

    pub fn row(self, row_key: impl Into<String>) -> Self {
        let row_key = row_key.into();
        self.rows(row_key.clone(), row_key)
    }

    pub fn take(mut self, take: usize) -> Self {
        self.take = Some(take);
        self
    }

    pub fn matches(&self, partition_key: &str, row_key: &str) -> bool {
        let above = |value: &str, bound: &Option<String>| {
            bound.as_deref().is_none_or(|b| value >= b)
        };
        let below = |value: &str, bound: &Option<String>| {
            bound.as_deref().is_none_or(|b| value <= b)
        };
        above(partition_key, &self.partition_min)
            && below(partition_key, &self.partition_max)
            && above(row_key, &self.row_min)
            && below(row_key, &self.row_max)
    }
}

/// Partitioned key-value tables with optimistic concurrency.
///
/// Missing tables and rows surface as [`InsightsError::NotFound`]; token
/// mismatches and duplicate inserts surface as [`InsightsError::Conflict`].
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Idempotent.
    async fn create_table(&self, table: &str) -> Result<()>;

    /// Idempotent.
    async fn delete_table(&self, table: &str) -> Result<()>;

    async fn get(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<Option<Versioned<TableEntity>>>;

    async fn insert(&self, table: &str, entity: TableEntity) -> Result<ETag>;

    async fn replace(
        &self,
        table: &str,
        entity: TableEntity,
        etag: &ETag,
    ) -> Result<ETag>;

    async fn upsert(&self, table: &str, entity: TableEntity) -> Result<ETag>;

    /// Deletes a row. `None` skips the token check.
    async fn delete(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
        etag: Option<&ETag>,
    ) -> Result<()>;

    /// Applies every operation or none. All operations must share one
    /// partition key and the batch may not exceed [`TableStore::max_batch_size`].
    async fn submit_batch(
        &self,
        table: &str,
        operations: Vec<TableOperation>,
    ) -> Result<Vec<Option<ETag>>>;

    async fn query(
        &self,
        table: &str,
        query: &TableQuery,
    ) -> Result<Vec<Versioned<TableEntity>>>;

    fn max_batch_size(&self) -> usize;
}

/// Rejects batches the storage layer cannot apply atomically.
pub fn validate_batch(
    operations: &[TableOperation],
    max_batch_size: usize,
) -> Result<()> {
    if operations.len() > max_batch_size {
        return Err(InsightsError::Invariant(format!(
            "batch of {} operations exceeds the limit of {max_batch_size}",
            operations.len()
        )));
    }
    if let Some(first) = operations.first() {
        let partition_key = first.partition_key();
        if operations
            .iter()
            .any(|operation| operation.partition_key() != partition_key)
        {
            return Err(InsightsError::Invariant(
                "batch operations must share one partition key".into(),
            ));
        }
    }
    Ok(())
}
