use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::table::{
    ETag, TableEntity, TableOperation, TableQuery, TableStore, Versioned,
    validate_batch,
};
use crate::error::{InsightsError, Result};

#[derive(Clone, Debug)]
struct StoredRow {
    properties: Value,
    etag: ETag,
}

type Table = BTreeMap<(String, String), StoredRow>;

#[derive(Debug, Default)]
struct MemoryTables {
    tables: HashMap<String, Table>,
    batch_sizes: Vec<usize>,
}

/// In-process [`TableStore`] with the same concurrency and batching rules as
/// the durable store.
#[derive(Clone, Debug)]
pub struct MemoryTableStore {
    inner: Arc<Mutex<MemoryTables>>,
    max_batch_size: usize,
}

impl Default for MemoryTableStore {
    fn default() -> Self {
        Self::new(100)
    }
}

impl MemoryTableStore {
    pub fn new(max_batch_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryTables::default())),
            max_batch_size,
        }
    }

    /// Sizes of every batch submitted so far, in order.
    pub async fn batch_sizes(&self) -> Vec<usize> {
        self.inner.lock().await.batch_sizes.clone()
    }

    pub async fn row_count(&self, table: &str) -> usize {
        self.inner
            .lock()
            .await
            .tables
            .get(table)
            .map(BTreeMap::len)
            .unwrap_or_default()
    }
}

fn table_mut<'a>(
    tables: &'a mut HashMap<String, Table>,
    table: &str,
) -> Result<&'a mut Table> {
    tables
        .get_mut(table)
        .ok_or_else(|| InsightsError::NotFound(format!("table {table}")))
}

fn key_of(entity: &TableEntity) -> (String, String) {
    (entity.partition_key.clone(), entity.row_key.clone())
}

fn apply(table: &mut Table, operation: TableOperation) -> Result<Option<ETag>> {
    match operation {
        TableOperation::Insert(entity) => {
            let key = key_of(&entity);
            if table.contains_key(&key) {
                return Err(InsightsError::Conflict(format!(
                    "entity {}/{} already exists",
                    key.0, key.1
                )));
            }
            let etag = ETag::generate();
            table.insert(
                key,
                StoredRow {
                    properties: entity.properties,
                    etag: etag.clone(),
                },
            );
            Ok(Some(etag))
        }
        TableOperation::Replace(entity, expected) => {
            let key = key_of(&entity);
            let row = table.get_mut(&key).ok_or_else(|| {
                InsightsError::NotFound(format!("entity {}/{}", key.0, key.1))
            })?;
            if row.etag != expected {
                return Err(InsightsError::Conflict(format!(
                    "entity {}/{} was modified concurrently",
                    key.0, key.1
                )));
            }
            let etag = ETag::generate();
            row.properties = entity.properties;
            row.etag = etag.clone();
            Ok(Some(etag))
        }
        TableOperation::Upsert(entity) => {
            let etag = ETag::generate();
            table.insert(
                key_of(&entity),
                StoredRow {
                    properties: entity.properties,
                    etag: etag.clone(),
                },
            );
            Ok(Some(etag))
        }
        TableOperation::Delete {
            partition_key,
            row_key,
            etag,
        } => {
            let key = (partition_key, row_key);
            let row = table.get(&key).ok_or_else(|| {
                InsightsError::NotFound(format!("entity {}/{}", key.0, key.1))
            })?;
            if let Some(expected) = etag
                && row.etag != expected
            {
                return Err(InsightsError::Conflict(format!(
                    "entity {}/{} was modified concurrently",
                    key.0, key.1
                )));
            }
            table.remove(&key);
            Ok(None)
        }
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn create_table(&self, table: &str) -> Result<()> {
        let mut guard = self.inner.lock().await;
        guard.tables.entry(table.to_string()).or_default();
        Ok(())
    }

    async fn delete_table(&self, table: &str) -> Result<()> {
        let mut guard = self.inner.lock().await;
        guard.tables.remove(table);
        Ok(())
    }

    async fn get(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> Result<Option<Versioned<TableEntity>>> {
        let mut guard = self.inner.lock().await;
        let rows = table_mut(&mut guard.tables, table)?;
        let key = (partition_key.to_string(), row_key.to_string());
        Ok(rows.get(&key).map(|row| {
            Versioned::new(
                TableEntity {
                    partition_key: key.0.clone(),
                    row_key: key.1.clone(),
                    properties: row.properties.clone(),
                },
                row.etag.clone(),
            )
        }))
    }

    async fn insert(&self, table: &str, entity: TableEntity) -> Result<ETag> {
        let mut guard = self.inner.lock().await;
        let rows = table_mut(&mut guard.tables, table)?;
        apply(rows, TableOperation::Insert(entity))?
            .ok_or_else(|| InsightsError::Internal("insert returned no etag".into()))
    }

    async fn replace(
        &self,
        table: &str,
        entity: TableEntity,
        etag: &ETag,
    ) -> Result<ETag> {
        let mut guard = self.inner.lock().await;
        let rows = table_mut(&mut guard.tables, table)?;
        apply(rows, TableOperation::Replace(entity, etag.clone()))?.ok_or_else(
            || InsightsError::Internal("replace returned no etag".into()),
        )
    }

    async fn upsert(&self, table: &str, entity: TableEntity) -> Result<ETag> {
        let mut guard = self.inner.lock().await;
        let rows = table_mut(&mut guard.tables, table)?;
        apply(rows, TableOperation::Upsert(entity))?
            .ok_or_else(|| InsightsError::Internal("upsert returned no etag".into()))
    }

    async fn delete(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
        etag: Option<&ETag>,
    ) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let rows = table_mut(&mut guard.tables, table)?;
        apply(
            rows,
            TableOperation::Delete {
                partition_key: partition_key.to_string(),
                row_key: row_key.to_string(),
                etag: etag.cloned(),
            },
        )?;
        Ok(())
    }

    async fn submit_batch(
        &self,
        table: &str,
        operations: Vec<TableOperation>,
    ) -> Result<Vec<Option<ETag>>> {
        validate_batch(&operations, self.max_batch_size)?;
        let mut guard = self.inner.lock().await;
        let count = operations.len();
        let rows = table_mut(&mut guard.tables, table)?;

        // Apply against a scratch copy so a failing operation leaves the
        // table untouched.
        let mut scratch = rows.clone();
        let mut etags = Vec::with_capacity(count);
        for operation in operations {
            etags.push(apply(&mut scratch, operation)?);
        }
        *rows = scratch;
        guard.batch_sizes.push(count);
        Ok(etags)
    }

    async fn query(
        &self,
        table: &str,
        query: &TableQuery,
    ) -> Result<Vec<Versioned<TableEntity>>> {
        let mut guard = self.inner.lock().await;
        let rows = table_mut(&mut guard.tables, table)?;
        let take = query.take.unwrap_or(usize::MAX);
        Ok(rows
            .iter()
            .filter(|((pk, rk), _)| query.matches(pk, rk))
            .take(take)
            .map(|((pk, rk), row)| {
                Versioned::new(
                    TableEntity {
                        partition_key: pk.clone(),
                        row_key: rk.clone(),
                        properties: row.properties.clone(),
                    },
                    row.etag.clone(),
                )
            })
            .collect())
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }
}
