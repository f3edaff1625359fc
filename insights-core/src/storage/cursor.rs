use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use insights_model::{Cursor, catalog_min};
use tracing::debug;

use super::table::{TableEntity, TableStore, Versioned, decode};
use crate::error::Result;

/// Named cursors stored one row per cursor. Writes are conditional on the
/// token returned by the last read so two workers can never both advance a
/// cursor from the same starting point.
#[derive(Clone)]
pub struct CursorStorage {
    store: Arc<dyn TableStore>,
    table: String,
}

impl fmt::Debug for CursorStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CursorStorage")
            .field("store", &"TableStore")
            .field("table", &self.table)
            .finish()
    }
}

const ROW_KEY: &str = "";

impl CursorStorage {
    pub fn new(store: Arc<dyn TableStore>, table: impl Into<String>) -> Self {
        Self {
            store,
            table: table.into(),
        }
    }

    pub async fn initialize(&self) -> Result<()> {
        self.store.create_table(&self.table).await
    }

    pub async fn get(&self, name: &str) -> Result<Option<Versioned<Cursor>>> {
        self.store
            .get(&self.table, name, ROW_KEY)
            .await?
            .map(decode)
            .transpose()
    }

    /// Reads a cursor, creating it at the catalog epoch when missing.
    pub async fn get_or_create(&self, name: &str) -> Result<Versioned<Cursor>> {
        if let Some(existing) = self.get(name).await? {
            return Ok(existing);
        }

        let cursor = Cursor {
            name: name.to_string(),
            value: catalog_min(),
        };
        let entity = TableEntity::from_record(name, ROW_KEY, &cursor)?;
        match self.store.insert(&self.table, entity).await {
            Ok(etag) => {
                debug!(target: "catalog_scan::storage", cursor = name, "created cursor");
                Ok(Versioned::new(cursor, etag))
            }
            // Another worker created it first.
            Err(err) if err.is_conflict() => match self.get(name).await? {
                Some(existing) => Ok(existing),
                None => Err(err),
            },
            Err(err) => Err(err),
        }
    }

    /// Conditional write. A stale token fails with a conflict.
    pub async fn update(
        &self,
        cursor: &Versioned<Cursor>,
    ) -> Result<Versioned<Cursor>> {
        let entity =
            TableEntity::from_record(&cursor.value.name, ROW_KEY, &cursor.value)?;
        let etag = self.store.replace(&self.table, entity, &cursor.etag).await?;
        Ok(Versioned::new(cursor.value.clone(), etag))
    }

    /// Moves the cursor forward to `value`. Never moves it backwards.
    /// Returns whether the stored value changed.
    pub async fn advance(&self, name: &str, value: DateTime<Utc>) -> Result<bool> {
        let mut cursor = self.get_or_create(name).await?;
        if cursor.value.value >= value {
            return Ok(false);
        }
        cursor.value.value = value;
        self.update(&cursor).await?;
        Ok(true)
    }
}
