use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use insights_model::{
    CatalogIndexScan, CatalogLeafScan, CatalogPageScan, CatalogScanState,
};
use tracing::{debug, info, warn};

use super::table::{
    TableEntity, TableOperation, TableQuery, TableStore, Versioned, decode,
};
use crate::config::TableConfig;
use crate::error::{InsightsError, Result};

/// Typed access to the index, page and leaf scan tables.
///
/// Index scans live in one shared table partitioned by cursor name. Page and
/// leaf scans live in tables suffixed with the scan's storage suffix so
/// concurrent scan generations never share rows.
#[derive(Clone)]
pub struct CatalogScanStorage {
    store: Arc<dyn TableStore>,
    tables: TableConfig,
}

impl fmt::Debug for CatalogScanStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogScanStorage")
            .field("store", &"TableStore")
            .field("tables", &self.tables)
            .finish()
    }
}

impl CatalogScanStorage {
    pub fn new(store: Arc<dyn TableStore>, tables: TableConfig) -> Self {
        Self { store, tables }
    }

    fn batch_size(&self) -> usize {
        self.tables.max_batch_size.min(self.store.max_batch_size()).max(1)
    }

    pub async fn initialize(&self) -> Result<()> {
        self.store.create_table(&self.tables.index_scan_table).await
    }

    pub async fn initialize_child_tables(&self, storage_suffix: &str) -> Result<()> {
        self.store
            .create_table(&self.tables.page_scan_table(storage_suffix))
            .await?;
        self.store
            .create_table(&self.tables.leaf_scan_table(storage_suffix))
            .await
    }

    pub async fn delete_child_tables(&self, storage_suffix: &str) -> Result<()> {
        self.store
            .delete_table(&self.tables.page_scan_table(storage_suffix))
            .await?;
        self.store
            .delete_table(&self.tables.leaf_scan_table(storage_suffix))
            .await?;
        debug!(
            target: "catalog_scan::storage",
            storage_suffix,
            "deleted child scan tables"
        );
        Ok(())
    }

    // Index scans

    pub async fn insert_index_scan(
        &self,
        scan: CatalogIndexScan,
    ) -> Result<Versioned<CatalogIndexScan>> {
        let entity =
            TableEntity::from_record(&scan.cursor_name, &scan.scan_id, &scan)?;
        let etag = self
            .store
            .insert(&self.tables.index_scan_table, entity)
            .await?;
        Ok(Versioned::new(scan, etag))
    }

    pub async fn get_index_scan(
        &self,
        cursor_name: &str,
        scan_id: &str,
    ) -> Result<Option<Versioned<CatalogIndexScan>>> {
        self.store
            .get(&self.tables.index_scan_table, cursor_name, scan_id)
            .await?
            .map(decode)
            .transpose()
    }

    /// Looks a scan up by id alone, across every cursor partition.
    pub async fn find_index_scan(
        &self,
        scan_id: &str,
    ) -> Result<Option<Versioned<CatalogIndexScan>>> {
        let rows = self
            .store
            .query(
                &self.tables.index_scan_table,
                &TableQuery::all().row(scan_id).take(1),
            )
            .await?;
        rows.into_iter().next().map(decode).transpose()
    }

    /// Newest scans first, since scan ids sort in descending time order.
    pub async fn get_latest_index_scans(
        &self,
        cursor_name: &str,
        max_entities: usize,
    ) -> Result<Vec<Versioned<CatalogIndexScan>>> {
        self.store
            .query(
                &self.tables.index_scan_table,
                &TableQuery::partition(cursor_name).take(max_entities),
            )
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    pub async fn replace_index_scan(
        &self,
        scan: &Versioned<CatalogIndexScan>,
    ) -> Result<Versioned<CatalogIndexScan>> {
        let entity = TableEntity::from_record(
            &scan.value.cursor_name,
            &scan.value.scan_id,
            &scan.value,
        )?;
        let etag = self
            .store
            .replace(&self.tables.index_scan_table, entity, &scan.etag)
            .await?;
        Ok(Versioned::new(scan.value.clone(), etag))
    }

    /// Deletes completed scans beyond the newest `keep` for a cursor. The
    /// current scan is never deleted. Returns the deleted scans so their
    /// child tables can be dropped.
    pub async fn delete_old_index_scans(
        &self,
        cursor_name: &str,
        current_scan_id: &str,
        keep: usize,
    ) -> Result<Vec<CatalogIndexScan>> {
        let scans = self
            .store
            .query(
                &self.tables.index_scan_table,
                &TableQuery::partition(cursor_name),
            )
            .await?
            .into_iter()
            .map(decode::<CatalogIndexScan>)
            .collect::<Result<Vec<_>>>()?;

        let old: Vec<_> = scans
            .into_iter()
            .skip(keep)
            .filter(|scan| {
                scan.value.state == CatalogScanState::Complete
                    && scan.value.scan_id != current_scan_id
            })
            .collect();

        for chunk in old.chunks(self.batch_size()) {
            let operations = chunk
                .iter()
                .map(|scan| TableOperation::Delete {
                    partition_key: scan.value.cursor_name.clone(),
                    row_key: scan.value.scan_id.clone(),
                    etag: Some(scan.etag.clone()),
                })
                .collect();
            self.store
                .submit_batch(&self.tables.index_scan_table, operations)
                .await?;
        }

        if !old.is_empty() {
            info!(
                target: "catalog_scan::storage",
                cursor = cursor_name,
                deleted = old.len(),
                "pruned old index scans"
            );
        }
        Ok(old.into_iter().map(|scan| scan.value).collect())
    }

    // Page scans

    pub async fn get_page_scans(
        &self,
        storage_suffix: &str,
        scan_id: &str,
    ) -> Result<Vec<Versioned<CatalogPageScan>>> {
        self.store
            .query(
                &self.tables.page_scan_table(storage_suffix),
                &TableQuery::partition(scan_id),
            )
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    pub async fn get_page_scan(
        &self,
        storage_suffix: &str,
        scan_id: &str,
        page_id: &str,
    ) -> Result<Option<Versioned<CatalogPageScan>>> {
        self.store
            .get(&self.tables.page_scan_table(storage_suffix), scan_id, page_id)
            .await?
            .map(decode)
            .transpose()
    }

    pub async fn insert_page_scans(
        &self,
        storage_suffix: &str,
        scans: &[CatalogPageScan],
    ) -> Result<()> {
        let table = self.tables.page_scan_table(storage_suffix);
        let mut by_partition: BTreeMap<&str, Vec<TableOperation>> = BTreeMap::new();
        for scan in scans {
            by_partition.entry(scan.scan_id.as_str()).or_default().push(
                TableOperation::Insert(TableEntity::from_record(
                    &scan.scan_id,
                    &scan.page_id,
                    scan,
                )?),
            );
        }
        self.submit_chunked(&table, by_partition.into_values()).await
    }

    pub async fn replace_page_scan(
        &self,
        scan: &Versioned<CatalogPageScan>,
    ) -> Result<Versioned<CatalogPageScan>> {
        let entity = TableEntity::from_record(
            &scan.value.scan_id,
            &scan.value.page_id,
            &scan.value,
        )?;
        let etag = self
            .store
            .replace(
                &self.tables.page_scan_table(&scan.value.storage_suffix),
                entity,
                &scan.etag,
            )
            .await?;
        Ok(Versioned::new(scan.value.clone(), etag))
    }

    pub async fn delete_page_scan(
        &self,
        scan: &Versioned<CatalogPageScan>,
    ) -> Result<()> {
        let result = self
            .store
            .delete(
                &self.tables.page_scan_table(&scan.value.storage_suffix),
                &scan.value.scan_id,
                &scan.value.page_id,
                Some(&scan.etag),
            )
            .await;
        match result {
            Err(err) if err.is_not_found() => {
                warn!(
                    target: "catalog_scan::storage",
                    scan_id = %scan.value.scan_id,
                    page_id = %scan.value.page_id,
                    "page scan was already deleted"
                );
                Ok(())
            }
            other => other,
        }
    }

    pub async fn get_page_scan_count_lower_bound(
        &self,
        storage_suffix: &str,
        scan_id: &str,
    ) -> Result<usize> {
        self.count_lower_bound(
            &self.tables.page_scan_table(storage_suffix),
            TableQuery::partition(scan_id),
        )
        .await
    }

    // Leaf scans

    pub async fn get_leaf_scans(
        &self,
        storage_suffix: &str,
        scan_id: &str,
        page_id: &str,
    ) -> Result<Vec<Versioned<CatalogLeafScan>>> {
        self.store
            .query(
                &self.tables.leaf_scan_table(storage_suffix),
                &TableQuery::partition(CatalogLeafScan::partition_key(
                    scan_id, page_id,
                )),
            )
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    pub async fn get_leaf_scan(
        &self,
        storage_suffix: &str,
        scan_id: &str,
        page_id: &str,
        leaf_id: &str,
    ) -> Result<Option<Versioned<CatalogLeafScan>>> {
        self.store
            .get(
                &self.tables.leaf_scan_table(storage_suffix),
                &CatalogLeafScan::partition_key(scan_id, page_id),
                leaf_id,
            )
            .await?
            .map(decode)
            .transpose()
    }

    /// Loads the given leaves of one page, skipping ids that no longer exist.
    pub async fn get_leaf_scans_by_id(
        &self,
        storage_suffix: &str,
        scan_id: &str,
        page_id: &str,
        leaf_ids: &[String],
    ) -> Result<Vec<Versioned<CatalogLeafScan>>> {
        let (Some(min), Some(max)) = (leaf_ids.iter().min(), leaf_ids.iter().max())
        else {
            return Ok(Vec::new());
        };
        let wanted: HashSet<&str> = leaf_ids.iter().map(String::as_str).collect();
        let query = TableQuery::partition(CatalogLeafScan::partition_key(
            scan_id, page_id,
        ))
        .rows(min.clone(), max.clone());
        self.store
            .query(&self.tables.leaf_scan_table(storage_suffix), &query)
            .await?
            .into_iter()
            .filter(|row| wanted.contains(row.value.row_key.as_str()))
            .map(decode)
            .collect()
    }

    pub async fn insert_leaf_scans(
        &self,
        storage_suffix: &str,
        scans: &[CatalogLeafScan],
    ) -> Result<()> {
        let table = self.tables.leaf_scan_table(storage_suffix);
        let mut by_partition: BTreeMap<String, Vec<TableOperation>> =
            BTreeMap::new();
        for scan in scans {
            let partition_key =
                CatalogLeafScan::partition_key(&scan.scan_id, &scan.page_id);
            let entity =
                TableEntity::from_record(&partition_key, &scan.leaf_id, scan)?;
            by_partition
                .entry(partition_key)
                .or_default()
                .push(TableOperation::Insert(entity));
        }
        self.submit_chunked(&table, by_partition.into_values()).await
    }

    pub async fn replace_leaf_scan(
        &self,
        scan: &Versioned<CatalogLeafScan>,
    ) -> Result<Versioned<CatalogLeafScan>> {
        let entity = TableEntity::from_record(
            CatalogLeafScan::partition_key(&scan.value.scan_id, &scan.value.page_id),
            &scan.value.leaf_id,
            &scan.value,
        )?;
        let etag = self
            .store
            .replace(
                &self.tables.leaf_scan_table(&scan.value.storage_suffix),
                entity,
                &scan.etag,
            )
            .await?;
        Ok(Versioned::new(scan.value.clone(), etag))
    }

    /// Deletes processed leaves in per-partition batches. A batch that trips
    /// over an already deleted row is retried row by row so the remaining
    /// leaves still go away.
    pub async fn delete_leaf_scans(
        &self,
        scans: &[Versioned<CatalogLeafScan>],
    ) -> Result<()> {
        let mut groups: BTreeMap<(String, String), Vec<&Versioned<CatalogLeafScan>>> =
            BTreeMap::new();
        for scan in scans {
            groups
                .entry((
                    scan.value.storage_suffix.clone(),
                    CatalogLeafScan::partition_key(
                        &scan.value.scan_id,
                        &scan.value.page_id,
                    ),
                ))
                .or_default()
                .push(scan);
        }

        for ((storage_suffix, partition_key), group) in groups {
            let table = self.tables.leaf_scan_table(&storage_suffix);
            for chunk in group.chunks(self.batch_size()) {
                let operations = chunk
                    .iter()
                    .map(|scan| TableOperation::Delete {
                        partition_key: partition_key.clone(),
                        row_key: scan.value.leaf_id.clone(),
                        etag: Some(scan.etag.clone()),
                    })
                    .collect();
                match self.store.submit_batch(&table, operations).await {
                    Ok(_) => {}
                    Err(err) if err.is_not_found() => {
                        self.delete_leaf_scans_one_by_one(&table, chunk).await?;
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(())
    }

    async fn delete_leaf_scans_one_by_one(
        &self,
        table: &str,
        scans: &[&Versioned<CatalogLeafScan>],
    ) -> Result<()> {
        for scan in scans {
            let partition_key =
                CatalogLeafScan::partition_key(&scan.value.scan_id, &scan.value.page_id);
            match self
                .store
                .delete(table, &partition_key, &scan.value.leaf_id, Some(&scan.etag))
                .await
            {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {
                    warn!(
                        target: "catalog_scan::storage",
                        scan_id = %scan.value.scan_id,
                        page_id = %scan.value.page_id,
                        leaf_id = %scan.value.leaf_id,
                        "leaf scan was already deleted"
                    );
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    pub async fn get_leaf_scan_count_lower_bound(
        &self,
        storage_suffix: &str,
        scan_id: &str,
        page_id: &str,
    ) -> Result<usize> {
        self.count_lower_bound(
            &self.tables.leaf_scan_table(storage_suffix),
            TableQuery::partition(CatalogLeafScan::partition_key(scan_id, page_id)),
        )
        .await
    }

    /// A count that is exact up to the probe size and saturates above it.
    /// Only ever used to tell zero from non-zero.
    async fn count_lower_bound(&self, table: &str, query: TableQuery) -> Result<usize> {
        let probe = self.tables.count_lower_bound_probe.max(1);
        let rows = self.store.query(table, &query.take(probe)).await?;
        Ok(rows.len())
    }

    async fn submit_chunked(
        &self,
        table: &str,
        partitions: impl IntoIterator<Item = Vec<TableOperation>>,
    ) -> Result<()> {
        let size = self.batch_size();
        for operations in partitions {
            let mut operations = operations.into_iter().peekable();
            while operations.peek().is_some() {
                let chunk: Vec<_> = operations.by_ref().take(size).collect();
                self.store.submit_batch(table, chunk).await?;
            }
        }
        Ok(())
    }
}

/// Rejects page or leaf sets that would leave rows the recomputed expansion
/// does not account for.
pub(crate) fn missing_by_url<'a, T>(
    expected: &'a [T],
    existing: impl IntoIterator<Item = &'a str>,
    url: impl Fn(&T) -> &str,
    what: &str,
) -> Result<Vec<&'a T>> {
    let expected_urls: HashSet<&str> = expected.iter().map(&url).collect();
    let existing_urls: HashSet<&str> = existing.into_iter().collect();
    if let Some(extra) = existing_urls.difference(&expected_urls).next() {
        return Err(InsightsError::Invariant(format!(
            "unexpected {what} scan for {extra}"
        )));
    }
    Ok(expected
        .iter()
        .filter(|item| !existing_urls.contains(url(*item)))
        .collect())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use insights_model::{CatalogLeafType, CatalogScanDriverType, ScanId};

    use super::*;
    use crate::storage::MemoryTableStore;

    fn storage(store: &Arc<MemoryTableStore>) -> CatalogScanStorage {
        CatalogScanStorage::new(store.clone(), TableConfig::default())
    }

    fn leaf(scan_id: &str, leaf_id: &str) -> CatalogLeafScan {
        let ts = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 1).unwrap();
        CatalogLeafScan {
            storage_suffix: "s".into(),
            scan_id: scan_id.into(),
            page_id: "0".into(),
            leaf_id: leaf_id.into(),
            url: format!("https://example/{leaf_id}.json"),
            page_url: "https://example/page0.json".into(),
            leaf_type: CatalogLeafType::PackageDetails,
            package_id: "A".into(),
            package_version: "1.0.0".into(),
            commit_timestamp: ts,
            driver_type: CatalogScanDriverType::CatalogLeafItemToCsv,
            driver_parameters: None,
            min: ts,
            max: ts,
            attempt_count: 0,
        }
    }

    #[tokio::test]
    async fn leaf_inserts_are_chunked_by_batch_limit() -> Result<()> {
        let store = Arc::new(MemoryTableStore::new(100));
        let storage = storage(&store);
        storage.initialize_child_tables("s").await?;

        let width = insights_model::padded_width(250);
        let leaves: Vec<_> = (0..250)
            .map(|i| leaf("scan", &insights_model::padded_id(i, width)))
            .collect();
        storage.insert_leaf_scans("s", &leaves).await?;

        assert_eq!(store.batch_sizes().await, vec![100, 100, 50]);
        assert_eq!(
            storage.get_leaf_scan_count_lower_bound("s", "scan", "0").await?,
            TableConfig::default().count_lower_bound_probe
        );
        Ok(())
    }

    #[tokio::test]
    async fn deleting_already_deleted_leaves_is_tolerated() -> Result<()> {
        let store = Arc::new(MemoryTableStore::default());
        let storage = storage(&store);
        storage.initialize_child_tables("s").await?;
        storage
            .insert_leaf_scans("s", &[leaf("scan", "0"), leaf("scan", "1")])
            .await?;

        let leaves = storage.get_leaf_scans("s", "scan", "0").await?;
        storage.delete_leaf_scans(&leaves[..1]).await?;
        storage.delete_leaf_scans(&leaves).await?;

        assert_eq!(
            storage.get_leaf_scan_count_lower_bound("s", "scan", "0").await?,
            0
        );
        Ok(())
    }

    #[tokio::test]
    async fn lookup_by_id_skips_missing_rows() -> Result<()> {
        let store = Arc::new(MemoryTableStore::default());
        let storage = storage(&store);
        storage.initialize_child_tables("s").await?;
        storage
            .insert_leaf_scans("s", &[leaf("scan", "0"), leaf("scan", "2")])
            .await?;

        let found = storage
            .get_leaf_scans_by_id(
                "s",
                "scan",
                "0",
                &["0".to_string(), "1".to_string(), "2".to_string()],
            )
            .await?;
        let ids: Vec<_> = found.iter().map(|l| l.value.leaf_id.as_str()).collect();
        assert_eq!(ids, vec!["0", "2"]);
        Ok(())
    }

    #[tokio::test]
    async fn old_index_scans_are_pruned_keeping_newest() -> Result<()> {
        let store = Arc::new(MemoryTableStore::default());
        let storage = storage(&store);
        storage.initialize().await?;

        let driver = CatalogScanDriverType::CatalogLeafItemToCsv;
        let mut ids = Vec::new();
        for offset in 0..5 {
            let at = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, offset).unwrap();
            let id = ScanId::descending_at(at);
            let mut scan = CatalogIndexScan::new(&id, driver, None, None, None);
            scan.state = if offset == 0 {
                CatalogScanState::Waiting
            } else {
                CatalogScanState::Complete
            };
            storage.insert_index_scan(scan).await?;
            ids.push(id.to_string());
        }

        // Newest first: ids[4], ids[3] are kept; ids[0] is not complete.
        let deleted = storage
            .delete_old_index_scans(&driver.cursor_name(), &ids[4], 2)
            .await?;
        let mut deleted_ids: Vec<_> =
            deleted.iter().map(|scan| scan.scan_id.clone()).collect();
        deleted_ids.sort();
        let mut expected = vec![ids[1].clone(), ids[2].clone()];
        expected.sort();
        assert_eq!(deleted_ids, expected);

        let remaining = storage
            .get_latest_index_scans(&driver.cursor_name(), 10)
            .await?;
        assert_eq!(remaining.len(), 3);
        assert_eq!(remaining[0].value.scan_id, ids[4]);
        assert!(storage.find_index_scan(&ids[0]).await?.is_some());
        Ok(())
    }

    #[test]
    fn extra_existing_rows_are_an_invariant_error() {
        let expected = vec!["a".to_string(), "b".to_string()];
        let missing =
            missing_by_url(&expected, ["a"], |s: &String| s.as_str(), "page").unwrap();
        assert_eq!(missing, vec![&"b".to_string()]);

        let err = missing_by_url(&expected, ["c"], |s: &String| s.as_str(), "page")
            .unwrap_err();
        assert!(matches!(err, InsightsError::Invariant(_)));
    }
}
