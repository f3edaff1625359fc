use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use insights_model::{
    CatalogIndexScan, CatalogIndexScanResult, CatalogLeaf, CatalogLeafScan,
    CatalogLeafType, CatalogPageScan, CatalogPageScanResult, PackageVersionEntity,
};
use tracing::debug;

use super::load_latest::rank_of;
use super::{
    BatchMessageProcessorResult, CatalogLeafScanBatchDriver, CatalogScanDriver,
};
use crate::catalog::CatalogClient;
use crate::error::Result;
use crate::latest_leaf::{LatestLeafMapper, LatestLeafStorage, LeafCandidate};

/// Stores one row per package version, filled from the leaf document.
pub struct PackageVersionMapper {
    table: String,
    client: Arc<dyn CatalogClient>,
}

impl fmt::Debug for PackageVersionMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageVersionMapper")
            .field("table", &self.table)
            .field("client", &"CatalogClient")
            .finish()
    }
}

impl PackageVersionMapper {
    pub fn new(table: impl Into<String>, client: Arc<dyn CatalogClient>) -> Self {
        Self {
            table: table.into(),
            client,
        }
    }
}

#[async_trait]
impl LatestLeafMapper for PackageVersionMapper {
    type Entity = PackageVersionEntity;

    fn table_name(&self) -> &str {
        &self.table
    }

    fn partition_key(&self, lower_id: &str) -> String {
        lower_id.to_string()
    }

    fn commit_timestamp(&self, entity: &PackageVersionEntity) -> DateTime<Utc> {
        entity.commit_timestamp
    }

    async fn map(
        &self,
        lower_id: &str,
        lower_version: &str,
        candidate: &LeafCandidate,
    ) -> Result<PackageVersionEntity> {
        let item = &candidate.item;
        let mut entity = PackageVersionEntity {
            lower_id: lower_id.to_string(),
            lower_version: lower_version.to_string(),
            package_id: item.package_id.clone(),
            package_version: item.package_version.clone(),
            commit_timestamp: item.commit_timestamp,
            leaf_type: item.leaf_type,
            url: item.url.clone(),
            published: None,
            listed: None,
            package_size: None,
        };
        if item.leaf_type == CatalogLeafType::PackageDelete {
            return Ok(entity);
        }

        match self.client.get_catalog_leaf(item.leaf_type, &item.url).await? {
            Some(CatalogLeaf::PackageDetails(details)) => {
                entity.published = Some(details.published);
                entity.listed = Some(details.is_listed());
                entity.package_size = details.package_size;
            }
            Some(CatalogLeaf::PackageDelete(_)) | None => {
                entity.leaf_type = CatalogLeafType::PackageDelete;
            }
        }
        Ok(entity)
    }
}

/// Natively batch: a whole leaf batch becomes one latest-leaf update, so
/// duplicate versions inside the batch cost a single write.
pub struct LoadPackageVersionDriver {
    storage: LatestLeafStorage,
    mapper: PackageVersionMapper,
}

impl fmt::Debug for LoadPackageVersionDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadPackageVersionDriver")
            .field("storage", &self.storage)
            .field("mapper", &self.mapper)
            .finish()
    }
}

impl LoadPackageVersionDriver {
    pub fn new(storage: LatestLeafStorage, mapper: PackageVersionMapper) -> Self {
        Self { storage, mapper }
    }
}

#[async_trait]
impl CatalogScanDriver for LoadPackageVersionDriver {
    async fn init_index(&self, _scan: &CatalogIndexScan) -> Result<()> {
        self.storage.initialize(&self.mapper).await
    }

    async fn process_index(
        &self,
        _scan: &CatalogIndexScan,
    ) -> Result<CatalogIndexScanResult> {
        Ok(CatalogIndexScanResult::Expand)
    }

    async fn process_page(
        &self,
        _scan: &CatalogPageScan,
    ) -> Result<CatalogPageScanResult> {
        Ok(CatalogPageScanResult::Expand)
    }
}

#[async_trait]
impl CatalogLeafScanBatchDriver for LoadPackageVersionDriver {
    async fn process_leaf_batch(
        &self,
        leaves: &[CatalogLeafScan],
    ) -> Result<BatchMessageProcessorResult> {
        let candidates: Vec<LeafCandidate> = leaves
            .iter()
            .map(|leaf| LeafCandidate {
                item: leaf.to_leaf_item(),
                page_url: leaf.page_url.clone(),
                page_rank: rank_of(&leaf.page_id),
                leaf_rank: rank_of(&leaf.leaf_id),
            })
            .collect();
        let summary = self.storage.add_leaves(&self.mapper, &candidates).await?;
        debug!(
            target: "catalog_scan::leaf",
            leaves = leaves.len(),
            inserted = summary.inserted,
            replaced = summary.replaced,
            skipped = summary.skipped,
            "loaded package versions"
        );
        Ok(BatchMessageProcessorResult::default())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use insights_model::{CatalogScanDriverType, PackageDetailsLeaf};

    use super::*;
    use crate::catalog::MockCatalogClient;
    use crate::storage::{MemoryTableStore, TableStore};

    fn at(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, second).unwrap()
    }

    fn leaf(leaf_id: &str, version: &str, second: u32, leaf_type: CatalogLeafType) -> CatalogLeafScan {
        CatalogLeafScan {
            storage_suffix: "s".into(),
            scan_id: "scan".into(),
            page_id: "0".into(),
            leaf_id: leaf_id.into(),
            url: format!("https://example/{leaf_id}.json"),
            page_url: "https://example/page0.json".into(),
            leaf_type,
            package_id: "Polly".into(),
            package_version: version.into(),
            commit_timestamp: at(second),
            driver_type: CatalogScanDriverType::LoadPackageVersion,
            driver_parameters: None,
            min: at(0),
            max: at(59),
            attempt_count: 0,
        }
    }

    #[tokio::test]
    async fn batch_writes_one_row_per_version() -> Result<()> {
        let mut client = MockCatalogClient::new();
        client.expect_get_catalog_leaf().times(1).returning(|_, url| {
            Ok(Some(CatalogLeaf::PackageDetails(PackageDetailsLeaf {
                url: url.to_string(),
                commit_timestamp: at(20),
                package_id: "Polly".into(),
                package_version: "7.2.0".into(),
                published: at(1),
                listed: Some(false),
                package_size: Some(42),
                package_hash: None,
            })))
        });

        let store = Arc::new(MemoryTableStore::default());
        let storage = LatestLeafStorage::new(store.clone(), 100, 4);
        let mapper = PackageVersionMapper::new("packageversions", Arc::new(client));
        let driver = LoadPackageVersionDriver::new(storage, mapper);
        let index = CatalogIndexScan::new(
            &insights_model::ScanId::new(),
            CatalogScanDriverType::LoadPackageVersion,
            None,
            None,
            None,
        );
        driver.init_index(&index).await?;

        let result = driver
            .process_leaf_batch(&[
                leaf("0", "7.2.0", 10, CatalogLeafType::PackageDetails),
                leaf("1", "7.2.0", 20, CatalogLeafType::PackageDetails),
                leaf("2", "8.0.0", 30, CatalogLeafType::PackageDelete),
            ])
            .await?;
        assert_eq!(result, BatchMessageProcessorResult::default());

        let row = store.get("packageversions", "polly", "7.2.0").await?.unwrap();
        let entity: PackageVersionEntity = row.value.to_record()?;
        assert_eq!(entity.commit_timestamp, at(20));
        assert_eq!(entity.listed, Some(false));
        assert_eq!(entity.package_size, Some(42));

        let deleted = store.get("packageversions", "polly", "8.0.0").await?.unwrap();
        let entity: PackageVersionEntity = deleted.value.to_record()?;
        assert!(entity.is_deleted());
        Ok(())
    }
}
