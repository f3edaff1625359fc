use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use insights_model::{
    CatalogIndexScan, CatalogIndexScanResult, CatalogLeaf, CatalogLeafScan,
    CatalogLeafType, CatalogPageScan, CatalogPageScanResult,
    lower_normalized_version,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CatalogLeafScanNonBatchDriver, CatalogScanDriver, DriverResult};
use crate::catalog::CatalogClient;
use crate::error::Result;
use crate::results::{CsvRecord, CsvResultStorage};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackageDetailsResultType {
    Available,
    Deleted,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PackageDetailsRecord {
    pub lower_id: String,
    pub lower_version: String,
    pub id: String,
    pub version: String,
    pub commit_timestamp: DateTime<Utc>,
    pub result_type: PackageDetailsResultType,
    pub published: Option<DateTime<Utc>>,
    pub listed: Option<bool>,
    pub package_size: Option<u64>,
}

impl CsvRecord for PackageDetailsRecord {
    fn bucket_key(&self) -> String {
        format!("{}/{}", self.lower_id, self.lower_version)
    }

    fn commit_timestamp(&self) -> DateTime<Utc> {
        self.commit_timestamp
    }
}

impl PackageDetailsRecord {
    fn deleted(leaf: &CatalogLeafScan, lower_version: String) -> Self {
        Self {
            lower_id: leaf.package_id.to_lowercase(),
            lower_version,
            id: leaf.package_id.clone(),
            version: leaf.package_version.clone(),
            commit_timestamp: leaf.commit_timestamp,
            result_type: PackageDetailsResultType::Deleted,
            published: None,
            listed: None,
            package_size: None,
        }
    }
}

/// Emits one row per package version from the leaf document. Deleted
/// packages, including details leaves whose document is gone, produce a
/// `Deleted` row.
pub struct PackageDetailsToCsvDriver {
    client: Arc<dyn CatalogClient>,
    results: CsvResultStorage<PackageDetailsRecord>,
}

impl fmt::Debug for PackageDetailsToCsvDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackageDetailsToCsvDriver")
            .field("client", &"CatalogClient")
            .field("results", &self.results)
            .finish()
    }
}

impl PackageDetailsToCsvDriver {
    pub fn new(
        client: Arc<dyn CatalogClient>,
        results: CsvResultStorage<PackageDetailsRecord>,
    ) -> Self {
        Self { client, results }
    }

    async fn record_for(
        &self,
        leaf: &CatalogLeafScan,
    ) -> Result<Option<PackageDetailsRecord>> {
        let lower_version = lower_normalized_version(&leaf.package_version)?;
        if leaf.leaf_type == CatalogLeafType::PackageDelete {
            return Ok(Some(PackageDetailsRecord::deleted(leaf, lower_version)));
        }

        match self.client.get_catalog_leaf(leaf.leaf_type, &leaf.url).await? {
            None | Some(CatalogLeaf::PackageDelete(_)) => {
                debug!(
                    target: "catalog_scan::leaf",
                    url = %leaf.url,
                    "package details leaf is gone, recording as deleted"
                );
                Ok(Some(PackageDetailsRecord::deleted(leaf, lower_version)))
            }
            Some(CatalogLeaf::PackageDetails(details))
                if details.commit_timestamp < leaf.commit_timestamp =>
            {
                Ok(None)
            }
            Some(CatalogLeaf::PackageDetails(details)) => {
                Ok(Some(PackageDetailsRecord {
                    lower_id: leaf.package_id.to_lowercase(),
                    lower_version,
                    id: details.package_id.clone(),
                    version: details.package_version.clone(),
                    commit_timestamp: leaf.commit_timestamp,
                    result_type: PackageDetailsResultType::Available,
                    published: Some(details.published),
                    listed: Some(details.is_listed()),
                    package_size: details.package_size,
                }))
            }
        }
    }
}

#[async_trait]
impl CatalogScanDriver for PackageDetailsToCsvDriver {
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

    async fn finalize(&self, scan: &CatalogIndexScan) -> Result<()> {
        self.results.compact(&scan.storage_suffix).await?;
        Ok(())
    }
}

#[async_trait]
impl CatalogLeafScanNonBatchDriver for PackageDetailsToCsvDriver {
    async fn process_leaf(&self, leaf: &CatalogLeafScan) -> Result<DriverResult> {
        match self.record_for(leaf).await? {
            Some(record) => {
                self.results.append(&leaf.storage_suffix, &[record]).await?;
                Ok(DriverResult::Success)
            }
            // The document predates this catalog commit; wait for it to
            // catch up.
            None => Ok(DriverResult::TryAgainLater),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use insights_model::{CatalogScanDriverType, PackageDetailsLeaf};

    use super::*;
    use crate::catalog::MockCatalogClient;
    use crate::results::{BlobStore, MemoryBlobStore};

    fn at(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, second).unwrap()
    }

    fn leaf(leaf_type: CatalogLeafType) -> CatalogLeafScan {
        CatalogLeafScan {
            storage_suffix: "s".into(),
            scan_id: "scan".into(),
            page_id: "0".into(),
            leaf_id: "0".into(),
            url: "https://example/leaf.json".into(),
            page_url: "https://example/page0.json".into(),
            leaf_type,
            package_id: "Knapcode.TorSharp".into(),
            package_version: "2.0.7".into(),
            commit_timestamp: at(10),
            driver_type: CatalogScanDriverType::PackageDetailsToCsv,
            driver_parameters: None,
            min: at(0),
            max: at(30),
            attempt_count: 0,
        }
    }

    fn details(commit_second: u32) -> CatalogLeaf {
        CatalogLeaf::PackageDetails(PackageDetailsLeaf {
            url: "https://example/leaf.json".into(),
            commit_timestamp: at(commit_second),
            package_id: "Knapcode.TorSharp".into(),
            package_version: "2.0.7".into(),
            published: at(1),
            listed: Some(true),
            package_size: Some(1024),
            package_hash: None,
        })
    }

    fn driver(client: MockCatalogClient) -> (PackageDetailsToCsvDriver, Arc<MemoryBlobStore>) {
        let blobs = Arc::new(MemoryBlobStore::new());
        let results = CsvResultStorage::new(blobs.clone(), "packagedetails", 1);
        (PackageDetailsToCsvDriver::new(Arc::new(client), results), blobs)
    }

    #[tokio::test]
    async fn stale_document_is_try_again_later() -> Result<()> {
        let mut client = MockCatalogClient::new();
        client
            .expect_get_catalog_leaf()
            .times(1)
            .returning(|_, _| Ok(Some(details(5))));
        let (driver, blobs) = driver(client);

        let result = driver.process_leaf(&leaf(CatalogLeafType::PackageDetails)).await?;
        assert_eq!(result, DriverResult::TryAgainLater);
        assert!(blobs.list("packagedetails/").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn missing_document_is_recorded_as_deleted() -> Result<()> {
        let mut client = MockCatalogClient::new();
        client
            .expect_get_catalog_leaf()
            .times(1)
            .returning(|_, _| Ok(None));
        let (driver, _blobs) = driver(client);

        let leaf = leaf(CatalogLeafType::PackageDetails);
        assert_eq!(driver.process_leaf(&leaf).await?, DriverResult::Success);
        driver
            .finalize(&CatalogIndexScan {
                storage_suffix: "s".into(),
                ..sample_index()
            })
            .await?;

        let rows = driver.results.read_all().await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].result_type, PackageDetailsResultType::Deleted);
        assert_eq!(rows[0].lower_id, "knapcode.torsharp");
        Ok(())
    }

    #[tokio::test]
    async fn delete_leaves_skip_the_fetch() -> Result<()> {
        let client = MockCatalogClient::new();
        let (driver, _blobs) = driver(client);
        let result = driver.process_leaf(&leaf(CatalogLeafType::PackageDelete)).await?;
        assert_eq!(result, DriverResult::Success);
        Ok(())
    }

    #[tokio::test]
    async fn current_document_is_available() -> Result<()> {
        let mut client = MockCatalogClient::new();
        client
            .expect_get_catalog_leaf()
            .returning(|_, _| Ok(Some(details(10))));
        let (driver, _blobs) = driver(client);

        let leaf = leaf(CatalogLeafType::PackageDetails);
        let record = driver.record_for(&leaf).await?.unwrap();
        assert_eq!(record.result_type, PackageDetailsResultType::Available);
        assert_eq!(record.listed, Some(true));
        assert_eq!(record.package_size, Some(1024));
        Ok(())
    }

    fn sample_index() -> CatalogIndexScan {
        CatalogIndexScan::new(
            &insights_model::ScanId::new(),
            CatalogScanDriverType::PackageDetailsToCsv,
            None,
            None,
            None,
        )
    }
}
