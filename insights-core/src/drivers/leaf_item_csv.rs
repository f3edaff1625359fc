use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use insights_model::{
    CatalogIndexScan, CatalogIndexScanResult, CatalogLeafScan, CatalogLeafType,
    CatalogPageScan, CatalogPageScanResult, lower_normalized_version,
};
use serde::{Deserialize, Serialize};

use super::{CatalogLeafScanNonBatchDriver, CatalogScanDriver, DriverResult};
use crate::error::Result;
use crate::results::{CsvRecord, CsvResultStorage};

/// One row per catalog leaf, straight from the page item. Every event for a
/// package version is kept.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CatalogLeafItemRecord {
    pub lower_id: String,
    pub lower_version: String,
    pub id: String,
    pub version: String,
    pub leaf_type: CatalogLeafType,
    pub commit_timestamp: DateTime<Utc>,
    pub url: String,
    pub page_url: String,
}

impl CsvRecord for CatalogLeafItemRecord {
    fn bucket_key(&self) -> String {
        format!("{}/{}", self.lower_id, self.lower_version)
    }

    fn identity(&self) -> String {
        self.url.clone()
    }

    fn commit_timestamp(&self) -> DateTime<Utc> {
        self.commit_timestamp
    }
}

impl CatalogLeafItemRecord {
    pub fn from_leaf(leaf: &CatalogLeafScan) -> Result<Self> {
        Ok(Self {
            lower_id: leaf.package_id.to_lowercase(),
            lower_version: lower_normalized_version(&leaf.package_version)?,
            id: leaf.package_id.clone(),
            version: leaf.package_version.clone(),
            leaf_type: leaf.leaf_type,
            commit_timestamp: leaf.commit_timestamp,
            url: leaf.url.clone(),
            page_url: leaf.page_url.clone(),
        })
    }
}

pub struct CatalogLeafItemToCsvDriver {
    results: CsvResultStorage<CatalogLeafItemRecord>,
}

impl fmt::Debug for CatalogLeafItemToCsvDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogLeafItemToCsvDriver")
            .field("results", &self.results)
            .finish()
    }
}

impl CatalogLeafItemToCsvDriver {
    pub fn new(results: CsvResultStorage<CatalogLeafItemRecord>) -> Self {
        Self { results }
    }
}

#[async_trait]
impl CatalogScanDriver for CatalogLeafItemToCsvDriver {
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
impl CatalogLeafScanNonBatchDriver for CatalogLeafItemToCsvDriver {
    async fn process_leaf(&self, leaf: &CatalogLeafScan) -> Result<DriverResult> {
        let record = CatalogLeafItemRecord::from_leaf(leaf)?;
        self.results.append(&leaf.storage_suffix, &[record]).await?;
        Ok(DriverResult::Success)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;
    use insights_model::{CatalogScanDriverType, ScanId};

    use super::*;
    use crate::results::MemoryBlobStore;

    fn at(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, second).unwrap()
    }

    fn leaf(leaf_id: &str, leaf_type: CatalogLeafType, second: u32) -> CatalogLeafScan {
        CatalogLeafScan {
            storage_suffix: "s".into(),
            scan_id: "scan".into(),
            page_id: "0".into(),
            leaf_id: leaf_id.into(),
            url: format!("https://example/{second}/polly.7.0.0.json"),
            page_url: "https://example/page0.json".into(),
            leaf_type,
            package_id: "Polly".into(),
            package_version: "7.0.0".into(),
            commit_timestamp: at(second),
            driver_type: CatalogScanDriverType::CatalogLeafItemToCsv,
            driver_parameters: None,
            min: at(0),
            max: at(30),
            attempt_count: 0,
        }
    }

    #[tokio::test]
    async fn keeps_every_event_for_a_version() -> Result<()> {
        let driver = CatalogLeafItemToCsvDriver::new(CsvResultStorage::new(
            Arc::new(MemoryBlobStore::new()),
            "catalogleafitems",
            4,
        ));
        let published = leaf("0", CatalogLeafType::PackageDetails, 1);
        let deleted = leaf("1", CatalogLeafType::PackageDelete, 2);

        driver.process_leaf(&published).await?;
        driver.process_leaf(&deleted).await?;
        // Redelivered leaf.
        driver.process_leaf(&deleted).await?;

        let mut scan = CatalogIndexScan::new(
            &ScanId::new(),
            CatalogScanDriverType::CatalogLeafItemToCsv,
            None,
            None,
            None,
        );
        scan.storage_suffix = "s".into();
        driver.finalize(&scan).await?;

        let mut rows = driver.results.read_all().await?;
        rows.sort_by_key(|row| row.commit_timestamp);
        let types: Vec<_> = rows.iter().map(|row| row.leaf_type).collect();
        assert_eq!(
            types,
            [CatalogLeafType::PackageDetails, CatalogLeafType::PackageDelete]
        );
        Ok(())
    }
}
