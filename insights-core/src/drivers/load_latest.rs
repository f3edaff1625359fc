use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use insights_model::{
    CatalogIndexScan, CatalogIndexScanResult, CatalogLeafScan, CatalogPageScan,
    CatalogPageScanResult,
};
use tracing::debug;

use super::{CatalogLeafScanNonBatchDriver, CatalogScanDriver, DriverResult};
use crate::catalog::CatalogClient;
use crate::error::Result;
use crate::latest_leaf::{LatestLeafStorage, LatestPackageLeafMapper, LeafCandidate};

/// Tracks the latest leaf per package version. Whole pages are handled at
/// the page level so no leaf scans are created.
pub struct LoadLatestPackageLeafDriver {
    client: Arc<dyn CatalogClient>,
    storage: LatestLeafStorage,
    mapper: LatestPackageLeafMapper,
}

impl fmt::Debug for LoadLatestPackageLeafDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadLatestPackageLeafDriver")
            .field("client", &"CatalogClient")
            .field("storage", &self.storage)
            .field("mapper", &self.mapper)
            .finish()
    }
}

impl LoadLatestPackageLeafDriver {
    pub fn new(
        client: Arc<dyn CatalogClient>,
        storage: LatestLeafStorage,
        mapper: LatestPackageLeafMapper,
    ) -> Self {
        Self {
            client,
            storage,
            mapper,
        }
    }
}

/// Page rank from a padded page id. Ids are always generated numerically.
pub(crate) fn rank_of(id: &str) -> usize {
    id.parse().unwrap_or_default()
}

#[async_trait]
impl CatalogScanDriver for LoadLatestPackageLeafDriver {
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
        scan: &CatalogPageScan,
    ) -> Result<CatalogPageScanResult> {
        let page = self.client.get_catalog_page(&scan.url).await?;
        let candidates: Vec<LeafCandidate> = page
            .leaves_in_bounds(scan.min, scan.max)
            .into_iter()
            .enumerate()
            .map(|(leaf_rank, item)| LeafCandidate {
                item,
                page_url: scan.url.clone(),
                page_rank: scan.rank,
                leaf_rank,
            })
            .collect();

        let summary = self.storage.add_leaves(&self.mapper, &candidates).await?;
        debug!(
            target: "catalog_scan::page",
            scan_id = %scan.scan_id,
            page_id = %scan.page_id,
            inserted = summary.inserted,
            replaced = summary.replaced,
            skipped = summary.skipped,
            "loaded latest leaves for page"
        );
        Ok(CatalogPageScanResult::Processed)
    }
}

#[async_trait]
impl CatalogLeafScanNonBatchDriver for LoadLatestPackageLeafDriver {
    async fn process_leaf(&self, leaf: &CatalogLeafScan) -> Result<DriverResult> {
        let candidate = LeafCandidate {
            item: leaf.to_leaf_item(),
            page_url: leaf.page_url.clone(),
            page_rank: rank_of(&leaf.page_id),
            leaf_rank: rank_of(&leaf.leaf_id),
        };
        self.storage
            .add_leaves(&self.mapper, std::slice::from_ref(&candidate))
            .await?;
        Ok(DriverResult::Success)
    }
}
