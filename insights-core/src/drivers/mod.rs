//! Scan drivers and the registry that resolves them.
//!
//! Every driver implements [`CatalogScanDriver`] for the index and page
//! levels. At the leaf level a driver is either non-batch
//! ([`CatalogLeafScanNonBatchDriver`], one leaf per call) or batch
//! ([`CatalogLeafScanBatchDriver`]). Non-batch drivers can be lifted into the
//! batch contract with [`NonBatchDriverAdapter`].

mod adapter;
mod factory;
mod leaf_item_csv;
mod load_latest;
mod package_details_csv;
mod package_version;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use insights_model::{
    CatalogIndexScan, CatalogIndexScanResult, CatalogLeafScan, CatalogPageScan,
    CatalogPageScanResult,
};

use crate::error::Result;

pub use adapter::NonBatchDriverAdapter;
pub use factory::{CatalogScanDriverFactory, DriverDependencies};
pub use leaf_item_csv::{CatalogLeafItemRecord, CatalogLeafItemToCsvDriver};
pub use load_latest::LoadLatestPackageLeafDriver;
pub use package_details_csv::{
    PackageDetailsRecord, PackageDetailsResultType, PackageDetailsToCsvDriver,
};
pub use package_version::{LoadPackageVersionDriver, PackageVersionMapper};

/// Outcome of processing one leaf.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverResult {
    Success,
    /// Upstream data is not ready yet; keep the leaf and retry later.
    TryAgainLater,
}

/// Outcome of processing a batch of leaves. Leaves in neither list
/// succeeded.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchMessageProcessorResult {
    pub failed: Vec<CatalogLeafScan>,
    pub try_again_later: Vec<CatalogLeafScan>,
}

#[async_trait]
pub trait CatalogScanDriver: Send + Sync {
    /// Called once while the index scan is still `Created`.
    async fn init_index(&self, _scan: &CatalogIndexScan) -> Result<()> {
        Ok(())
    }

    async fn process_index(
        &self,
        scan: &CatalogIndexScan,
    ) -> Result<CatalogIndexScanResult>;

    async fn process_page(
        &self,
        scan: &CatalogPageScan,
    ) -> Result<CatalogPageScanResult>;

    /// Called once all pages have completed, before the cursor moves.
    async fn finalize(&self, _scan: &CatalogIndexScan) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait CatalogLeafScanNonBatchDriver: CatalogScanDriver {
    async fn process_leaf(&self, leaf: &CatalogLeafScan) -> Result<DriverResult>;
}

#[async_trait]
pub trait CatalogLeafScanBatchDriver: CatalogScanDriver {
    async fn process_leaf_batch(
        &self,
        leaves: &[CatalogLeafScan],
    ) -> Result<BatchMessageProcessorResult>;
}

/// A driver resolved for one scan type.
#[derive(Clone)]
pub enum ResolvedDriver {
    Batch(Arc<dyn CatalogLeafScanBatchDriver>),
    NonBatch(Arc<dyn CatalogLeafScanNonBatchDriver>),
}

impl ResolvedDriver {
    pub fn scan_driver(&self) -> &dyn CatalogScanDriver {
        match self {
            ResolvedDriver::Batch(driver) => driver.as_ref(),
            ResolvedDriver::NonBatch(driver) => driver.as_ref(),
        }
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, ResolvedDriver::Batch(_))
    }
}

impl fmt::Debug for ResolvedDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolvedDriver::Batch(_) => f.write_str("ResolvedDriver::Batch"),
            ResolvedDriver::NonBatch(_) => f.write_str("ResolvedDriver::NonBatch"),
        }
    }
}
