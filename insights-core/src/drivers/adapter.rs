use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use insights_model::{
    CatalogIndexScan, CatalogIndexScanResult, CatalogLeafScan, CatalogPageScan,
    CatalogPageScanResult,
};
use tracing::warn;

use super::{
    BatchMessageProcessorResult, CatalogLeafScanBatchDriver,
    CatalogLeafScanNonBatchDriver, CatalogScanDriver, DriverResult,
};
use crate::error::Result;

/// Runs a non-batch driver over a batch of leaves with bounded concurrency.
/// A failing leaf is reported in `failed` without stopping its siblings.
pub struct NonBatchDriverAdapter<D: ?Sized> {
    inner: Arc<D>,
    concurrency: usize,
}

impl<D: ?Sized> fmt::Debug for NonBatchDriverAdapter<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NonBatchDriverAdapter")
            .field("inner", &type_name::<D>())
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

impl<D: CatalogLeafScanNonBatchDriver + ?Sized> NonBatchDriverAdapter<D> {
    pub fn new(inner: Arc<D>, concurrency: usize) -> Self {
        Self {
            inner,
            concurrency: concurrency.max(1),
        }
    }
}

#[async_trait]
impl<D: CatalogLeafScanNonBatchDriver + ?Sized> CatalogScanDriver
    for NonBatchDriverAdapter<D>
{
    async fn init_index(&self, scan: &CatalogIndexScan) -> Result<()> {
        self.inner.init_index(scan).await
    }

    async fn process_index(
        &self,
        scan: &CatalogIndexScan,
    ) -> Result<CatalogIndexScanResult> {
        self.inner.process_index(scan).await
    }

    async fn process_page(
        &self,
        scan: &CatalogPageScan,
    ) -> Result<CatalogPageScanResult> {
        self.inner.process_page(scan).await
    }

    async fn finalize(&self, scan: &CatalogIndexScan) -> Result<()> {
        self.inner.finalize(scan).await
    }
}

#[async_trait]
impl<D: CatalogLeafScanNonBatchDriver + ?Sized> CatalogLeafScanBatchDriver
    for NonBatchDriverAdapter<D>
{
    async fn process_leaf_batch(
        &self,
        leaves: &[CatalogLeafScan],
    ) -> Result<BatchMessageProcessorResult> {
        let inner = &self.inner;
        let pending: Vec<_> = leaves
            .iter()
            .map(|leaf| async move { (leaf, inner.process_leaf(leaf).await) })
            .collect();
        let outcomes: Vec<(&CatalogLeafScan, Result<DriverResult>)> =
            stream::iter(pending)
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        let mut result = BatchMessageProcessorResult::default();
        for (leaf, outcome) in outcomes {
            match outcome {
                Ok(DriverResult::Success) => {}
                Ok(DriverResult::TryAgainLater) => {
                    result.try_again_later.push(leaf.clone());
                }
                Err(err) => {
                    warn!(
                        target: "catalog_scan::leaf",
                        scan_id = %leaf.scan_id,
                        page_id = %leaf.page_id,
                        leaf_id = %leaf.leaf_id,
                        error = %err,
                        "leaf failed inside batch"
                    );
                    result.failed.push(leaf.clone());
                }
            }
        }
        Ok(result)
    }
}
