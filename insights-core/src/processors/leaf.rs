use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use insights_model::{
    CatalogLeafScan, CatalogLeafScanBatchMessage, CatalogLeafScanMessage,
    WorkerMessage,
};
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::drivers::{
    BatchMessageProcessorResult, CatalogScanDriverFactory, DriverResult,
    ResolvedDriver,
};
use crate::error::{InsightsError, Result};
use crate::queue::MessageEnqueuer;
use crate::storage::{CatalogScanStorage, Versioned};

/// Runs leaf scans through their driver and deletes the rows that finished.
/// Leaves the driver asks to retry later stay stored with a bumped attempt
/// count and are re-enqueued with a delay. Leaves that used up their
/// attempts are dropped so the rest of their page can finish.
pub struct CatalogLeafScanProcessor {
    drivers: Arc<CatalogScanDriverFactory>,
    enqueuer: Arc<MessageEnqueuer>,
    storage: CatalogScanStorage,
    config: Arc<WorkerConfig>,
}

impl fmt::Debug for CatalogLeafScanProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogLeafScanProcessor")
            .field("drivers", &self.drivers)
            .field("enqueuer", &self.enqueuer)
            .field("storage", &self.storage)
            .finish()
    }
}

impl CatalogLeafScanProcessor {
    pub fn new(
        drivers: Arc<CatalogScanDriverFactory>,
        enqueuer: Arc<MessageEnqueuer>,
        storage: CatalogScanStorage,
        config: Arc<WorkerConfig>,
    ) -> Self {
        Self {
            drivers,
            enqueuer,
            storage,
            config,
        }
    }

    pub async fn process(&self, message: &CatalogLeafScanMessage) -> Result<()> {
        self.process_ids(
            &message.storage_suffix,
            &message.scan_id,
            &message.page_id,
            std::slice::from_ref(&message.leaf_id),
        )
        .await
    }

    pub async fn process_batch(
        &self,
        message: &CatalogLeafScanBatchMessage,
    ) -> Result<()> {
        self.process_ids(
            &message.storage_suffix,
            &message.scan_id,
            &message.page_id,
            &message.leaf_ids,
        )
        .await
    }

    async fn process_ids(
        &self,
        storage_suffix: &str,
        scan_id: &str,
        page_id: &str,
        leaf_ids: &[String],
    ) -> Result<()> {
        let leaves = match self
            .storage
            .get_leaf_scans_by_id(storage_suffix, scan_id, page_id, leaf_ids)
            .await
        {
            Err(err) if err.is_not_found() => Vec::new(),
            other => other?,
        };
        if leaves.is_empty() {
            debug!(
                target: "catalog_scan::leaf",
                scan_id,
                page_id,
                requested = leaf_ids.len(),
                "leaf scans no longer exist, nothing to do"
            );
            return Ok(());
        }

        let max_attempts = self.config.scan.max_leaf_attempts;
        let (exhausted, leaves): (Vec<_>, Vec<_>) = leaves
            .into_iter()
            .partition(|leaf| leaf.value.attempt_count >= max_attempts);
        if !exhausted.is_empty() {
            for leaf in &exhausted {
                error!(
                    target: "catalog_scan::leaf",
                    leaf_id = %leaf.value.leaf_id,
                    url = %leaf.value.url,
                    attempts = leaf.value.attempt_count,
                    "giving up on leaf scan"
                );
            }
            self.storage.delete_leaf_scans(&exhausted).await?;
        }
        if leaves.is_empty()
            && let Some(leaf) = exhausted.first()
        {
            return Err(InsightsError::TooManyAttempts(format!(
                "leaf scan {} ({}) was attempted {} times",
                leaf.value.leaf_id, leaf.value.url, leaf.value.attempt_count
            )));
        }
        let Some(first) = leaves.first() else {
            return Ok(());
        };

        let outcome = match self.drivers.resolve(first.value.driver_type)? {
            ResolvedDriver::NonBatch(driver) => {
                let mut outcome = BatchMessageProcessorResult::default();
                for leaf in &leaves {
                    match driver.process_leaf(&leaf.value).await {
                        Ok(DriverResult::Success) => {}
                        Ok(DriverResult::TryAgainLater) => {
                            outcome.try_again_later.push(leaf.value.clone());
                        }
                        Err(err) if leaves.len() == 1 => return Err(err),
                        Err(err) => {
                            warn!(
                                target: "catalog_scan::leaf",
                                leaf_id = %leaf.value.leaf_id,
                                url = %leaf.value.url,
                                error = %err,
                                "leaf scan failed"
                            );
                            outcome.failed.push(leaf.value.clone());
                        }
                    }
                }
                outcome
            }
            ResolvedDriver::Batch(driver) => {
                let values: Vec<CatalogLeafScan> =
                    leaves.iter().map(|leaf| leaf.value.clone()).collect();
                driver.process_leaf_batch(&values).await?
            }
        };

        self.settle(leaves, outcome).await
    }

    async fn settle(
        &self,
        leaves: Vec<Versioned<CatalogLeafScan>>,
        outcome: BatchMessageProcessorResult,
    ) -> Result<()> {
        let total = leaves.len();
        let failed: HashSet<&str> =
            outcome.failed.iter().map(|leaf| leaf.leaf_id.as_str()).collect();
        let try_again: HashSet<&str> = outcome
            .try_again_later
            .iter()
            .map(|leaf| leaf.leaf_id.as_str())
            .collect();

        let (pending, succeeded): (Vec<_>, Vec<_>) =
            leaves.into_iter().partition(|leaf| {
                let id = leaf.value.leaf_id.as_str();
                failed.contains(id) || try_again.contains(id)
            });
        self.storage.delete_leaf_scans(&succeeded).await?;

        // A failed batch is redelivered whole, which retries these leaves too.
        if !failed.is_empty() {
            return Err(InsightsError::LeafFailures {
                failed: failed.len(),
                total,
            });
        }

        let mut retry_ids = Vec::new();
        let mut retry_leaf = None;
        for mut leaf in pending {
            leaf.value.attempt_count += 1;
            let leaf = self.storage.replace_leaf_scan(&leaf).await?;
            retry_ids.push(leaf.value.leaf_id.clone());
            retry_leaf = Some(leaf.value);
        }

        if let Some(leaf) = retry_leaf {
            let message = if retry_ids.len() == 1 {
                WorkerMessage::from(CatalogLeafScanMessage {
                    storage_suffix: leaf.storage_suffix,
                    scan_id: leaf.scan_id,
                    page_id: leaf.page_id,
                    leaf_id: leaf.leaf_id,
                })
            } else {
                WorkerMessage::from(CatalogLeafScanBatchMessage {
                    storage_suffix: leaf.storage_suffix,
                    scan_id: leaf.scan_id,
                    page_id: leaf.page_id,
                    leaf_ids: retry_ids.clone(),
                })
            };
            info!(
                target: "catalog_scan::leaf",
                leaves = retry_ids.len(),
                delay_ms = self.config.scan.try_again_later_delay_ms,
                "leaf scans will be tried again later"
            );
            self.enqueuer
                .enqueue_one(message, self.config.scan.try_again_later_delay())
                .await?;
        }

        debug!(
            target: "catalog_scan::leaf",
            completed = succeeded.len(),
            total,
            "processed leaf scans"
        );
        Ok(())
    }
}
