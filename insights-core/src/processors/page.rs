use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use insights_model::{
    CatalogLeafScan, CatalogLeafScanBatchMessage, CatalogLeafScanMessage,
    CatalogPageScan, CatalogPageScanMessage, CatalogPageScanResult,
    CatalogScanState, WorkerMessage, padded_id, padded_width,
};
use tracing::{debug, info};

use crate::catalog::CatalogClient;
use crate::config::WorkerConfig;
use crate::drivers::CatalogScanDriverFactory;
use crate::error::Result;
use crate::queue::MessageEnqueuer;
use crate::storage::{CatalogScanStorage, Versioned, missing_by_url};

/// Drives one page scan through `Created → Expanding → Enqueuing → Waiting`.
/// The page row is deleted when the page is done, which is what the index
/// processor waits on.
pub struct CatalogPageScanProcessor {
    client: Arc<dyn CatalogClient>,
    drivers: Arc<CatalogScanDriverFactory>,
    enqueuer: Arc<MessageEnqueuer>,
    storage: CatalogScanStorage,
    config: Arc<WorkerConfig>,
}

impl fmt::Debug for CatalogPageScanProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogPageScanProcessor")
            .field("client", &"CatalogClient")
            .field("drivers", &self.drivers)
            .field("enqueuer", &self.enqueuer)
            .field("storage", &self.storage)
            .finish()
    }
}

impl CatalogPageScanProcessor {
    pub fn new(
        client: Arc<dyn CatalogClient>,
        drivers: Arc<CatalogScanDriverFactory>,
        enqueuer: Arc<MessageEnqueuer>,
        storage: CatalogScanStorage,
        config: Arc<WorkerConfig>,
    ) -> Self {
        Self {
            client,
            drivers,
            enqueuer,
            storage,
            config,
        }
    }

    pub async fn process(&self, message: &CatalogPageScanMessage) -> Result<()> {
        let found = match self
            .storage
            .get_page_scan(&message.storage_suffix, &message.scan_id, &message.page_id)
            .await
        {
            Err(err) if err.is_not_found() => None,
            other => other?,
        };
        let Some(mut scan) = found else {
            debug!(
                target: "catalog_scan::page",
                scan_id = %message.scan_id,
                page_id = %message.page_id,
                "page scan no longer exists, nothing to do"
            );
            return Ok(());
        };

        let resolved = self.drivers.resolve(scan.value.driver_type)?;
        let driver = resolved.scan_driver();

        if scan.value.state == CatalogScanState::Created {
            scan.value.state.advance(CatalogScanState::Expanding)?;
            scan = self.storage.replace_page_scan(&scan).await?;
        }

        if scan.value.state == CatalogScanState::Expanding {
            match driver.process_page(&scan.value).await? {
                CatalogPageScanResult::Expand => {
                    self.expand(&scan.value).await?;
                    scan.value.state.advance(CatalogScanState::Enqueuing)?;
                    scan = self.storage.replace_page_scan(&scan).await?;
                }
                CatalogPageScanResult::Processed => {
                    return self.complete(&scan).await;
                }
            }
        }

        if scan.value.state == CatalogScanState::Enqueuing {
            let leaves = self
                .storage
                .get_leaf_scans(
                    &scan.value.storage_suffix,
                    &scan.value.scan_id,
                    &scan.value.page_id,
                )
                .await?;
            let messages = if resolved.is_batch() {
                self.batch_messages(&scan.value, &leaves)
            } else {
                leaves
                    .iter()
                    .map(|leaf| {
                        WorkerMessage::from(CatalogLeafScanMessage {
                            storage_suffix: leaf.value.storage_suffix.clone(),
                            scan_id: leaf.value.scan_id.clone(),
                            page_id: leaf.value.page_id.clone(),
                            leaf_id: leaf.value.leaf_id.clone(),
                        })
                    })
                    .collect()
            };
            self.enqueuer.enqueue(messages, Duration::ZERO).await?;
            scan.value.state.advance(CatalogScanState::Waiting)?;
            scan = self.storage.replace_page_scan(&scan).await?;
        }

        if scan.value.state == CatalogScanState::Waiting {
            let remaining = self
                .storage
                .get_leaf_scan_count_lower_bound(
                    &scan.value.storage_suffix,
                    &scan.value.scan_id,
                    &scan.value.page_id,
                )
                .await?;
            if remaining > 0 {
                debug!(
                    target: "catalog_scan::page",
                    scan_id = %scan.value.scan_id,
                    page_id = %scan.value.page_id,
                    remaining,
                    "leaf scans still pending"
                );
                self.enqueuer
                    .enqueue_one(
                        WorkerMessage::from(message.clone()),
                        self.config.scan.poll_delay(),
                    )
                    .await?;
                return Ok(());
            }
            return self.complete(&scan).await;
        }

        Ok(())
    }

    async fn expand(&self, scan: &CatalogPageScan) -> Result<()> {
        let page = self.client.get_catalog_page(&scan.url).await?;
        let items = page.leaves_in_bounds(scan.min, scan.max);
        let width = padded_width(items.len());
        let expected: Vec<CatalogLeafScan> = items
            .into_iter()
            .enumerate()
            .map(|(rank, item)| CatalogLeafScan {
                storage_suffix: scan.storage_suffix.clone(),
                scan_id: scan.scan_id.clone(),
                page_id: scan.page_id.clone(),
                leaf_id: padded_id(rank, width),
                url: item.url,
                page_url: scan.url.clone(),
                leaf_type: item.leaf_type,
                package_id: item.package_id,
                package_version: item.package_version,
                commit_timestamp: item.commit_timestamp,
                driver_type: scan.driver_type,
                driver_parameters: scan.driver_parameters.clone(),
                min: scan.min,
                max: scan.max,
                attempt_count: 0,
            })
            .collect();

        let existing = self
            .storage
            .get_leaf_scans(&scan.storage_suffix, &scan.scan_id, &scan.page_id)
            .await?;
        let missing: Vec<CatalogLeafScan> = missing_by_url(
            &expected,
            existing.iter().map(|leaf| leaf.value.url.as_str()),
            |leaf| leaf.url.as_str(),
            "leaf",
        )?
        .into_iter()
        .cloned()
        .collect();

        info!(
            target: "catalog_scan::page",
            scan_id = %scan.scan_id,
            page_id = %scan.page_id,
            url = %scan.url,
            leaves = expected.len(),
            created = missing.len(),
            "expanded catalog page scan"
        );
        self.storage
            .insert_leaf_scans(&scan.storage_suffix, &missing)
            .await
    }

    fn batch_messages(
        &self,
        scan: &CatalogPageScan,
        leaves: &[Versioned<CatalogLeafScan>],
    ) -> Vec<WorkerMessage> {
        leaves
            .chunks(self.config.scan.leaf_batch_size.max(1))
            .map(|chunk| {
                WorkerMessage::from(CatalogLeafScanBatchMessage {
                    storage_suffix: scan.storage_suffix.clone(),
                    scan_id: scan.scan_id.clone(),
                    page_id: scan.page_id.clone(),
                    leaf_ids: chunk
                        .iter()
                        .map(|leaf| leaf.value.leaf_id.clone())
                        .collect(),
                })
            })
            .collect()
    }

    async fn complete(&self, scan: &Versioned<CatalogPageScan>) -> Result<()> {
        self.storage.delete_page_scan(scan).await?;
        info!(
            target: "catalog_scan::page",
            scan_id = %scan.value.scan_id,
            page_id = %scan.value.page_id,
            "catalog page scan is complete"
        );
        Ok(())
    }
}
