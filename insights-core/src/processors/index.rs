use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use insights_model::{
    CatalogIndexScan, CatalogIndexScanMessage, CatalogIndexScanResult,
    CatalogPageScan, CatalogPageScanMessage, CatalogScanState, WorkerMessage,
    catalog_min, padded_id, padded_width,
};
use tracing::{debug, info, warn};

use crate::catalog::CatalogClient;
use crate::config::WorkerConfig;
use crate::drivers::{CatalogScanDriver, CatalogScanDriverFactory};
use crate::error::{InsightsError, Result};
use crate::queue::MessageEnqueuer;
use crate::storage::{CatalogScanStorage, CursorStorage, Versioned, missing_by_url};

/// Drives an index scan through `Created → Expanding → Enqueuing → Waiting →
/// Complete`. Each message re-reads the scan and falls through every stage
/// that can finish in this invocation; `Waiting` re-enqueues the same message
/// with a delay instead of blocking.
pub struct CatalogIndexScanProcessor {
    client: Arc<dyn CatalogClient>,
    drivers: Arc<CatalogScanDriverFactory>,
    enqueuer: Arc<MessageEnqueuer>,
    storage: CatalogScanStorage,
    cursors: CursorStorage,
    config: Arc<WorkerConfig>,
}

impl fmt::Debug for CatalogIndexScanProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogIndexScanProcessor")
            .field("client", &"CatalogClient")
            .field("drivers", &self.drivers)
            .field("enqueuer", &self.enqueuer)
            .field("storage", &self.storage)
            .field("cursors", &self.cursors)
            .finish()
    }
}

impl CatalogIndexScanProcessor {
    pub fn new(
        client: Arc<dyn CatalogClient>,
        drivers: Arc<CatalogScanDriverFactory>,
        enqueuer: Arc<MessageEnqueuer>,
        storage: CatalogScanStorage,
        cursors: CursorStorage,
        config: Arc<WorkerConfig>,
    ) -> Self {
        Self {
            client,
            drivers,
            enqueuer,
            storage,
            cursors,
            config,
        }
    }

    pub async fn process(&self, message: &CatalogIndexScanMessage) -> Result<()> {
        let Some(mut scan) = self
            .storage
            .get_index_scan(&message.cursor_name, &message.scan_id)
            .await?
        else {
            // The creator enqueues before it writes the row.
            tokio::time::sleep(self.config.scan.missing_scan_delay()).await;
            return Err(InsightsError::NotReady(format!(
                "catalog index scan {} has not been created yet",
                message.scan_id
            )));
        };

        let resolved = self.drivers.resolve(scan.value.driver_type)?;
        let driver = resolved.scan_driver();

        if scan.value.state == CatalogScanState::Created {
            driver.init_index(&scan.value).await?;

            let index = self.client.get_catalog_index().await?;
            let min = scan.value.min.unwrap_or_else(catalog_min);
            let max = scan
                .value
                .max
                .map_or(index.commit_timestamp, |max| max.min(index.commit_timestamp));
            if max <= min {
                info!(
                    target: "catalog_scan::index",
                    scan_id = %scan.value.scan_id,
                    %min,
                    %max,
                    "scan window is empty, completing without work"
                );
                scan.value.state.advance(CatalogScanState::Complete)?;
                self.storage.replace_index_scan(&scan).await?;
                return Ok(());
            }

            scan.value.min = Some(min);
            scan.value.max = Some(max);
            scan.value.state.advance(CatalogScanState::Expanding)?;
            scan = self.storage.replace_index_scan(&scan).await?;
        }

        if scan.value.state == CatalogScanState::Expanding {
            match driver.process_index(&scan.value).await? {
                CatalogIndexScanResult::Expand => {
                    self.expand(&scan.value).await?;
                    scan.value.state.advance(CatalogScanState::Enqueuing)?;
                    scan = self.storage.replace_index_scan(&scan).await?;
                }
                CatalogIndexScanResult::Processed => {
                    debug!(
                        target: "catalog_scan::index",
                        scan_id = %scan.value.scan_id,
                        "driver processed the index directly"
                    );
                    return self.complete(scan, driver).await;
                }
            }
        }

        if scan.value.state == CatalogScanState::Enqueuing {
            let pages = self
                .storage
                .get_page_scans(&scan.value.storage_suffix, &scan.value.scan_id)
                .await?;
            let messages = pages
                .iter()
                .map(|page| {
                    WorkerMessage::from(CatalogPageScanMessage {
                        storage_suffix: page.value.storage_suffix.clone(),
                        scan_id: page.value.scan_id.clone(),
                        page_id: page.value.page_id.clone(),
                    })
                })
                .collect();
            self.enqueuer
                .enqueue(messages, Duration::ZERO)
                .await?;
            scan.value.state.advance(CatalogScanState::Waiting)?;
            scan = self.storage.replace_index_scan(&scan).await?;
        }

        if scan.value.state == CatalogScanState::Waiting {
            let remaining = self
                .storage
                .get_page_scan_count_lower_bound(
                    &scan.value.storage_suffix,
                    &scan.value.scan_id,
                )
                .await?;
            if remaining > 0 {
                debug!(
                    target: "catalog_scan::index",
                    scan_id = %scan.value.scan_id,
                    remaining,
                    "page scans still pending"
                );
                self.enqueuer
                    .enqueue_one(
                        WorkerMessage::from(message.clone()),
                        self.config.scan.poll_delay(),
                    )
                    .await?;
                return Ok(());
            }
            return self.complete(scan, driver).await;
        }

        Ok(())
    }

    /// Creates the page scans missing for this window. Safe to repeat: pages
    /// already stored are skipped and stored pages outside the window are an
    /// error.
    async fn expand(&self, scan: &CatalogIndexScan) -> Result<()> {
        let (min, max) = scan.bounds().ok_or_else(|| {
            InsightsError::Invariant(format!(
                "index scan {} has no bounds while expanding",
                scan.scan_id
            ))
        })?;

        let index = self.client.get_catalog_index().await?;
        let pages = index.pages_in_bounds(min, max);
        let width = padded_width(pages.len());
        let expected: Vec<CatalogPageScan> = pages
            .into_iter()
            .enumerate()
            .map(|(rank, page)| CatalogPageScan {
                storage_suffix: scan.storage_suffix.clone(),
                scan_id: scan.scan_id.clone(),
                page_id: padded_id(rank, width),
                url: page.url,
                rank,
                driver_type: scan.driver_type,
                driver_parameters: scan.driver_parameters.clone(),
                state: CatalogScanState::Created,
                min,
                max,
            })
            .collect();

        let existing = self
            .storage
            .get_page_scans(&scan.storage_suffix, &scan.scan_id)
            .await?;
        let missing: Vec<CatalogPageScan> = missing_by_url(
            &expected,
            existing.iter().map(|page| page.value.url.as_str()),
            |page| page.url.as_str(),
            "page",
        )?
        .into_iter()
        .cloned()
        .collect();

        info!(
            target: "catalog_scan::index",
            scan_id = %scan.scan_id,
            driver = %scan.driver_type,
            pages = expected.len(),
            created = missing.len(),
            %min,
            %max,
            "expanded catalog index scan"
        );
        self.storage
            .insert_page_scans(&scan.storage_suffix, &missing)
            .await
    }

    async fn complete(
        &self,
        mut scan: Versioned<CatalogIndexScan>,
        driver: &dyn CatalogScanDriver,
    ) -> Result<()> {
        driver.finalize(&scan.value).await?;

        if let Some(max) = scan.value.max {
            let advanced = self.cursors.advance(&scan.value.cursor_name, max).await?;
            if !advanced {
                warn!(
                    target: "catalog_scan::index",
                    scan_id = %scan.value.scan_id,
                    cursor = %scan.value.cursor_name,
                    %max,
                    "cursor is already at or past this scan's max"
                );
            }
        }

        scan.value.state.advance(CatalogScanState::Complete)?;
        let scan = self.storage.replace_index_scan(&scan).await?;
        info!(
            target: "catalog_scan::index",
            scan_id = %scan.value.scan_id,
            cursor = %scan.value.cursor_name,
            "catalog scan is complete"
        );

        let pruned = self
            .storage
            .delete_old_index_scans(
                &scan.value.cursor_name,
                &scan.value.scan_id,
                self.config.scan.old_index_scans_to_keep,
            )
            .await?;
        for old in pruned {
            self.storage.delete_child_tables(&old.storage_suffix).await?;
        }
        Ok(())
    }
}
