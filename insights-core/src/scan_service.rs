//! Operator entry points: start a scan, requeue a stuck one, inspect one.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use insights_model::{
    CatalogIndexScan, CatalogIndexScanMessage, CatalogLeafScanBatchMessage,
    CatalogLeafScanMessage, CatalogPageScanMessage, CatalogScanDriverType,
    CatalogScanState, ScanId, WorkerMessage, catalog_min,
};
use tracing::info;

use crate::catalog::CatalogClient;
use crate::config::WorkerConfig;
use crate::drivers::CatalogScanDriverFactory;
use crate::error::{InsightsError, Result};
use crate::queue::MessageEnqueuer;
use crate::storage::{CatalogScanStorage, CursorStorage};

#[derive(Clone, Debug, PartialEq)]
pub enum StartScanOutcome {
    /// An unfinished scan already owns the cursor.
    AlreadyRunning(CatalogIndexScan),
    /// The cursor is at or past the requested max.
    UpToDate { cursor: DateTime<Utc> },
    Started(CatalogIndexScan),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequeueOutcome {
    NotFound,
    /// Only waiting scans are requeued; anything earlier still owns its
    /// messages.
    NotWaiting(CatalogScanState),
    Requeued { pages: usize, leaves: usize },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScanStatus {
    pub scan: CatalogIndexScan,
    /// Saturating counts, exact only below the configured probe size.
    pub remaining_pages: usize,
    pub remaining_leaves: usize,
}

pub struct CatalogScanService {
    client: Arc<dyn CatalogClient>,
    drivers: Arc<CatalogScanDriverFactory>,
    enqueuer: Arc<MessageEnqueuer>,
    storage: CatalogScanStorage,
    cursors: CursorStorage,
    config: Arc<WorkerConfig>,
}

impl fmt::Debug for CatalogScanService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogScanService")
            .field("client", &"CatalogClient")
            .field("drivers", &self.drivers)
            .field("enqueuer", &self.enqueuer)
            .field("storage", &self.storage)
            .field("cursors", &self.cursors)
            .finish()
    }
}

impl CatalogScanService {
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

    /// Creates the shared tables. Safe to call on every startup.
    pub async fn initialize(&self) -> Result<()> {
        self.storage.initialize().await?;
        self.cursors.initialize().await
    }

    pub async fn start(
        &self,
        driver_type: CatalogScanDriverType,
        max: Option<DateTime<Utc>>,
        driver_parameters: Option<String>,
    ) -> Result<StartScanOutcome> {
        self.drivers.resolve(driver_type)?;
        if let Some(raw) = driver_parameters.as_deref() {
            serde_json::from_str::<serde_json::Value>(raw)
                .map_err(|err| InsightsError::InvalidParameters(err.to_string()))?;
        }

        let cursor_name = driver_type.cursor_name();
        if let Some(running) = self
            .storage
            .get_latest_index_scans(&cursor_name, usize::MAX)
            .await?
            .into_iter()
            .find(|scan| !scan.value.state.is_terminal())
        {
            return Ok(StartScanOutcome::AlreadyRunning(running.value));
        }

        let cursor = self.cursors.get_or_create(&cursor_name).await?;
        let min = cursor.value.value.max(catalog_min());
        let max = match max {
            Some(max) => max,
            None => self.client.get_catalog_index().await?.commit_timestamp,
        };
        if min >= max {
            return Ok(StartScanOutcome::UpToDate { cursor: min });
        }

        let scan = CatalogIndexScan::new(
            &ScanId::new(),
            driver_type,
            driver_parameters,
            Some(min),
            Some(max),
        );
        self.storage
            .initialize_child_tables(&scan.storage_suffix)
            .await?;
        let scan = self.storage.insert_index_scan(scan).await?;
        self.enqueuer
            .enqueue_one(
                WorkerMessage::from(CatalogIndexScanMessage {
                    cursor_name: scan.value.cursor_name.clone(),
                    scan_id: scan.value.scan_id.clone(),
                }),
                Duration::ZERO,
            )
            .await?;

        info!(
            target: "catalog_scan::index",
            scan_id = %scan.value.scan_id,
            driver = %driver_type,
            %min,
            %max,
            "started catalog scan"
        );
        Ok(StartScanOutcome::Started(scan.value))
    }

    /// Re-sends the messages of a waiting scan from what is still stored.
    /// Never writes rows.
    pub async fn requeue(&self, scan_id: &str) -> Result<RequeueOutcome> {
        let Some(scan) = self.storage.find_index_scan(scan_id).await? else {
            return Ok(RequeueOutcome::NotFound);
        };
        let scan = scan.value;
        if scan.state != CatalogScanState::Waiting {
            return Ok(RequeueOutcome::NotWaiting(scan.state));
        }

        let batch = self.drivers.resolve(scan.driver_type)?.is_batch();
        let pages = self
            .storage
            .get_page_scans(&scan.storage_suffix, &scan.scan_id)
            .await?;

        let mut leaf_messages = Vec::new();
        let mut leaves = 0;
        for page in pages
            .iter()
            .filter(|page| page.value.state == CatalogScanState::Waiting)
        {
            let page = &page.value;
            let ids: Vec<String> = self
                .storage
                .get_leaf_scans(&page.storage_suffix, &page.scan_id, &page.page_id)
                .await?
                .into_iter()
                .map(|leaf| leaf.value.leaf_id)
                .collect();
            leaves += ids.len();
            if batch {
                for chunk in ids.chunks(self.config.scan.leaf_batch_size.max(1)) {
                    leaf_messages.push(WorkerMessage::from(CatalogLeafScanBatchMessage {
                        storage_suffix: page.storage_suffix.clone(),
                        scan_id: page.scan_id.clone(),
                        page_id: page.page_id.clone(),
                        leaf_ids: chunk.to_vec(),
                    }));
                }
            } else {
                leaf_messages.extend(ids.into_iter().map(|leaf_id| {
                    WorkerMessage::from(CatalogLeafScanMessage {
                        storage_suffix: page.storage_suffix.clone(),
                        scan_id: page.scan_id.clone(),
                        page_id: page.page_id.clone(),
                        leaf_id,
                    })
                }));
            }
        }

        let page_messages = pages
            .iter()
            .map(|page| {
                WorkerMessage::from(CatalogPageScanMessage {
                    storage_suffix: page.value.storage_suffix.clone(),
                    scan_id: page.value.scan_id.clone(),
                    page_id: page.value.page_id.clone(),
                })
            })
            .collect();

        self.enqueuer.enqueue(leaf_messages, Duration::ZERO).await?;
        self.enqueuer.enqueue(page_messages, Duration::ZERO).await?;
        self.enqueuer
            .enqueue_one(
                WorkerMessage::from(CatalogIndexScanMessage {
                    cursor_name: scan.cursor_name.clone(),
                    scan_id: scan.scan_id.clone(),
                }),
                Duration::ZERO,
            )
            .await?;

        info!(
            target: "catalog_scan::index",
            scan_id = %scan.scan_id,
            pages = pages.len(),
            leaves,
            "requeued waiting catalog scan"
        );
        Ok(RequeueOutcome::Requeued {
            pages: pages.len(),
            leaves,
        })
    }

    pub async fn status(&self, scan_id: &str) -> Result<Option<ScanStatus>> {
        let Some(scan) = self.storage.find_index_scan(scan_id).await? else {
            return Ok(None);
        };
        let scan = scan.value;
        if scan.state == CatalogScanState::Complete {
            return Ok(Some(ScanStatus {
                scan,
                remaining_pages: 0,
                remaining_leaves: 0,
            }));
        }

        let pages = self
            .storage
            .get_page_scans(&scan.storage_suffix, &scan.scan_id)
            .await?;
        let mut remaining_leaves = 0;
        for page in &pages {
            remaining_leaves += self
                .storage
                .get_leaf_scan_count_lower_bound(
                    &page.value.storage_suffix,
                    &page.value.scan_id,
                    &page.value.page_id,
                )
                .await?;
        }
        Ok(Some(ScanStatus {
            scan,
            remaining_pages: pages.len(),
            remaining_leaves,
        }))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use insights_model::CatalogIndex;

    use super::*;
    use crate::catalog::MockCatalogClient;
    use crate::drivers::DriverDependencies;
    use crate::queue::{MemoryQueue, QueueBackend};
    use crate::results::MemoryBlobStore;
    use crate::storage::MemoryTableStore;

    fn at(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, second).unwrap()
    }

    async fn service(commit: DateTime<Utc>) -> Result<(CatalogScanService, Arc<MemoryQueue>)> {
        let mut client = MockCatalogClient::new();
        client.expect_get_catalog_index().returning(move || {
            Ok(CatalogIndex {
                commit_timestamp: commit,
                pages: Vec::new(),
            })
        });
        let client: Arc<dyn CatalogClient> = Arc::new(client);
        let config = Arc::new(WorkerConfig::default());
        let store = Arc::new(MemoryTableStore::default());
        let queue = Arc::new(MemoryQueue::new());
        let drivers = Arc::new(CatalogScanDriverFactory::new(
            &config,
            DriverDependencies {
                client: client.clone(),
                tables: store.clone(),
                blobs: Arc::new(MemoryBlobStore::new()),
            },
        ));
        let service = CatalogScanService::new(
            client,
            drivers,
            Arc::new(MessageEnqueuer::new(
                queue.clone() as Arc<dyn QueueBackend>,
                &config.queue,
            )),
            CatalogScanStorage::new(store.clone(), config.tables.clone()),
            CursorStorage::new(store, &config.tables.cursor_table),
            config,
        );
        service.initialize().await?;
        Ok((service, queue))
    }

    #[tokio::test]
    async fn start_creates_the_scan_once() -> Result<()> {
        let (service, queue) = service(at(30)).await?;

        let StartScanOutcome::Started(scan) = service
            .start(CatalogScanDriverType::CatalogLeafItemToCsv, None, None)
            .await?
        else {
            panic!("expected a new scan");
        };
        assert_eq!(scan.state, CatalogScanState::Created);
        assert_eq!(scan.bounds(), Some((catalog_min(), at(30))));
        assert_eq!(queue.depth().await?, 1);

        let again = service
            .start(CatalogScanDriverType::CatalogLeafItemToCsv, None, None)
            .await?;
        assert_eq!(again, StartScanOutcome::AlreadyRunning(scan));
        Ok(())
    }

    #[tokio::test]
    async fn start_sees_unfinished_scans_behind_newer_completed_ones() -> Result<()> {
        let (service, queue) = service(at(30)).await?;
        let StartScanOutcome::Started(running) = service
            .start(CatalogScanDriverType::CatalogLeafItemToCsv, None, None)
            .await?
        else {
            panic!("expected a new scan");
        };

        let mut newer = CatalogIndexScan::new(
            &ScanId::descending_at(Utc::now() + chrono::Duration::minutes(1)),
            CatalogScanDriverType::CatalogLeafItemToCsv,
            None,
            Some(catalog_min()),
            Some(at(10)),
        );
        newer.state = CatalogScanState::Complete;
        service.storage.insert_index_scan(newer).await?;

        let outcome = service
            .start(CatalogScanDriverType::CatalogLeafItemToCsv, None, None)
            .await?;
        assert_eq!(outcome, StartScanOutcome::AlreadyRunning(running));
        assert_eq!(queue.depth().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn start_is_up_to_date_when_max_is_behind_the_cursor() -> Result<()> {
        let (service, queue) = service(at(30)).await?;
        let outcome = service
            .start(
                CatalogScanDriverType::PackageDetailsToCsv,
                Some(catalog_min()),
                None,
            )
            .await?;
        assert_eq!(outcome, StartScanOutcome::UpToDate { cursor: catalog_min() });
        assert_eq!(queue.depth().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn start_rejects_malformed_parameters() -> Result<()> {
        let (service, _queue) = service(at(30)).await?;
        let err = service
            .start(
                CatalogScanDriverType::PackageDetailsToCsv,
                None,
                Some("{not json".into()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, InsightsError::InvalidParameters(_)));
        Ok(())
    }

    #[tokio::test]
    async fn requeue_only_touches_waiting_scans() -> Result<()> {
        let (service, queue) = service(at(30)).await?;
        assert_eq!(service.requeue("missing").await?, RequeueOutcome::NotFound);

        let StartScanOutcome::Started(scan) = service
            .start(CatalogScanDriverType::CatalogLeafItemToCsv, None, None)
            .await?
        else {
            panic!("expected a new scan");
        };
        assert_eq!(
            service.requeue(&scan.scan_id).await?,
            RequeueOutcome::NotWaiting(CatalogScanState::Created)
        );
        assert_eq!(queue.depth().await?, 1);

        let status = service.status(&scan.scan_id).await?.unwrap();
        assert_eq!(status.remaining_pages, 0);
        assert_eq!(status.scan.scan_id, scan.scan_id);
        Ok(())
    }
}
