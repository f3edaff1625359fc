#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use insights_core::{
    CatalogClient, CatalogScanWorker, InsightsError, MemoryBlobStore, MemoryQueue,
    MemoryTableStore, Result, WorkerConfig,
};
use insights_model::{
    CatalogIndex, CatalogLeaf, CatalogLeafItem, CatalogLeafType, CatalogPage,
    CatalogPageItem, PackageDeleteLeaf, PackageDetailsLeaf,
};
use tokio::sync::Mutex;

pub fn at(second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, second).unwrap()
}

/// In-memory catalog. Pages and leaf documents can be changed between
/// scans to simulate new commits.
#[derive(Debug, Default)]
pub struct FakeCatalog {
    inner: Mutex<FakeCatalogState>,
}

#[derive(Debug, Default)]
struct FakeCatalogState {
    commit: Option<DateTime<Utc>>,
    pages: Vec<CatalogPage>,
    leaves: HashMap<String, CatalogLeaf>,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a page and a matching leaf document for each item. The page
    /// commit is the newest item's commit.
    pub async fn add_page(&self, items: Vec<CatalogLeafItem>) -> String {
        let mut guard = self.inner.lock().await;
        let url = format!("https://catalog.test/page{}.json", guard.pages.len());
        let commit = items
            .iter()
            .map(|item| item.commit_timestamp)
            .max()
            .unwrap_or_else(|| at(0));
        for item in &items {
            guard.leaves.insert(item.url.clone(), leaf_document(item));
        }
        guard.commit = Some(guard.commit.map_or(commit, |c| c.max(commit)));
        guard.pages.push(CatalogPage {
            url: url.clone(),
            commit_timestamp: commit,
            items,
        });
        url
    }

    pub async fn set_leaf(&self, url: &str, leaf: CatalogLeaf) {
        self.inner.lock().await.leaves.insert(url.to_string(), leaf);
    }
}

#[async_trait]
impl CatalogClient for FakeCatalog {
    async fn get_catalog_index(&self) -> Result<CatalogIndex> {
        let guard = self.inner.lock().await;
        Ok(CatalogIndex {
            commit_timestamp: guard.commit.unwrap_or_else(|| at(0)),
            pages: guard
                .pages
                .iter()
                .map(|page| CatalogPageItem {
                    url: page.url.clone(),
                    commit_timestamp: page.commit_timestamp,
                })
                .collect(),
        })
    }

    async fn get_catalog_page(&self, url: &str) -> Result<CatalogPage> {
        let guard = self.inner.lock().await;
        guard
            .pages
            .iter()
            .find(|page| page.url == url)
            .cloned()
            .ok_or_else(|| InsightsError::Transient(format!("no page at {url}")))
    }

    async fn get_catalog_leaf(
        &self,
        _leaf_type: CatalogLeafType,
        url: &str,
    ) -> Result<Option<CatalogLeaf>> {
        Ok(self.inner.lock().await.leaves.get(url).cloned())
    }
}

pub fn details(id: &str, version: &str, second: u32) -> CatalogLeafItem {
    item(CatalogLeafType::PackageDetails, id, version, second)
}

pub fn delete(id: &str, version: &str, second: u32) -> CatalogLeafItem {
    item(CatalogLeafType::PackageDelete, id, version, second)
}

fn item(
    leaf_type: CatalogLeafType,
    id: &str,
    version: &str,
    second: u32,
) -> CatalogLeafItem {
    CatalogLeafItem {
        url: format!(
            "https://catalog.test/data/{second}/{}.{}.json",
            id.to_lowercase(),
            version.to_lowercase()
        ),
        leaf_type,
        commit_timestamp: at(second),
        package_id: id.to_string(),
        package_version: version.to_string(),
    }
}

pub fn leaf_document(item: &CatalogLeafItem) -> CatalogLeaf {
    match item.leaf_type {
        CatalogLeafType::PackageDetails => {
            CatalogLeaf::PackageDetails(PackageDetailsLeaf {
                url: item.url.clone(),
                commit_timestamp: item.commit_timestamp,
                package_id: item.package_id.clone(),
                package_version: item.package_version.clone(),
                published: at(0),
                listed: Some(true),
                package_size: Some(2048),
                package_hash: None,
            })
        }
        CatalogLeafType::PackageDelete => CatalogLeaf::PackageDelete(PackageDeleteLeaf {
            url: item.url.clone(),
            commit_timestamp: item.commit_timestamp,
            package_id: item.package_id.clone(),
            package_version: item.package_version.clone(),
            published: at(0),
        }),
    }
}

/// A worker over in-memory collaborators.
pub struct TestHost {
    pub catalog: Arc<FakeCatalog>,
    pub tables: Arc<MemoryTableStore>,
    pub queue: Arc<MemoryQueue>,
    pub blobs: Arc<MemoryBlobStore>,
    pub worker: CatalogScanWorker,
    pub config: WorkerConfig,
}

impl TestHost {
    pub async fn new(catalog: Arc<FakeCatalog>, config: WorkerConfig) -> Result<Self> {
        let tables = Arc::new(MemoryTableStore::default());
        let queue = Arc::new(MemoryQueue::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let worker = CatalogScanWorker::new(
            config.clone(),
            catalog.clone(),
            tables.clone(),
            queue.clone(),
            blobs.clone(),
        );
        worker.service.initialize().await?;
        Ok(Self {
            catalog,
            tables,
            queue,
            blobs,
            worker,
            config,
        })
    }
}
