//! Queue payloads exchanged between workers.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CatalogIndexScanMessage {
    pub cursor_name: String,
    pub scan_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CatalogPageScanMessage {
    pub storage_suffix: String,
    pub scan_id: String,
    pub page_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CatalogLeafScanMessage {
    pub storage_suffix: String,
    pub scan_id: String,
    pub page_id: String,
    pub leaf_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CatalogLeafScanBatchMessage {
    pub storage_suffix: String,
    pub scan_id: String,
    pub page_id: String,
    pub leaf_ids: Vec<String>,
}

/// Every message a worker can receive. `BulkEnqueue` wraps a group of inner
/// messages that are re-sent individually when it is dispatched.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerMessage {
    CatalogIndexScan(CatalogIndexScanMessage),
    CatalogPageScan(CatalogPageScanMessage),
    CatalogLeafScan(CatalogLeafScanMessage),
    CatalogLeafScanBatch(CatalogLeafScanBatchMessage),
    BulkEnqueue {
        messages: Vec<WorkerMessage>,
        #[serde(default)]
        not_before_ms: u64,
    },
}

impl WorkerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerMessage::CatalogIndexScan(_) => "catalog_index_scan",
            WorkerMessage::CatalogPageScan(_) => "catalog_page_scan",
            WorkerMessage::CatalogLeafScan(_) => "catalog_leaf_scan",
            WorkerMessage::CatalogLeafScanBatch(_) => "catalog_leaf_scan_batch",
            WorkerMessage::BulkEnqueue { .. } => "bulk_enqueue",
        }
    }

    pub fn scan_id(&self) -> Option<&str> {
        match self {
            WorkerMessage::CatalogIndexScan(m) => Some(&m.scan_id),
            WorkerMessage::CatalogPageScan(m) => Some(&m.scan_id),
            WorkerMessage::CatalogLeafScan(m) => Some(&m.scan_id),
            WorkerMessage::CatalogLeafScanBatch(m) => Some(&m.scan_id),
            WorkerMessage::BulkEnqueue { .. } => None,
        }
    }
}

impl From<CatalogIndexScanMessage> for WorkerMessage {
    fn from(value: CatalogIndexScanMessage) -> Self {
        WorkerMessage::CatalogIndexScan(value)
    }
}

impl From<CatalogPageScanMessage> for WorkerMessage {
    fn from(value: CatalogPageScanMessage) -> Self {
        WorkerMessage::CatalogPageScan(value)
    }
}

impl From<CatalogLeafScanMessage> for WorkerMessage {
    fn from(value: CatalogLeafScanMessage) -> Self {
        WorkerMessage::CatalogLeafScan(value)
    }
}

impl From<CatalogLeafScanBatchMessage> for WorkerMessage {
    fn from(value: CatalogLeafScanBatchMessage) -> Self {
        WorkerMessage::CatalogLeafScanBatch(value)
    }
}
