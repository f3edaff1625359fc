//! Worker configuration.
//!
//! A single immutable [`WorkerConfig`] is built at startup (see the
//! `insights-config` crate for the loader) and handed to every component's
//! constructor. Every section carries defaults so partial configuration files
//! are accepted.

use std::collections::HashMap;
use std::time::Duration;

use insights_model::CatalogScanDriverType;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Table names and storage batching limits.
    pub tables: TableConfig,
    /// Queue packing and redelivery policy.
    pub queue: QueueConfig,
    /// Scan state machine timings and fan-out sizes.
    pub scan: ScanConfig,
    /// Driver selection and concurrency.
    pub drivers: DriverConfig,
    /// Bucketed CSV output.
    pub results: ResultConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    pub index_scan_table: String,
    /// Page scan tables are named `{prefix}{storage_suffix}`.
    pub page_scan_table_prefix: String,
    /// Leaf scan tables are named `{prefix}{storage_suffix}`.
    pub leaf_scan_table_prefix: String,
    pub cursor_table: String,
    pub latest_leaf_table: String,
    pub package_version_table: String,
    /// Storage-imposed ceiling on operations per transactional batch.
    pub max_batch_size: usize,
    /// Rows read when computing a count lower bound.
    pub count_lower_bound_probe: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            index_scan_table: "catalogindexscans".into(),
            page_scan_table_prefix: "catalogpagescans".into(),
            leaf_scan_table_prefix: "catalogleafscans".into(),
            cursor_table: "cursors".into(),
            latest_leaf_table: "latestpackageleaves".into(),
            package_version_table: "packageversions".into(),
            max_batch_size: 100,
            count_lower_bound_probe: 20,
        }
    }
}

impl TableConfig {
    pub fn page_scan_table(&self, storage_suffix: &str) -> String {
        format!("{}{}", self.page_scan_table_prefix, storage_suffix)
    }

    pub fn leaf_scan_table(&self, storage_suffix: &str) -> String {
        format!("{}{}", self.leaf_scan_table_prefix, storage_suffix)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Enqueues of at least this many messages are packed into bulk messages.
    pub bulk_enqueue_threshold: usize,
    /// Inner messages carried by one bulk message.
    pub bulk_enqueue_size: usize,
    /// Deliveries after which a failing message is dead-lettered.
    pub max_dequeue_count: u32,
    /// Visibility delay applied when a message is abandoned for retry.
    pub retry_backoff_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            bulk_enqueue_threshold: 10,
            bulk_enqueue_size: 100,
            max_dequeue_count: 5,
            retry_backoff_ms: 1_000,
        }
    }
}

impl QueueConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Delay before an index or page scan in `Waiting` checks its children again.
    pub poll_delay_ms: u64,
    /// Delay before failing a message whose index scan row is not visible yet.
    pub missing_scan_delay_ms: u64,
    /// Delay before a leaf that returned `TryAgainLater` is retried.
    pub try_again_later_delay_ms: u64,
    /// Leaf attempts allowed before the leaf is treated as poisoned.
    pub max_leaf_attempts: u32,
    /// Leaves per batch message for batch drivers.
    pub leaf_batch_size: usize,
    /// Completed index scans retained per cursor.
    pub old_index_scans_to_keep: usize,
    /// Partition prefix used by the latest-leaf driver.
    pub latest_leaf_prefix: String,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            poll_delay_ms: 10_000,
            missing_scan_delay_ms: 10_000,
            try_again_later_delay_ms: 60_000,
            max_leaf_attempts: 10,
            leaf_batch_size: 30,
            old_index_scans_to_keep: 9,
            latest_leaf_prefix: "latest".into(),
        }
    }
}

impl ScanConfig {
    pub fn poll_delay(&self) -> Duration {
        Duration::from_millis(self.poll_delay_ms)
    }

    pub fn missing_scan_delay(&self) -> Duration {
        Duration::from_millis(self.missing_scan_delay_ms)
    }

    pub fn try_again_later_delay(&self) -> Duration {
        Duration::from_millis(self.try_again_later_delay_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Wrap every non-batch driver in the batch adapter.
    pub run_all_drivers_as_batch: bool,
    /// Per-type override of `run_all_drivers_as_batch`.
    pub batch_overrides: HashMap<CatalogScanDriverType, bool>,
    /// Leaves processed concurrently by the non-batch adapter.
    pub batch_concurrency: usize,
    /// Catalog documents fetched concurrently by batch drivers.
    pub fetch_concurrency: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            run_all_drivers_as_batch: false,
            batch_overrides: HashMap::new(),
            batch_concurrency: 8,
            fetch_concurrency: 8,
        }
    }
}

impl DriverConfig {
    pub fn run_as_batch(&self, driver_type: CatalogScanDriverType) -> bool {
        self.batch_overrides
            .get(&driver_type)
            .copied()
            .unwrap_or(self.run_all_drivers_as_batch)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultConfig {
    pub bucket_count: u32,
    pub leaf_item_container: String,
    pub package_details_container: String,
}

impl Default for ResultConfig {
    fn default() -> Self {
        Self {
            bucket_count: 1_000,
            leaf_item_container: "catalogleafitems".into(),
            package_details_container: "packagedetails".into(),
        }
    }
}
