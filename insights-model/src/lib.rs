//! Core data model definitions shared across the catalog insights crates.
#![allow(missing_docs)]

pub use ::chrono;

pub mod catalog;
pub mod error;
pub mod ids;
pub mod latest;
pub mod messages;
pub mod scan;
pub mod version;

pub use catalog::{
    CatalogIndex, CatalogLeaf, CatalogLeafItem, CatalogLeafType,
    CatalogPage, CatalogPageItem, PackageDeleteLeaf, PackageDetailsLeaf, catalog_min,
};
pub use error::{ModelError, Result as ModelResult};
pub use ids::{ScanId, padded_id, padded_width};
pub use latest::{LatestPackageLeaf, PackageVersionEntity};
pub use messages::{
    CatalogIndexScanMessage, CatalogLeafScanBatchMessage,
    CatalogLeafScanMessage, CatalogPageScanMessage, WorkerMessage,
};
pub use scan::{
    CatalogIndexScan, CatalogIndexScanResult, CatalogLeafScan,
    CatalogPageScan, CatalogPageScanResult, CatalogScanDriverType,
    CatalogScanState, Cursor,
};
pub use version::{lower_normalized_version, normalize_version};
