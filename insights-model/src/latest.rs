use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::CatalogLeafType;

/// The newest catalog event seen for one package version within a tracking
/// scope. Keyed by lower-cased id and lower-cased normalised version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatestPackageLeaf {
    pub lower_id: String,
    pub lower_version: String,
    pub package_id: String,
    pub package_version: String,
    pub commit_timestamp: DateTime<Utc>,
    pub leaf_type: CatalogLeafType,
    pub url: String,
    pub page_url: String,
    pub page_rank: usize,
    pub leaf_rank: usize,
}

/// Per-version package state loaded from the catalog leaf document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PackageVersionEntity {
    pub lower_id: String,
    pub lower_version: String,
    pub package_id: String,
    pub package_version: String,
    pub commit_timestamp: DateTime<Utc>,
    pub leaf_type: CatalogLeafType,
    pub url: String,
    #[serde(default)]
    pub published: Option<DateTime<Utc>>,
    #[serde(default)]
    pub listed: Option<bool>,
    #[serde(default)]
    pub package_size: Option<u64>,
}

impl PackageVersionEntity {
    pub fn is_deleted(&self) -> bool {
        self.leaf_type == CatalogLeafType::PackageDelete
    }
}
