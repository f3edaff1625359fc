//! Catalog documents as seen by the scan engine.
//!
//! Only the fields the engine needs are modelled; the HTTP client that fills
//! these in lives outside this workspace.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Commit timestamp of the first catalog commit. Scans without an explicit
/// lower bound start here (exclusive).
pub fn catalog_min() -> DateTime<Utc> {
    DateTime::from_timestamp(1_422_771_765, 848_849_600)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CatalogLeafType {
    PackageDetails,
    PackageDelete,
}

impl CatalogLeafType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogLeafType::PackageDetails => "PackageDetails",
            CatalogLeafType::PackageDelete => "PackageDelete",
        }
    }
}

impl fmt::Display for CatalogLeafType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CatalogLeafType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PackageDetails" => Ok(CatalogLeafType::PackageDetails),
            "PackageDelete" => Ok(CatalogLeafType::PackageDelete),
            other => Err(ModelError::UnknownState(other.to_string())),
        }
    }
}

/// Top-level catalog index: the latest commit plus every page.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CatalogIndex {
    pub commit_timestamp: DateTime<Utc>,
    pub pages: Vec<CatalogPageItem>,
}

impl CatalogIndex {
    /// Pages that may hold commits in `(min, max]`, ordered by commit
    /// timestamp. A page's commit timestamp is its newest item, so the first
    /// page at or beyond `max` is kept and everything after it dropped.
    pub fn pages_in_bounds(
        &self,
        min: DateTime<Utc>,
        max: DateTime<Utc>,
    ) -> Vec<CatalogPageItem> {
        let mut pages: Vec<CatalogPageItem> = self
            .pages
            .iter()
            .filter(|page| page.commit_timestamp > min)
            .cloned()
            .collect();
        pages.sort_by_key(|page| page.commit_timestamp);

        if let Some(upper) =
            pages.iter().position(|page| page.commit_timestamp >= max)
        {
            pages.truncate(upper + 1);
        }

        pages
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogPageItem {
    pub url: String,
    pub commit_timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CatalogPage {
    pub url: String,
    pub commit_timestamp: DateTime<Utc>,
    pub items: Vec<CatalogLeafItem>,
}

impl CatalogPage {
    /// Items committed in `(min, max]`, oldest first. Ties keep page order.
    pub fn leaves_in_bounds(
        &self,
        min: DateTime<Utc>,
        max: DateTime<Utc>,
    ) -> Vec<CatalogLeafItem> {
        let mut items: Vec<CatalogLeafItem> = self
            .items
            .iter()
            .filter(|item| {
                item.commit_timestamp > min && item.commit_timestamp <= max
            })
            .cloned()
            .collect();
        items.sort_by_key(|item| item.commit_timestamp);
        items
    }
}

/// One catalog event: a package version was published/edited or deleted.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CatalogLeafItem {
    pub url: String,
    pub leaf_type: CatalogLeafType,
    pub commit_timestamp: DateTime<Utc>,
    pub package_id: String,
    pub package_version: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PackageDetailsLeaf {
    pub url: String,
    pub commit_timestamp: DateTime<Utc>,
    pub package_id: String,
    pub package_version: String,
    pub published: DateTime<Utc>,
    #[serde(default)]
    pub listed: Option<bool>,
    #[serde(default)]
    pub package_size: Option<u64>,
    #[serde(default)]
    pub package_hash: Option<String>,
}

impl PackageDetailsLeaf {
    /// The catalog signals unlisting either with `listed: false` or with the
    /// 1900 publish date sentinel on older entries.
    pub fn is_listed(&self) -> bool {
        self.listed.unwrap_or_else(|| self.published.year() != 1900)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PackageDeleteLeaf {
    pub url: String,
    pub commit_timestamp: DateTime<Utc>,
    pub package_id: String,
    pub package_version: String,
    pub published: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CatalogLeaf {
    PackageDetails(PackageDetailsLeaf),
    PackageDelete(PackageDeleteLeaf),
}

impl CatalogLeaf {
    pub fn leaf_type(&self) -> CatalogLeafType {
        match self {
            CatalogLeaf::PackageDetails(_) => CatalogLeafType::PackageDetails,
            CatalogLeaf::PackageDelete(_) => CatalogLeafType::PackageDelete,
        }
    }

    pub fn commit_timestamp(&self) -> DateTime<Utc> {
        match self {
            CatalogLeaf::PackageDetails(leaf) => leaf.commit_timestamp,
            CatalogLeaf::PackageDelete(leaf) => leaf.commit_timestamp,
        }
    }
}
