use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogLeafItem, CatalogLeafType};
use crate::error::{ModelError, Result};
use crate::ids::ScanId;

/// Durable watermark: every catalog commit at or before `value` has been
/// processed by the scans owning this cursor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub name: String,
    pub value: DateTime<Utc>,
}

/// Lifecycle shared by index and page scans. The order of the variants is the
/// order of the state machine; a scan never moves backwards.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum CatalogScanState {
    Created,
    Expanding,
    Enqueuing,
    Waiting,
    Complete,
}

impl CatalogScanState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogScanState::Created => "Created",
            CatalogScanState::Expanding => "Expanding",
            CatalogScanState::Enqueuing => "Enqueuing",
            CatalogScanState::Waiting => "Waiting",
            CatalogScanState::Complete => "Complete",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CatalogScanState::Complete)
    }

    /// Move to `next`, refusing to regress.
    pub fn advance(&mut self, next: CatalogScanState) -> Result<()> {
        if next < *self {
            return Err(ModelError::StateRegression {
                from: self.to_string(),
                to: next.to_string(),
            });
        }
        *self = next;
        Ok(())
    }
}

impl fmt::Display for CatalogScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of scan drivers. Resolution to an implementation happens once in
/// the driver factory; adding a variant forces every match to be revisited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CatalogScanDriverType {
    LoadLatestPackageLeaf,
    CatalogLeafItemToCsv,
    PackageDetailsToCsv,
    LoadPackageVersion,
}

impl CatalogScanDriverType {
    pub fn all() -> &'static [Self] {
        &[
            CatalogScanDriverType::LoadLatestPackageLeaf,
            CatalogScanDriverType::CatalogLeafItemToCsv,
            CatalogScanDriverType::PackageDetailsToCsv,
            CatalogScanDriverType::LoadPackageVersion,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogScanDriverType::LoadLatestPackageLeaf => {
                "LoadLatestPackageLeaf"
            }
            CatalogScanDriverType::CatalogLeafItemToCsv => {
                "CatalogLeafItemToCsv"
            }
            CatalogScanDriverType::PackageDetailsToCsv => "PackageDetailsToCsv",
            CatalogScanDriverType::LoadPackageVersion => "LoadPackageVersion",
        }
    }

    /// Name of the cursor that tracks this driver's progress.
    pub fn cursor_name(&self) -> String {
        format!("CatalogScan-{}", self.as_str())
    }
}

impl fmt::Display for CatalogScanDriverType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CatalogScanDriverType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ModelError::UnknownDriverType(s.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CatalogIndexScanResult {
    /// Fan out into one page scan per catalog page.
    Expand,
    /// The driver handled the whole window itself.
    Processed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CatalogPageScanResult {
    /// Fan out into one leaf scan per catalog item.
    Expand,
    /// The driver handled the whole page itself.
    Processed,
}

/// One attempted scan window `(min, max]` for a cursor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CatalogIndexScan {
    pub scan_id: String,
    pub storage_suffix: String,
    pub cursor_name: String,
    pub driver_type: CatalogScanDriverType,
    #[serde(default)]
    pub driver_parameters: Option<String>,
    pub state: CatalogScanState,
    pub min: Option<DateTime<Utc>>,
    pub max: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
}

impl CatalogIndexScan {
    pub fn new(
        scan_id: &ScanId,
        driver_type: CatalogScanDriverType,
        driver_parameters: Option<String>,
        min: Option<DateTime<Utc>>,
        max: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            scan_id: scan_id.to_string(),
            storage_suffix: scan_id.unique().to_string(),
            cursor_name: driver_type.cursor_name(),
            driver_type,
            driver_parameters,
            state: CatalogScanState::Created,
            min,
            max,
            created: Utc::now(),
        }
    }

    /// Finalised bounds, available once the scan has left `Created`.
    pub fn bounds(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        self.min.zip(self.max)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CatalogPageScan {
    pub storage_suffix: String,
    pub scan_id: String,
    pub page_id: String,
    pub url: String,
    pub rank: usize,
    pub driver_type: CatalogScanDriverType,
    #[serde(default)]
    pub driver_parameters: Option<String>,
    pub state: CatalogScanState,
    pub min: DateTime<Utc>,
    pub max: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CatalogLeafScan {
    pub storage_suffix: String,
    pub scan_id: String,
    pub page_id: String,
    pub leaf_id: String,
    pub url: String,
    pub page_url: String,
    pub leaf_type: CatalogLeafType,
    pub package_id: String,
    pub package_version: String,
    pub commit_timestamp: DateTime<Utc>,
    pub driver_type: CatalogScanDriverType,
    #[serde(default)]
    pub driver_parameters: Option<String>,
    pub min: DateTime<Utc>,
    pub max: DateTime<Utc>,
    #[serde(default)]
    pub attempt_count: u32,
}

impl CatalogLeafScan {
    pub fn partition_key(scan_id: &str, page_id: &str) -> String {
        format!("{scan_id}-{page_id}")
    }

    pub fn to_leaf_item(&self) -> CatalogLeafItem {
        CatalogLeafItem {
            url: self.url.clone(),
            leaf_type: self.leaf_type,
            commit_timestamp: self.commit_timestamp,
            package_id: self.package_id.clone(),
            package_version: self.package_version.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_never_regresses() {
        let mut state = CatalogScanState::Waiting;
        assert!(state.advance(CatalogScanState::Expanding).is_err());
        assert_eq!(state, CatalogScanState::Waiting);
        state.advance(CatalogScanState::Complete).unwrap();
        assert!(state.is_terminal());
    }

    #[test]
    fn driver_type_parses_case_insensitively() {
        let parsed: CatalogScanDriverType =
            "loadlatestpackageleaf".parse().unwrap();
        assert_eq!(parsed, CatalogScanDriverType::LoadLatestPackageLeaf);
        assert_eq!(
            parsed.cursor_name(),
            "CatalogScan-LoadLatestPackageLeaf"
        );
        assert!("Nope".parse::<CatalogScanDriverType>().is_err());
    }

    #[test]
    fn new_index_scan_uses_unique_part_as_storage_suffix() {
        let id = ScanId::new();
        let scan = CatalogIndexScan::new(
            &id,
            CatalogScanDriverType::CatalogLeafItemToCsv,
            None,
            None,
            None,
        );
        assert_eq!(scan.storage_suffix, id.unique());
        assert_eq!(scan.state, CatalogScanState::Created);
        assert!(scan.bounds().is_none());
    }
}
