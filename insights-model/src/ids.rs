use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Length of the unique suffix carried by every scan id. The suffix doubles
/// as the storage suffix for the scan's child tables.
const UNIQUE_LEN: usize = 12;

/// Time-ordered scan identifier. Newer scans sort *first* under ordinal string
/// comparison so "latest N" queries can read the head of a partition.
#[derive(
    Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ScanId {
    value: String,
    unique: String,
}

impl ScanId {
    pub fn new() -> Self {
        Self::descending_at(Utc::now())
    }

    pub fn descending_at(at: DateTime<Utc>) -> Self {
        let millis = u64::try_from(at.timestamp_millis()).unwrap_or_default();
        let mut unique = Uuid::new_v4().simple().to_string();
        unique.truncate(UNIQUE_LEN);
        Self {
            value: format!("{:016x}{unique}", u64::MAX - millis),
            unique,
        }
    }

    /// Rebuild an id previously produced by [`ScanId::new`].
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.len() != 16 + UNIQUE_LEN || !raw.is_ascii() {
            return None;
        }
        let (ticks, unique) = raw.split_at(16);
        u64::from_str_radix(ticks, 16).ok()?;
        Some(Self {
            value: raw.to_string(),
            unique: unique.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn unique(&self) -> &str {
        &self.unique
    }
}

impl Default for ScanId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Number of digits needed to render `count - 1`, so that every zero-padded
/// id in `0..count` has the same width.
pub fn padded_width(count: usize) -> usize {
    count.saturating_sub(1).to_string().len()
}

pub fn padded_id(index: usize, width: usize) -> String {
    format!("{index:0width$}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn newer_scan_ids_sort_first() {
        let now = Utc::now();
        let older = ScanId::descending_at(now - Duration::seconds(5));
        let newer = ScanId::descending_at(now);
        assert!(newer.as_str() < older.as_str());
        assert_eq!(newer.unique().len(), UNIQUE_LEN);
    }

    #[test]
    fn parse_round_trips_unique_suffix() {
        let id = ScanId::new();
        let parsed = ScanId::parse(id.as_str()).expect("valid id");
        assert_eq!(parsed, id);
        assert!(ScanId::parse("not-a-scan-id").is_none());
    }

    #[test]
    fn padded_ids_sort_like_their_indexes() {
        for count in [1usize, 2, 9, 10, 11, 99, 100, 101, 1_000, 10_001] {
            let width = padded_width(count);
            let ids: Vec<String> =
                (0..count).map(|i| padded_id(i, width)).collect();
            let mut sorted = ids.clone();
            sorted.sort();
            assert_eq!(ids, sorted, "ordering broke for count {count}");
            assert!(ids.iter().all(|id| id.len() == width));
        }
    }

    #[test]
    fn width_matches_digits_of_last_index() {
        assert_eq!(padded_width(0), 1);
        assert_eq!(padded_width(1), 1);
        assert_eq!(padded_width(10), 1);
        assert_eq!(padded_width(11), 2);
        assert_eq!(padded_width(10_000), 4);
        assert_eq!(padded_width(10_001), 5);
    }
}
