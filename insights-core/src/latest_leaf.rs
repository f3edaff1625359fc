//! Keeps the newest catalog event per package version.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt, stream};
use insights_model::{
    CatalogLeafItem, LatestPackageLeaf, lower_normalized_version,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{InsightsError, Result};
use crate::storage::{
    ETag, TableEntity, TableOperation, TableQuery, TableStore, decode,
};

/// A catalog leaf together with where it was found.
#[derive(Clone, Debug, PartialEq)]
pub struct LeafCandidate {
    pub item: CatalogLeafItem,
    pub page_url: String,
    pub page_rank: usize,
    pub leaf_rank: usize,
}

/// Maps candidates to the stored entity type of one latest-leaf table.
#[async_trait]
pub trait LatestLeafMapper: Send + Sync {
    type Entity: Serialize + DeserializeOwned + Send + Sync;

    fn table_name(&self) -> &str;

    fn partition_key(&self, lower_id: &str) -> String;

    fn row_key(&self, lower_version: &str) -> String {
        lower_version.to_string()
    }

    fn commit_timestamp(&self, entity: &Self::Entity) -> DateTime<Utc>;

    /// Builds the entity to store for a winning candidate.
    async fn map(
        &self,
        lower_id: &str,
        lower_version: &str,
        candidate: &LeafCandidate,
    ) -> Result<Self::Entity>;
}

/// Counts from one [`LatestLeafStorage::add_leaves`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LatestLeafSummary {
    pub inserted: usize,
    pub replaced: usize,
    pub skipped: usize,
}

#[derive(Clone)]
pub struct LatestLeafStorage {
    store: Arc<dyn TableStore>,
    max_batch_size: usize,
    map_concurrency: usize,
}

impl fmt::Debug for LatestLeafStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LatestLeafStorage")
            .field("store", &"TableStore")
            .field("max_batch_size", &self.max_batch_size)
            .field("map_concurrency", &self.map_concurrency)
            .finish()
    }
}

struct Planned<'a> {
    lower_version: String,
    candidate: &'a LeafCandidate,
    existing: Option<ETag>,
}

impl LatestLeafStorage {
    pub fn new(
        store: Arc<dyn TableStore>,
        max_batch_size: usize,
        map_concurrency: usize,
    ) -> Self {
        let max_batch_size = max_batch_size.min(store.max_batch_size()).max(1);
        Self {
            store,
            max_batch_size,
            map_concurrency: map_concurrency.max(1),
        }
    }

    pub async fn initialize<M: LatestLeafMapper>(&self, mapper: &M) -> Result<()> {
        self.store.create_table(mapper.table_name()).await
    }

    /// Stores the newest candidate per (id, version). Candidates may arrive
    /// in any order and may repeat; rows already holding an equal or newer
    /// commit are left alone.
    pub async fn add_leaves<M: LatestLeafMapper>(
        &self,
        mapper: &M,
        candidates: &[LeafCandidate],
    ) -> Result<LatestLeafSummary> {
        let mut by_id: BTreeMap<String, BTreeMap<String, &LeafCandidate>> =
            BTreeMap::new();
        for candidate in candidates {
            let lower_id = candidate.item.package_id.to_lowercase();
            let lower_version =
                lower_normalized_version(&candidate.item.package_version)?;
            let versions = by_id.entry(lower_id).or_default();
            match versions.get(&lower_version) {
                Some(current)
                    if current.item.commit_timestamp
                        >= candidate.item.commit_timestamp => {}
                _ => {
                    versions.insert(lower_version, candidate);
                }
            }
        }

        let mut summary = LatestLeafSummary::default();
        for (lower_id, versions) in by_id {
            self.add_package(mapper, &lower_id, versions, &mut summary)
                .await?;
        }
        Ok(summary)
    }

    async fn add_package<M: LatestLeafMapper>(
        &self,
        mapper: &M,
        lower_id: &str,
        versions: BTreeMap<String, &LeafCandidate>,
        summary: &mut LatestLeafSummary,
    ) -> Result<()> {
        let (Some(min), Some(max)) =
            (versions.keys().next(), versions.keys().next_back())
        else {
            return Ok(());
        };

        let partition_key = mapper.partition_key(lower_id);
        let query = TableQuery::partition(&partition_key)
            .rows(mapper.row_key(min), mapper.row_key(max));
        let mut stored = HashMap::new();
        for row in self.store.query(mapper.table_name(), &query).await? {
            let row_key = row.value.row_key.clone();
            let row = decode::<M::Entity>(row)?;
            stored.insert(row_key, (mapper.commit_timestamp(&row.value), row.etag));
        }

        let mut planned = Vec::new();
        for (lower_version, candidate) in versions {
            let row_key = mapper.row_key(&lower_version);
            match stored.remove(&row_key) {
                Some((timestamp, _)) if timestamp >= candidate.item.commit_timestamp => {
                    summary.skipped += 1;
                }
                Some((_, etag)) => planned.push(Planned {
                    lower_version,
                    candidate,
                    existing: Some(etag),
                }),
                None => planned.push(Planned {
                    lower_version,
                    candidate,
                    existing: None,
                }),
            }
        }

        let mapped: Vec<_> = planned
            .into_iter()
            .map(|plan| {
                let partition_key = partition_key.clone();
                async move {
                    let entity = mapper
                        .map(lower_id, &plan.lower_version, plan.candidate)
                        .await?;
                    let entity = TableEntity::from_record(
                        partition_key,
                        mapper.row_key(&plan.lower_version),
                        &entity,
                    )?;
                    Ok::<_, InsightsError>(match plan.existing {
                        Some(etag) => TableOperation::Replace(entity, etag),
                        None => TableOperation::Insert(entity),
                    })
                }
            })
            .collect();
        let operations: Vec<TableOperation> = stream::iter(mapped)
            .buffered(self.map_concurrency)
            .try_collect()
            .await?;

        for operation in &operations {
            match operation {
                TableOperation::Replace(..) => summary.replaced += 1,
                _ => summary.inserted += 1,
            }
        }
        let mut operations = operations.into_iter().peekable();
        while operations.peek().is_some() {
            let batch: Vec<_> = operations.by_ref().take(self.max_batch_size).collect();
            debug!(
                target: "catalog_scan::latest_leaf",
                partition_key = %partition_key,
                operations = batch.len(),
                "submitting latest leaf batch"
            );
            self.store.submit_batch(mapper.table_name(), batch).await?;
        }
        Ok(())
    }
}

/// Latest leaf per version under a scope prefix. Partition keys are
/// `{prefix}${lower_id}`.
#[derive(Clone, Debug)]
pub struct LatestPackageLeafMapper {
    table: String,
    prefix: String,
}

impl LatestPackageLeafMapper {
    pub fn new(table: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl LatestLeafMapper for LatestPackageLeafMapper {
    type Entity = LatestPackageLeaf;

    fn table_name(&self) -> &str {
        &self.table
    }

    fn partition_key(&self, lower_id: &str) -> String {
        format!("{}${lower_id}", self.prefix)
    }

    fn commit_timestamp(&self, entity: &LatestPackageLeaf) -> DateTime<Utc> {
        entity.commit_timestamp
    }

    async fn map(
        &self,
        lower_id: &str,
        lower_version: &str,
        candidate: &LeafCandidate,
    ) -> Result<LatestPackageLeaf> {
        Ok(LatestPackageLeaf {
            lower_id: lower_id.to_string(),
            lower_version: lower_version.to_string(),
            package_id: candidate.item.package_id.clone(),
            package_version: candidate.item.package_version.clone(),
            commit_timestamp: candidate.item.commit_timestamp,
            leaf_type: candidate.item.leaf_type,
            url: candidate.item.url.clone(),
            page_url: candidate.page_url.clone(),
            page_rank: candidate.page_rank,
            leaf_rank: candidate.leaf_rank,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use insights_model::CatalogLeafType;

    use super::*;
    use crate::storage::MemoryTableStore;

    fn candidate(id: &str, version: &str, second: u32) -> LeafCandidate {
        LeafCandidate {
            item: CatalogLeafItem {
                url: format!("https://example/{id}.{version}.{second}.json"),
                leaf_type: CatalogLeafType::PackageDetails,
                commit_timestamp: Utc
                    .with_ymd_and_hms(2020, 1, 1, 0, 0, second)
                    .unwrap(),
                package_id: id.into(),
                package_version: version.into(),
            },
            page_url: "https://example/page0.json".into(),
            page_rank: 0,
            leaf_rank: second as usize,
        }
    }

    async fn setup() -> Result<(Arc<MemoryTableStore>, LatestLeafStorage, LatestPackageLeafMapper)>
    {
        let store = Arc::new(MemoryTableStore::default());
        let storage = LatestLeafStorage::new(store.clone(), 100, 4);
        let mapper = LatestPackageLeafMapper::new("latest", "latest");
        storage.initialize(&mapper).await?;
        Ok((store, storage, mapper))
    }

    async fn stored(
        store: &MemoryTableStore,
        id: &str,
        version: &str,
    ) -> Result<Option<LatestPackageLeaf>> {
        let row = store.get("latest", &format!("latest${id}"), version).await?;
        row.map(|row| row.value.to_record()).transpose()
    }

    #[tokio::test]
    async fn duplicates_in_one_batch_collapse_to_newest() -> Result<()> {
        let (store, storage, mapper) = setup().await?;
        let summary = storage
            .add_leaves(
                &mapper,
                &[
                    candidate("Newtonsoft.Json", "1.0.0", 3),
                    candidate("newtonsoft.json", "1.0", 9),
                    candidate("NEWTONSOFT.JSON", "1.0.0.0", 5),
                ],
            )
            .await?;
        assert_eq!(summary.inserted, 1);

        let row = stored(&store, "newtonsoft.json", "1.0.0").await?.unwrap();
        assert_eq!(row.commit_timestamp.timestamp() % 60, 9);
        assert_eq!(row.package_version, "1.0");
        Ok(())
    }

    #[tokio::test]
    async fn order_of_submission_does_not_matter() -> Result<()> {
        for order in [[2u32, 7], [7, 2]] {
            let (store, storage, mapper) = setup().await?;
            for second in order {
                storage
                    .add_leaves(&mapper, &[candidate("A", "2.0.0-Beta", second)])
                    .await?;
            }
            let row = stored(&store, "a", "2.0.0-beta").await?.unwrap();
            assert_eq!(row.commit_timestamp.timestamp() % 60, 7);
        }
        Ok(())
    }

    #[tokio::test]
    async fn equal_or_newer_rows_are_not_rewritten() -> Result<()> {
        let (store, storage, mapper) = setup().await?;
        storage.add_leaves(&mapper, &[candidate("A", "1.0.0", 5)]).await?;
        let before = store.get("latest", "latest$a", "1.0.0").await?.unwrap();

        let summary = storage
            .add_leaves(
                &mapper,
                &[candidate("A", "1.0.0", 5), candidate("A", "1.0.0", 4)],
            )
            .await?;
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.inserted + summary.replaced, 0);

        let after = store.get("latest", "latest$a", "1.0.0").await?.unwrap();
        assert_eq!(before.etag, after.etag);
        Ok(())
    }

    #[tokio::test]
    async fn writes_are_batched_per_partition() -> Result<()> {
        let (store, storage, mapper) = setup().await?;
        let many: Vec<_> = (0..250)
            .map(|minor| {
                let mut c = candidate("A", &format!("1.{minor}.0"), 1);
                c.leaf_rank = minor;
                c
            })
            .chain([candidate("B", "1.0.0", 1)])
            .collect();
        let summary = storage.add_leaves(&mapper, &many).await?;
        assert_eq!(summary.inserted, 251);
        assert_eq!(store.batch_sizes().await, vec![100, 100, 50, 1]);
        Ok(())
    }
}
