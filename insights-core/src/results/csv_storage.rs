use std::any::type_name;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::blob::BlobStore;
use crate::error::{InsightsError, Result};

/// A row of driver output.
pub trait CsvRecord:
    Serialize + DeserializeOwned + Clone + Send + Sync + 'static
{
    /// Picks the bucket. Rows for the same package share one.
    fn bucket_key(&self) -> String;

    /// Compaction keeps one row per identity.
    fn identity(&self) -> String {
        self.bucket_key()
    }

    /// Newer rows win during compaction.
    fn commit_timestamp(&self) -> DateTime<Utc>;
}

/// Bucket index: the first eight bytes of SHA-256 over the key, read as a
/// little-endian integer, modulo the bucket count.
pub fn bucket_for(key: &str, bucket_count: u32) -> u32 {
    let digest = Sha256::digest(key.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_le_bytes(head) % u64::from(bucket_count.max(1))) as u32
}

/// Appends records into per-scan temporary buckets and compacts them into
/// the container's long-lived `compact_{bucket}.csv` blobs.
pub struct CsvResultStorage<R> {
    blobs: Arc<dyn BlobStore>,
    container: String,
    bucket_count: u32,
    _record: PhantomData<fn() -> R>,
}

impl<R> fmt::Debug for CsvResultStorage<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsvResultStorage")
            .field("record", &type_name::<R>())
            .field("container", &self.container)
            .field("bucket_count", &self.bucket_count)
            .finish()
    }
}

impl<R: CsvRecord> CsvResultStorage<R> {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        container: impl Into<String>,
        bucket_count: u32,
    ) -> Self {
        Self {
            blobs,
            container: container.into(),
            bucket_count: bucket_count.max(1),
            _record: PhantomData,
        }
    }

    pub fn temp_path(&self, storage_suffix: &str, bucket: u32) -> String {
        format!("{}/{bucket}.csv", self.temp_prefix(storage_suffix))
    }

    pub fn compact_path(&self, bucket: u32) -> String {
        format!("{}/compact_{bucket}.csv", self.container)
    }

    fn temp_prefix(&self, storage_suffix: &str) -> String {
        format!("{}/temp/{storage_suffix}", self.container)
    }

    pub async fn append(&self, storage_suffix: &str, records: &[R]) -> Result<()> {
        let mut buckets: BTreeMap<u32, Vec<&R>> = BTreeMap::new();
        for record in records {
            buckets
                .entry(bucket_for(&record.bucket_key(), self.bucket_count))
                .or_default()
                .push(record);
        }

        for (bucket, records) in buckets {
            let data = write_rows(records, false)?;
            self.blobs
                .append(&self.temp_path(storage_suffix, bucket), data)
                .await?;
        }
        Ok(())
    }

    /// Merges every temporary bucket of a scan into its compacted blob and
    /// removes the temporary blobs. Running it again is a no-op.
    pub async fn compact(&self, storage_suffix: &str) -> Result<usize> {
        let prefix = format!("{}/", self.temp_prefix(storage_suffix));
        let paths = self.blobs.list(&prefix).await?;
        let mut compacted = 0;

        for path in paths {
            let bucket = path
                .strip_prefix(&prefix)
                .and_then(|name| name.strip_suffix(".csv"))
                .and_then(|name| name.parse::<u32>().ok())
                .ok_or_else(|| {
                    InsightsError::Invariant(format!("unexpected temp blob {path}"))
                })?;

            let Some(temp) = self.blobs.read(&path).await? else {
                continue;
            };
            let mut merged: HashMap<String, R> = HashMap::new();
            for record in self.read_bucket(bucket).await? {
                keep_newest(&mut merged, record);
            }
            for record in read_rows::<R>(&temp, false)? {
                keep_newest(&mut merged, record);
            }

            let mut rows: Vec<R> = merged.into_values().collect();
            rows.sort_by(|a, b| {
                a.bucket_key()
                    .cmp(&b.bucket_key())
                    .then(a.commit_timestamp().cmp(&b.commit_timestamp()))
            });
            debug!(
                target: "catalog_scan::results",
                container = %self.container,
                bucket,
                rows = rows.len(),
                "compacted bucket"
            );
            self.blobs
                .write(&self.compact_path(bucket), write_rows(rows.iter(), true)?)
                .await?;
            self.blobs.delete(&path).await?;
            compacted += 1;
        }

        info!(
            target: "catalog_scan::results",
            container = %self.container,
            storage_suffix,
            buckets = compacted,
            "csv compaction finished"
        );
        Ok(compacted)
    }

    /// Rows of one compacted bucket.
    pub async fn read_bucket(&self, bucket: u32) -> Result<Vec<R>> {
        match self.blobs.read(&self.compact_path(bucket)).await? {
            Some(data) => read_rows(&data, true),
            None => Ok(Vec::new()),
        }
    }

    /// Every compacted row across all buckets.
    pub async fn read_all(&self) -> Result<Vec<R>> {
        let prefix = format!("{}/compact_", self.container);
        let mut rows = Vec::new();
        for path in self.blobs.list(&prefix).await? {
            if let Some(data) = self.blobs.read(&path).await? {
                rows.extend(read_rows::<R>(&data, true)?);
            }
        }
        Ok(rows)
    }
}

fn keep_newest<R: CsvRecord>(merged: &mut HashMap<String, R>, record: R) {
    let key = record.identity();
    match merged.get(&key) {
        Some(existing) if existing.commit_timestamp() > record.commit_timestamp() => {}
        _ => {
            merged.insert(key, record);
        }
    }
}

fn write_rows<'a, R: CsvRecord>(
    records: impl IntoIterator<Item = &'a R>,
    headers: bool,
) -> Result<Bytes> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(headers)
        .from_writer(Vec::new());
    for record in records {
        writer.serialize(record)?;
    }
    let data = writer
        .into_inner()
        .map_err(|err| InsightsError::Internal(err.to_string()))?;
    Ok(Bytes::from(data))
}

fn read_rows<R: CsvRecord>(data: &[u8], headers: bool) -> Result<Vec<R>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(headers)
        .from_reader(data);
    let mut rows = Vec::new();
    for row in reader.deserialize::<R>() {
        rows.push(row?);
    }
    Ok(rows)
}
