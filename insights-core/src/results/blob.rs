use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use crate::error::Result;

/// Append-capable blob storage collaborator. Paths are `/` separated.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Appends to a blob, creating it when missing.
    async fn append(&self, path: &str, data: Bytes) -> Result<()>;

    async fn read(&self, path: &str) -> Result<Option<Bytes>>;

    async fn write(&self, path: &str, data: Bytes) -> Result<()>;

    /// Idempotent.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Paths starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

#[derive(Clone, Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn append(&self, path: &str, data: Bytes) -> Result<()> {
        let mut guard = self.blobs.lock().await;
        guard
            .entry(path.to_string())
            .or_default()
            .extend_from_slice(&data);
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Option<Bytes>> {
        let guard = self.blobs.lock().await;
        Ok(guard.get(path).map(|data| Bytes::copy_from_slice(data)))
    }

    async fn write(&self, path: &str, data: Bytes) -> Result<()> {
        let mut guard = self.blobs.lock().await;
        guard.insert(path.to_string(), data.to_vec());
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let mut guard = self.blobs.lock().await;
        guard.remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let guard = self.blobs.lock().await;
        Ok(guard
            .keys()
            .filter(|path| path.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_creates_then_extends() -> Result<()> {
        let blobs = MemoryBlobStore::new();
        blobs.append("c/temp/a.csv", Bytes::from_static(b"1\n")).await?;
        blobs.append("c/temp/a.csv", Bytes::from_static(b"2\n")).await?;
        blobs.write("c/other.csv", Bytes::from_static(b"x")).await?;

        assert_eq!(
            blobs.read("c/temp/a.csv").await?,
            Some(Bytes::from_static(b"1\n2\n"))
        );
        assert_eq!(blobs.list("c/temp/").await?, vec!["c/temp/a.csv"]);

        blobs.delete("c/temp/a.csv").await?;
        blobs.delete("c/temp/a.csv").await?;
        assert!(blobs.read("c/temp/a.csv").await?.is_none());
        Ok(())
    }
}
