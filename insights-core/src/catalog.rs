//! The catalog protocol client collaborator.

use async_trait::async_trait;
use insights_model::{CatalogIndex, CatalogLeaf, CatalogLeafType, CatalogPage};

use crate::error::Result;

/// Fetches catalog documents. Transport failures should surface as
/// [`InsightsError::Transient`](crate::error::InsightsError::Transient) so the
/// message is retried.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn get_catalog_index(&self) -> Result<CatalogIndex>;

    async fn get_catalog_page(&self, url: &str) -> Result<CatalogPage>;

    /// `None` when the leaf document no longer exists.
    async fn get_catalog_leaf(
        &self,
        leaf_type: CatalogLeafType,
        url: &str,
    ) -> Result<Option<CatalogLeaf>>;
}
