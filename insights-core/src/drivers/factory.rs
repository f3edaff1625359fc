use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use insights_model::CatalogScanDriverType;
use tracing::debug;

use super::{
    CatalogLeafItemToCsvDriver, CatalogLeafScanBatchDriver,
    CatalogLeafScanNonBatchDriver, LoadLatestPackageLeafDriver,
    LoadPackageVersionDriver, NonBatchDriverAdapter, PackageDetailsToCsvDriver,
    PackageVersionMapper, ResolvedDriver,
};
use crate::catalog::CatalogClient;
use crate::config::{DriverConfig, WorkerConfig};
use crate::error::{InsightsError, Result};
use crate::latest_leaf::{LatestLeafStorage, LatestPackageLeafMapper};
use crate::results::{BlobStore, CsvResultStorage};
use crate::storage::TableStore;

/// Collaborators shared by the built-in drivers.
#[derive(Clone)]
pub struct DriverDependencies {
    pub client: Arc<dyn CatalogClient>,
    pub tables: Arc<dyn TableStore>,
    pub blobs: Arc<dyn BlobStore>,
}

impl fmt::Debug for DriverDependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverDependencies")
            .field("client", &"CatalogClient")
            .field("tables", &"TableStore")
            .field("blobs", &"BlobStore")
            .finish()
    }
}

/// Resolves a scan type to its driver. The mapping is fixed when the factory
/// is built; batch wrapping is decided there too.
#[derive(Clone)]
pub struct CatalogScanDriverFactory {
    drivers: HashMap<CatalogScanDriverType, ResolvedDriver>,
    config: DriverConfig,
}

impl fmt::Debug for CatalogScanDriverFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut registered: Vec<_> = self.drivers.keys().map(|t| t.as_str()).collect();
        registered.sort_unstable();
        f.debug_struct("CatalogScanDriverFactory")
            .field("registered", &registered)
            .field("config", &self.config)
            .finish()
    }
}

impl CatalogScanDriverFactory {
    /// A factory with no drivers. Use the `register_*` methods to fill it.
    pub fn empty(config: &DriverConfig) -> Self {
        Self {
            drivers: HashMap::new(),
            config: config.clone(),
        }
    }

    /// A factory with every built-in driver.
    pub fn new(config: &WorkerConfig, deps: DriverDependencies) -> Self {
        let mut factory = Self::empty(&config.drivers);
        let latest = LatestLeafStorage::new(
            deps.tables.clone(),
            config.tables.max_batch_size,
            config.drivers.fetch_concurrency,
        );

        for driver_type in CatalogScanDriverType::all().iter().copied() {
            match driver_type {
                CatalogScanDriverType::LoadLatestPackageLeaf => {
                    factory.register_non_batch(
                        driver_type,
                        Arc::new(LoadLatestPackageLeafDriver::new(
                            deps.client.clone(),
                            latest.clone(),
                            LatestPackageLeafMapper::new(
                                &config.tables.latest_leaf_table,
                                &config.scan.latest_leaf_prefix,
                            ),
                        )),
                    );
                }
                CatalogScanDriverType::CatalogLeafItemToCsv => {
                    factory.register_non_batch(
                        driver_type,
                        Arc::new(CatalogLeafItemToCsvDriver::new(CsvResultStorage::new(
                            deps.blobs.clone(),
                            &config.results.leaf_item_container,
                            config.results.bucket_count,
                        ))),
                    );
                }
                CatalogScanDriverType::PackageDetailsToCsv => {
                    factory.register_non_batch(
                        driver_type,
                        Arc::new(PackageDetailsToCsvDriver::new(
                            deps.client.clone(),
                            CsvResultStorage::new(
                                deps.blobs.clone(),
                                &config.results.package_details_container,
                                config.results.bucket_count,
                            ),
                        )),
                    );
                }
                CatalogScanDriverType::LoadPackageVersion => {
                    factory.register_batch(
                        driver_type,
                        Arc::new(LoadPackageVersionDriver::new(
                            latest.clone(),
                            PackageVersionMapper::new(
                                &config.tables.package_version_table,
                                deps.client.clone(),
                            ),
                        )),
                    );
                }
            }
        }
        factory
    }

    /// Registers a natively batch driver. It is always resolved as batch.
    pub fn register_batch(
        &mut self,
        driver_type: CatalogScanDriverType,
        driver: Arc<dyn CatalogLeafScanBatchDriver>,
    ) {
        self.drivers
            .insert(driver_type, ResolvedDriver::Batch(driver));
    }

    /// Registers a non-batch driver, wrapping it in the batch adapter when
    /// the configuration asks for this type to run as batch.
    pub fn register_non_batch<D>(&mut self, driver_type: CatalogScanDriverType, driver: Arc<D>)
    where
        D: CatalogLeafScanNonBatchDriver + 'static,
    {
        let resolved = if self.config.run_as_batch(driver_type) {
            debug!(
                target: "catalog_scan::drivers",
                driver = %driver_type,
                "wrapping non-batch driver for batch execution"
            );
            ResolvedDriver::Batch(Arc::new(NonBatchDriverAdapter::new(
                driver,
                self.config.batch_concurrency,
            )))
        } else {
            ResolvedDriver::NonBatch(driver)
        };
        self.drivers.insert(driver_type, resolved);
    }

    pub fn resolve(&self, driver_type: CatalogScanDriverType) -> Result<ResolvedDriver> {
        self.drivers.get(&driver_type).cloned().ok_or_else(|| {
            InsightsError::Unsupported(format!(
                "catalog scan driver type '{driver_type}' is not supported"
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MockCatalogClient;
    use crate::results::MemoryBlobStore;
    use crate::storage::MemoryTableStore;

    fn deps() -> DriverDependencies {
        DriverDependencies {
            client: Arc::new(MockCatalogClient::new()),
            tables: Arc::new(MemoryTableStore::default()),
            blobs: Arc::new(MemoryBlobStore::new()),
        }
    }

    #[test]
    fn native_batch_drivers_stay_batch() -> Result<()> {
        let factory = CatalogScanDriverFactory::new(&WorkerConfig::default(), deps());
        assert!(factory.resolve(CatalogScanDriverType::LoadPackageVersion)?.is_batch());
        assert!(
            !factory
                .resolve(CatalogScanDriverType::PackageDetailsToCsv)?
                .is_batch()
        );
        Ok(())
    }

    #[test]
    fn global_flag_and_overrides_pick_the_adapter() -> Result<()> {
        let mut config = WorkerConfig::default();
        config.drivers.run_all_drivers_as_batch = true;
        config
            .drivers
            .batch_overrides
            .insert(CatalogScanDriverType::CatalogLeafItemToCsv, false);
        let factory = CatalogScanDriverFactory::new(&config, deps());

        assert!(
            factory
                .resolve(CatalogScanDriverType::PackageDetailsToCsv)?
                .is_batch()
        );
        assert!(
            !factory
                .resolve(CatalogScanDriverType::CatalogLeafItemToCsv)?
                .is_batch()
        );
        Ok(())
    }

    #[test]
    fn unregistered_types_are_unsupported() {
        let factory = CatalogScanDriverFactory::empty(&DriverConfig::default());
        let err = factory
            .resolve(CatalogScanDriverType::LoadLatestPackageLeaf)
            .unwrap_err();
        assert!(matches!(err, InsightsError::Unsupported(_)));
        assert!(!err.is_retryable());
    }
}
