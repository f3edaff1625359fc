//! Wires the scan engine together from its collaborators.

use std::fmt;
use std::sync::Arc;

use crate::catalog::CatalogClient;
use crate::config::WorkerConfig;
use crate::dispatcher::{WorkerMessageDispatcher, WorkerRuntime};
use crate::drivers::{CatalogScanDriverFactory, DriverDependencies};
use crate::processors::{
    CatalogIndexScanProcessor, CatalogLeafScanProcessor, CatalogPageScanProcessor,
};
use crate::queue::{MessageEnqueuer, QueueBackend};
use crate::results::BlobStore;
use crate::scan_service::CatalogScanService;
use crate::storage::{CatalogScanStorage, CursorStorage, TableStore};

/// A fully wired worker: the operator surface plus the message loop.
pub struct CatalogScanWorker {
    pub service: Arc<CatalogScanService>,
    pub dispatcher: Arc<WorkerMessageDispatcher>,
    pub runtime: WorkerRuntime,
}

impl fmt::Debug for CatalogScanWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogScanWorker")
            .field("service", &self.service)
            .field("runtime", &self.runtime)
            .finish()
    }
}

impl CatalogScanWorker {
    /// Builds a worker with the built-in drivers.
    pub fn new(
        config: WorkerConfig,
        client: Arc<dyn CatalogClient>,
        tables: Arc<dyn TableStore>,
        queue: Arc<dyn QueueBackend>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        let drivers = CatalogScanDriverFactory::new(
            &config,
            DriverDependencies {
                client: client.clone(),
                tables: tables.clone(),
                blobs,
            },
        );
        Self::with_drivers(config, client, tables, queue, drivers)
    }

    pub fn with_drivers(
        config: WorkerConfig,
        client: Arc<dyn CatalogClient>,
        tables: Arc<dyn TableStore>,
        queue: Arc<dyn QueueBackend>,
        drivers: CatalogScanDriverFactory,
    ) -> Self {
        let config = Arc::new(config);
        let drivers = Arc::new(drivers);
        let enqueuer = Arc::new(MessageEnqueuer::new(queue.clone(), &config.queue));
        let storage = CatalogScanStorage::new(tables.clone(), config.tables.clone());
        let cursors = CursorStorage::new(tables, &config.tables.cursor_table);

        let dispatcher = Arc::new(WorkerMessageDispatcher::new(
            CatalogIndexScanProcessor::new(
                client.clone(),
                drivers.clone(),
                enqueuer.clone(),
                storage.clone(),
                cursors.clone(),
                config.clone(),
            ),
            CatalogPageScanProcessor::new(
                client.clone(),
                drivers.clone(),
                enqueuer.clone(),
                storage.clone(),
                config.clone(),
            ),
            CatalogLeafScanProcessor::new(
                drivers.clone(),
                enqueuer.clone(),
                storage.clone(),
                config.clone(),
            ),
            enqueuer.clone(),
        ));
        let runtime = WorkerRuntime::new(queue, dispatcher.clone(), &config.queue);
        let service = Arc::new(CatalogScanService::new(
            client, drivers, enqueuer, storage, cursors, config,
        ));

        Self {
            service,
            dispatcher,
            runtime,
        }
    }
}
