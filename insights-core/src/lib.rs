//! # Insights Core
//!
//! The catalog scan engine. A scan walks the package catalog between two
//! commit timestamps and feeds every catalog leaf to a driver.
//!
//! ## Overview
//!
//! - **Scan state machines**: index, page and leaf processors that advance
//!   persisted scan rows one queue message at a time
//! - **Storage accessor**: typed access to scan rows and cursors over a
//!   table store with entity tags
//! - **Message enqueuer**: bulk-packing producer for worker messages
//! - **Driver registry**: resolves a scan type to a batch or non-batch
//!   driver, adapting non-batch drivers on request
//! - **Latest-leaf tracker**: keeps the newest catalog event per package
//!   version
//!
//! ## Architecture
//!
//! - [`storage`]: table store trait, in-memory store, scan and cursor storage
//! - [`queue`]: queue backend trait, in-memory queue, [`MessageEnqueuer`]
//! - [`drivers`]: driver traits, built-in drivers and the factory
//! - [`processors`]: the three state machines
//! - [`latest_leaf`]: latest-leaf storage and mappers
//! - [`results`]: blob storage and bucketed CSV output
//! - [`scan_service`]: start, requeue and inspect scans
//! - [`dispatcher`]: message routing and the worker loop
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use insights_core::{
//!     CatalogClient, CatalogScanWorker, MemoryBlobStore, MemoryQueue,
//!     MemoryTableStore, WorkerConfig,
//! };
//! use insights_model::CatalogScanDriverType;
//!
//! async fn scan_once(
//!     client: Arc<dyn CatalogClient>,
//! ) -> insights_core::Result<()> {
//!     let worker = CatalogScanWorker::new(
//!         WorkerConfig::default(),
//!         client,
//!         Arc::new(MemoryTableStore::default()),
//!         Arc::new(MemoryQueue::new()),
//!         Arc::new(MemoryBlobStore::new()),
//!     );
//!     worker.service.initialize().await?;
//!     worker
//!         .service
//!         .start(CatalogScanDriverType::CatalogLeafItemToCsv, None, None)
//!         .await?;
//!     worker.runtime.run_until_idle(usize::MAX).await?;
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod dispatcher;
pub mod drivers;
pub mod error;
pub mod latest_leaf;
pub mod processors;
pub mod queue;
pub mod results;
pub mod scan_service;
pub mod storage;
pub mod worker;

pub use catalog::CatalogClient;
pub use config::{
    DriverConfig, QueueConfig, ResultConfig, ScanConfig, TableConfig, WorkerConfig,
};
pub use dispatcher::{
    DispatchStatus, MessageDispatcher, RunSummary, WorkerMessageDispatcher,
    WorkerRuntime,
};
pub use drivers::{CatalogScanDriverFactory, DriverDependencies, DriverResult};
pub use error::{InsightsError, Result};
pub use latest_leaf::{LatestLeafStorage, LatestPackageLeafMapper};
pub use queue::{MemoryQueue, MessageEnqueuer, QueueBackend};
pub use results::{BlobStore, CsvResultStorage, MemoryBlobStore};
pub use scan_service::{
    CatalogScanService, RequeueOutcome, ScanStatus, StartScanOutcome,
};
pub use storage::{CatalogScanStorage, CursorStorage, MemoryTableStore, TableStore};
pub use worker::CatalogScanWorker;
