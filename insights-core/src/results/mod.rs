//! Blob storage and bucketed CSV output.

mod blob;
mod csv_storage;

pub use blob::{BlobStore, MemoryBlobStore};
pub use csv_storage::{CsvRecord, CsvResultStorage, bucket_for};
