//! Storage accessors over the table store collaborator.

mod cursor;
mod memory;
mod scan;
mod table;

pub use cursor::CursorStorage;
pub use memory::MemoryTableStore;
pub use scan::CatalogScanStorage;
pub(crate) use scan::missing_by_url;
pub use table::{
    ETag, TableEntity, TableOperation, TableQuery, TableStore, Versioned, decode,
    validate_batch,
};
