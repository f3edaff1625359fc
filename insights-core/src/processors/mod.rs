//! The three scan state machines. Each processor handles one message kind,
//! reloads its scan row, and advances it as far as it can in one invocation.

mod index;
mod leaf;
mod page;

pub use index::CatalogIndexScanProcessor;
pub use leaf::CatalogLeafScanProcessor;
pub use page::CatalogPageScanProcessor;
