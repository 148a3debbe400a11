//! mdbridge-catalog: Catalog write adapters
//!
//! The bridge depends on storage only through the [`Catalog`] trait:
//! `write(records, mode)` plus an inventory query. Two implementations are
//! provided: an in-memory catalog for tests and dry runs, and a Parquet
//! catalog partitioned by category and instrument/bar type.

pub mod error;
pub mod memory;
pub mod parquet_catalog;
pub mod schema;
pub mod traits;

pub use error::{CatalogError, LostRecords};
pub use memory::InMemoryCatalog;
pub use parquet_catalog::ParquetCatalog;
pub use traits::{Catalog, CategoryDescriptor, WriteMode};
