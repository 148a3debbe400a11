use async_trait::async_trait;
use serde::Serialize;

use mdbridge_model::{Category, MarketEvent};

use crate::error::CatalogError;

/// Write semantics for a batch of records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Add records after any already stored for the same key
    Append,
    /// Replace whatever is stored for the same key (overwrite-or-insert)
    Upsert,
}

/// Inventory entry for one persisted category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryDescriptor {
    pub category: Category,
    /// Instrument ids or bar-type strings with stored data, sorted
    pub partitions: Vec<String>,
    pub files: usize,
    pub bytes: u64,
    pub records: u64,
}

/// Catalog trait for persistence backends (Parquet, in-memory, etc.)
///
/// Implementations must be safe for concurrent callers: the bridge does not
/// wrap the catalog in an external lock.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Persist a batch of records
    async fn write(&self, records: &[MarketEvent], mode: WriteMode) -> Result<(), CatalogError>;

    /// List the categories that have been persisted
    async fn list_categories(&self) -> Result<Vec<CategoryDescriptor>, CatalogError>;

    /// Persist anything buffered by append writes
    async fn flush(&self) -> Result<(), CatalogError> {
        Ok(())
    }

    /// Flush and refuse further writes
    async fn close(&self) -> Result<(), CatalogError> {
        self.flush().await
    }
}
