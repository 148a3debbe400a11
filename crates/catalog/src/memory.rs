use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

use mdbridge_model::{Category, MarketEvent};

use crate::error::CatalogError;
use crate::traits::{Catalog, CategoryDescriptor, WriteMode};

type Partitions = BTreeMap<(Category, String), Vec<MarketEvent>>;

/// Catalog kept entirely in memory, partitioned by (category, key).
pub struct InMemoryCatalog {
    data: RwLock<Partitions>,
    write_calls: AtomicU64,
    closed: AtomicBool,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            write_calls: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of accepted `write` calls
    pub fn write_calls(&self) -> u64 {
        self.write_calls.load(Ordering::SeqCst)
    }

    /// Records stored for one partition, in write order
    pub async fn records(&self, category: Category, key: &str) -> Vec<MarketEvent> {
        let data = self.data.read().await;
        data.get(&(category, key.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Total records stored across all partitions
    pub async fn total_records(&self) -> usize {
        let data = self.data.read().await;
        data.values().map(Vec::len).sum()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn write(&self, records: &[MarketEvent], mode: WriteMode) -> Result<(), CatalogError> {
        if self.is_closed() {
            return Err(CatalogError::Closed);
        }

        let mut data = self.data.write().await;
        for record in records {
            let partition = data.entry((record.category(), record.key())).or_default();
            if mode == WriteMode::Upsert {
                partition.clear();
            }
            partition.push(record.clone());
        }
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_categories(&self) -> Result<Vec<CategoryDescriptor>, CatalogError> {
        let data = self.data.read().await;
        let mut inventory: BTreeMap<Category, CategoryDescriptor> = BTreeMap::new();

        // BTreeMap iteration keeps partitions sorted within each category
        for ((category, key), records) in data.iter() {
            let entry = inventory.entry(*category).or_insert_with(|| CategoryDescriptor {
                category: *category,
                partitions: Vec::new(),
                files: 0,
                bytes: 0,
                records: 0,
            });
            entry.partitions.push(key.clone());
            entry.records += records.len() as u64;
        }

        Ok(inventory.into_values().collect())
    }

    async fn close(&self) -> Result<(), CatalogError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
