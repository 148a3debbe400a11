use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use mdbridge_catalog::{Catalog, CategoryDescriptor};

use crate::counters::{CategoryTotal, CounterEntry, CounterTable};
use crate::error::BridgeError;

/// Catalog contents as seen by the last inventory query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Inventory {
    Available { categories: Vec<CategoryDescriptor> },
    Unavailable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub feed: String,
    /// Sorted by (category, key)
    pub counters: Vec<CounterEntry>,
    pub totals: Vec<CategoryTotal>,
    pub inventory: Inventory,
}

/// Summarizes counters and catalog inventory. Read-only: an inventory
/// failure is logged and reported in the snapshot, never returned.
pub struct StatusReporter {
    feed_name: String,
    counters: Arc<CounterTable>,
    catalog: Arc<dyn Catalog>,
}

impl StatusReporter {
    pub fn new(feed_name: impl Into<String>, counters: Arc<CounterTable>, catalog: Arc<dyn Catalog>) -> Self {
        Self {
            feed_name: feed_name.into(),
            counters,
            catalog,
        }
    }

    /// Build a snapshot without logging it
    pub async fn snapshot(&self) -> StatusSnapshot {
        let inventory = match self.catalog.list_categories().await {
            Ok(categories) => Inventory::Available { categories },
            Err(e) => Inventory::Unavailable {
                reason: BridgeError::CatalogInventoryUnavailable(e).to_string(),
            },
        };

        StatusSnapshot {
            feed: self.feed_name.clone(),
            counters: self.counters.snapshot(),
            totals: self.counters.totals(),
            inventory,
        }
    }

    /// Build a snapshot and log it: one line per counter, one per inventory category
    pub async fn summarize(&self) -> StatusSnapshot {
        let snapshot = self.snapshot().await;

        info!(feed = %snapshot.feed, keys = snapshot.counters.len(), "Status summary");
        for entry in &snapshot.counters {
            info!(
                category = %entry.category,
                key = %entry.key,
                received = entry.received,
                write_failures = entry.write_failures,
                "Counter"
            );
        }

        match &snapshot.inventory {
            Inventory::Available { categories } if categories.is_empty() => {
                info!("Catalog is empty");
            }
            Inventory::Available { categories } => {
                for descriptor in categories {
                    info!(
                        category = %descriptor.category,
                        partitions = descriptor.partitions.len(),
                        files = descriptor.files,
                        bytes = descriptor.bytes,
                        records = descriptor.records,
                        "Catalog category"
                    );
                }
            }
            Inventory::Unavailable { reason } => {
                warn!(reason = %reason, "Catalog inventory unavailable");
            }
        }

        snapshot
    }
}
