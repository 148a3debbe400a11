//! Per (category, key) event counters.
//!
//! Counters only grow for the lifetime of the process. Increments on
//! different keys never contend on a shared lock; increments on the same key
//! are a single atomic add.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

use mdbridge_model::Category;

#[derive(Default)]
struct CounterCell {
    received: AtomicU64,
    write_failures: AtomicU64,
}

/// Running counts after one increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    /// Events received for this (category, key)
    pub key: u64,
    /// Events received for the whole category
    pub category: u64,
}

/// One row of a counter snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CounterEntry {
    pub category: Category,
    pub key: String,
    pub received: u64,
    pub write_failures: u64,
}

impl CounterEntry {
    /// Records that reached the catalog
    pub fn persisted(&self) -> u64 {
        self.received.saturating_sub(self.write_failures)
    }
}

/// Per-category sums of the counter table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryTotal {
    pub category: Category,
    pub received: u64,
    pub write_failures: u64,
}

pub struct CounterTable {
    cells: [DashMap<String, CounterCell>; 5],
    received: [AtomicU64; 5],
    write_failures: [AtomicU64; 5],
}

impl CounterTable {
    pub fn new() -> Self {
        Self {
            cells: std::array::from_fn(|_| DashMap::new()),
            received: std::array::from_fn(|_| AtomicU64::new(0)),
            write_failures: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Count one received event
    pub fn record(&self, category: Category, key: &str) -> Tally {
        let idx = category.index();
        let key_count = self.bump(idx, key, 1, |cell| &cell.received);
        let category_count = self.received[idx].fetch_add(1, Ordering::Relaxed) + 1;
        Tally {
            key: key_count,
            category: category_count,
        }
    }

    /// Count one event the catalog refused
    pub fn record_failure(&self, category: Category, key: &str) -> u64 {
        self.record_failures(category, key, 1)
    }

    /// Count `n` events the catalog accepted but later failed to persist
    pub fn record_failures(&self, category: Category, key: &str, n: u64) -> u64 {
        let idx = category.index();
        self.write_failures[idx].fetch_add(n, Ordering::Relaxed);
        self.bump(idx, key, n, |cell| &cell.write_failures)
    }

    fn bump(&self, idx: usize, key: &str, n: u64, field: fn(&CounterCell) -> &AtomicU64) -> u64 {
        // Existing keys take the shard read lock only
        if let Some(cell) = self.cells[idx].get(key) {
            return field(&cell).fetch_add(n, Ordering::Relaxed) + n;
        }
        let cell = self.cells[idx].entry(key.to_string()).or_default();
        field(&cell).fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn get(&self, category: Category, key: &str) -> u64 {
        self.cells[category.index()]
            .get(key)
            .map_or(0, |cell| cell.received.load(Ordering::Relaxed))
    }

    pub fn failures(&self, category: Category, key: &str) -> u64 {
        self.cells[category.index()]
            .get(key)
            .map_or(0, |cell| cell.write_failures.load(Ordering::Relaxed))
    }

    pub fn category_total(&self, category: Category) -> u64 {
        self.received[category.index()].load(Ordering::Relaxed)
    }

    pub fn totals(&self) -> Vec<CategoryTotal> {
        Category::ALL
            .into_iter()
            .map(|category| CategoryTotal {
                category,
                received: self.received[category.index()].load(Ordering::Relaxed),
                write_failures: self.write_failures[category.index()].load(Ordering::Relaxed),
            })
            .collect()
    }

    /// All entries sorted by (category, key)
    pub fn snapshot(&self) -> Vec<CounterEntry> {
        let mut entries = Vec::new();
        for category in Category::ALL {
            let start = entries.len();
            for cell in self.cells[category.index()].iter() {
                entries.push(CounterEntry {
                    category,
                    key: cell.key().clone(),
                    received: cell.received.load(Ordering::Relaxed),
                    write_failures: cell.write_failures.load(Ordering::Relaxed),
                });
            }
            entries[start..].sort_by(|a, b| a.key.cmp(&b.key));
        }
        entries
    }

    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(DashMap::is_empty)
    }
}

impl Default for CounterTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_record_returns_running_counts() {
        let table = CounterTable::new();
        assert_eq!(table.record(Category::Quote, "A.X"), Tally { key: 1, category: 1 });
        assert_eq!(table.record(Category::Quote, "B.X"), Tally { key: 1, category: 2 });
        assert_eq!(table.record(Category::Quote, "A.X"), Tally { key: 2, category: 3 });
        assert_eq!(table.get(Category::Quote, "A.X"), 2);
        assert_eq!(table.get(Category::Trade, "A.X"), 0);
        assert_eq!(table.category_total(Category::Quote), 3);
    }

    #[test]
    fn test_failures_tracked_separately() {
        let table = CounterTable::new();
        table.record(Category::Trade, "A.X");
        table.record(Category::Trade, "A.X");
        table.record_failure(Category::Trade, "A.X");

        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].received, 2);
        assert_eq!(snapshot[0].write_failures, 1);
        assert_eq!(snapshot[0].persisted(), 1);
        assert_eq!(table.totals()[Category::Trade.index()].write_failures, 1);

        // Rows lost after being accepted count against the same key
        table.record(Category::Trade, "A.X");
        assert_eq!(table.record_failures(Category::Trade, "A.X", 2), 3);
        assert_eq!(table.snapshot()[0].persisted(), 0);
        assert_eq!(table.totals()[Category::Trade.index()].write_failures, 3);
    }

    #[test]
    fn test_snapshot_sorted_by_category_then_key() {
        let table = CounterTable::new();
        table.record(Category::Bar, "B.X-1-MINUTE-LAST-EXTERNAL");
        table.record(Category::Quote, "Z.X");
        table.record(Category::Quote, "A.X");
        table.record(Category::Trade, "M.X");

        let keys: Vec<(Category, String)> = table
            .snapshot()
            .into_iter()
            .map(|e| (e.category, e.key))
            .collect();
        assert_eq!(
            keys,
            vec![
                (Category::Quote, "A.X".to_string()),
                (Category::Quote, "Z.X".to_string()),
                (Category::Trade, "M.X".to_string()),
                (Category::Bar, "B.X-1-MINUTE-LAST-EXTERNAL".to_string()),
            ]
        );
    }

    #[test]
    fn test_concurrent_increments() {
        let table = Arc::new(CounterTable::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || {
                    let category = if t % 2 == 0 { Category::Quote } else { Category::Trade };
                    for _ in 0..1000 {
                        table.record(category, "SHARED.X");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(table.get(Category::Quote, "SHARED.X"), 4000);
        assert_eq!(table.get(Category::Trade, "SHARED.X"), 4000);
        assert_eq!(table.category_total(Category::Quote), 4000);
    }
}
