use std::slice;
use std::sync::Arc;

use tracing::{error, info};

use mdbridge_catalog::{Catalog, LostRecords, WriteMode};
use mdbridge_model::{Category, MarketEvent};

use crate::counters::CounterTable;
use crate::error::BridgeError;
use crate::metrics::BridgeMetrics;

/// Quotes are logged once per this many quotes
pub const QUOTE_LOG_EVERY: u64 = 100;
/// Trades are logged once per this many trades
pub const TRADE_LOG_EVERY: u64 = 10;
/// Book-delta batches are logged once per this many batches
pub const BOOK_DELTA_LOG_EVERY: u64 = 100;
pub const BAR_LOG_EVERY: u64 = 1;
pub const INSTRUMENT_LOG_EVERY: u64 = 1;

/// Sampling cadence for informational event logs
pub fn log_every(category: Category) -> u64 {
    match category {
        Category::Quote => QUOTE_LOG_EVERY,
        Category::Trade => TRADE_LOG_EVERY,
        Category::BookDelta => BOOK_DELTA_LOG_EVERY,
        Category::Bar => BAR_LOG_EVERY,
        Category::Instrument => INSTRUMENT_LOG_EVERY,
    }
}

/// Write mode used for each category
pub fn write_mode(category: Category) -> WriteMode {
    match category {
        Category::Instrument => WriteMode::Upsert,
        Category::Quote | Category::Trade | Category::BookDelta | Category::Bar => WriteMode::Append,
    }
}

/// What happened to one routed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteOutcome {
    pub category: Category,
    pub key: String,
    /// Counter value for (category, key) after this event
    pub count: u64,
    /// Whether this event produced a sampled log line
    pub sampled: bool,
    /// Whether the catalog accepted the write
    pub written: bool,
}

/// Classifies events, counts them and forwards each one to the catalog.
///
/// Every event is counted before it is written. A failed write is counted
/// again as a write failure, so `received - write_failures` equals what the
/// catalog holds for every key.
pub struct EventRouter {
    catalog: Arc<dyn Catalog>,
    counters: Arc<CounterTable>,
    metrics: BridgeMetrics,
}

impl EventRouter {
    pub fn new(feed_name: &str, catalog: Arc<dyn Catalog>, counters: Arc<CounterTable>) -> Self {
        Self {
            catalog,
            counters,
            metrics: BridgeMetrics::new(feed_name),
        }
    }

    pub fn counters(&self) -> &Arc<CounterTable> {
        &self.counters
    }

    /// Count records the catalog accepted but could not persist, e.g. rows
    /// still buffered when a close fails. Keeps `received - write_failures`
    /// equal to what is stored.
    pub fn record_lost(&self, lost: &[LostRecords]) {
        for entry in lost {
            self.counters
                .record_failures(entry.category, &entry.key, entry.records);
            self.metrics.add_write_failures(entry.category, entry.records);
        }
    }

    /// Route one event. Never fails: write errors are logged and counted.
    pub async fn route(&self, event: MarketEvent) -> RouteOutcome {
        let category = event.category();
        let key = event.key();

        let tally = self.counters.record(category, &key);
        self.metrics.inc_event(category);

        let sampled = tally.category % log_every(category) == 0;
        if sampled {
            log_event(&event, tally.key);
        }

        let written = match self
            .catalog
            .write(slice::from_ref(&event), write_mode(category))
            .await
        {
            Ok(()) => true,
            Err(source) => {
                self.counters.record_failure(category, &key);
                self.metrics.inc_write_failure(category);
                let err = BridgeError::WriteFailed {
                    category,
                    key: key.clone(),
                    source,
                };
                error!(category = %category, key = %key, error = %err, "Dropping event");
                false
            }
        };

        RouteOutcome {
            category,
            key,
            count: tally.key,
            sampled,
            written,
        }
    }
}

fn log_event(event: &MarketEvent, count: u64) {
    match event {
        MarketEvent::Quote(q) => info!(
            instrument = %q.instrument_id,
            count,
            bid = %q.bid_price,
            ask = %q.ask_price,
            bid_size = %q.bid_size,
            ask_size = %q.ask_size,
            "Quote"
        ),
        MarketEvent::Trade(t) => info!(
            instrument = %t.instrument_id,
            count,
            price = %t.price,
            size = %t.size,
            side = t.aggressor_side.as_str(),
            trade_id = %t.trade_id,
            "Trade"
        ),
        MarketEvent::BookDeltas(d) => info!(
            instrument = %d.instrument_id,
            count,
            deltas = d.deltas.len(),
            sequence = d.sequence,
            "Book deltas"
        ),
        MarketEvent::Bar(b) => info!(
            bar_type = %b.bar_type,
            count,
            open = %b.open,
            high = %b.high,
            low = %b.low,
            close = %b.close,
            volume = %b.volume,
            "Bar"
        ),
        MarketEvent::Instrument(i) => info!(
            instrument = %i.instrument_id,
            raw_symbol = %i.raw_symbol,
            contract_type = i.contract_type.as_str(),
            tick_size = %i.tick_size,
            "Instrument"
        ),
    }
}
