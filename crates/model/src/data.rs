//! Market data payloads.
//!
//! Prices and sizes are exact decimals. Timestamps are UNIX nanoseconds:
//! `ts_event` as stamped by the venue, `ts_init` when the bridge received it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::enums::{AggressorSide, BookAction, BookSide, BookType, ContractType};
use crate::identifiers::{BarType, InstrumentId};

/// Best bid/ask snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteTick {
    pub instrument_id: InstrumentId,
    pub bid_price: Decimal,
    pub ask_price: Decimal,
    pub bid_size: Decimal,
    pub ask_size: Decimal,
    pub ts_event: u64,
    pub ts_init: u64,
}

/// A single executed trade print.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeTick {
    pub instrument_id: InstrumentId,
    pub price: Decimal,
    pub size: Decimal,
    pub aggressor_side: AggressorSide,
    pub trade_id: String,
    pub ts_event: u64,
    pub ts_init: u64,
}

/// One add/update/delete operation against a price level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookDelta {
    pub action: BookAction,
    pub side: BookSide,
    pub price: Decimal,
    pub size: Decimal,
}

/// An ordered batch of book operations sharing one venue update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookDeltas {
    pub instrument_id: InstrumentId,
    pub book_type: BookType,
    pub deltas: Vec<BookDelta>,
    /// Venue update id of the last operation in the batch
    pub sequence: u64,
    pub is_snapshot: bool,
    pub ts_event: u64,
    pub ts_init: u64,
}

/// Aggregated OHLCV summary for one interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub bar_type: BarType,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    /// Close time of the interval
    pub ts_event: u64,
    pub ts_init: u64,
}

/// Static instrument definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentInfo {
    pub instrument_id: InstrumentId,
    pub raw_symbol: String,
    pub contract_type: ContractType,
    pub base_currency: String,
    pub quote_currency: String,
    pub price_precision: u8,
    pub size_precision: u8,
    pub tick_size: Decimal,
    pub step_size: Decimal,
    pub ts_init: u64,
}
