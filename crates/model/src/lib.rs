//! mdbridge-model: Identifiers and market event types
//!
//! Instrument and bar-series handles are parsed from their external string
//! forms once at startup. Market events are the closed set of payloads the
//! feed delivers and the catalog persists.

pub mod data;
pub mod enums;
pub mod error;
pub mod event;
pub mod identifiers;

pub use data::{Bar, BookDelta, InstrumentInfo, OrderBookDeltas, QuoteTick, TradeTick};
pub use enums::{
    AggregationSource, AggressorSide, BarAggregation, BookAction, BookSide, BookType,
    ContractType, PriceType,
};
pub use error::ParseError;
pub use event::{Category, MarketEvent};
pub use identifiers::{BarSpecification, BarType, InstrumentId};
