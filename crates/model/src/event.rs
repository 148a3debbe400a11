use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::data::{Bar, InstrumentInfo, OrderBookDeltas, QuoteTick, TradeTick};

/// Closed set of event categories the bridge routes and persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "quote_tick")]
    Quote,
    #[serde(rename = "trade_tick")]
    Trade,
    #[serde(rename = "order_book_delta")]
    BookDelta,
    #[serde(rename = "bar")]
    Bar,
    #[serde(rename = "instrument")]
    Instrument,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Quote,
        Category::Trade,
        Category::BookDelta,
        Category::Bar,
        Category::Instrument,
    ];

    /// Directory and metric label name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quote => "quote_tick",
            Self::Trade => "trade_tick",
            Self::BookDelta => "order_book_delta",
            Self::Bar => "bar",
            Self::Instrument => "instrument",
        }
    }

    /// Position in `Category::ALL`
    pub fn index(&self) -> usize {
        match self {
            Self::Quote => 0,
            Self::Trade => 1,
            Self::BookDelta => 2,
            Self::Bar => 3,
            Self::Instrument => 4,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown category: {}", s))
    }
}

/// A market event as delivered by the feed. Immutable and short-lived:
/// it exists for the duration of one routing call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketEvent {
    Quote(QuoteTick),
    Trade(TradeTick),
    BookDeltas(OrderBookDeltas),
    Bar(Bar),
    Instrument(InstrumentInfo),
}

impl MarketEvent {
    pub fn category(&self) -> Category {
        match self {
            Self::Quote(_) => Category::Quote,
            Self::Trade(_) => Category::Trade,
            Self::BookDeltas(_) => Category::BookDelta,
            Self::Bar(_) => Category::Bar,
            Self::Instrument(_) => Category::Instrument,
        }
    }

    /// Counter and partition key: the instrument id, or the bar-type string for bars.
    pub fn key(&self) -> String {
        match self {
            Self::Quote(q) => q.instrument_id.to_string(),
            Self::Trade(t) => t.instrument_id.to_string(),
            Self::BookDeltas(d) => d.instrument_id.to_string(),
            Self::Bar(b) => b.bar_type.to_string(),
            Self::Instrument(i) => i.instrument_id.to_string(),
        }
    }

    pub fn ts_init(&self) -> u64 {
        match self {
            Self::Quote(q) => q.ts_init,
            Self::Trade(t) => t.ts_init,
            Self::BookDeltas(d) => d.ts_init,
            Self::Bar(b) => b.ts_init,
            Self::Instrument(i) => i.ts_init,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::AggressorSide;
    use rust_decimal::Decimal;

    #[test]
    fn test_category_names_round_trip() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>().unwrap(), category);
            assert_eq!(Category::ALL[category.index()], category);
        }
        assert!("order_book".parse::<Category>().is_err());
    }

    #[test]
    fn test_bar_key_is_bar_type_string() {
        let bar = Bar {
            bar_type: "LTCUSDT-PERP.BINANCE-1-MINUTE-LAST-EXTERNAL".parse().unwrap(),
            open: Decimal::new(8000, 2),
            high: Decimal::new(8100, 2),
            low: Decimal::new(7950, 2),
            close: Decimal::new(8050, 2),
            volume: Decimal::new(1234, 0),
            ts_event: 1,
            ts_init: 2,
        };
        let event = MarketEvent::Bar(bar);
        assert_eq!(event.category(), Category::Bar);
        assert_eq!(event.key(), "LTCUSDT-PERP.BINANCE-1-MINUTE-LAST-EXTERNAL");
    }

    #[test]
    fn test_trade_key_is_instrument_id() {
        let event = MarketEvent::Trade(TradeTick {
            instrument_id: "SUIUSDT-PERP.BINANCE".parse().unwrap(),
            price: Decimal::new(35, 1),
            size: Decimal::new(100, 0),
            aggressor_side: AggressorSide::Buyer,
            trade_id: "42".to_string(),
            ts_event: 10,
            ts_init: 11,
        });
        assert_eq!(event.category(), Category::Trade);
        assert_eq!(event.key(), "SUIUSDT-PERP.BINANCE");
        assert_eq!(event.ts_init(), 11);
    }
}
