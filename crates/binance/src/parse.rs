//! Conversions between Binance wire payloads and bridge events.

use mdbridge_lib::Subscription;
use mdbridge_model::{
    AggregationSource, AggressorSide, Bar, BarAggregation, BarSpecification, BarType, BookAction,
    BookDelta, BookSide, BookType, ContractType, InstrumentId, InstrumentInfo,
    OrderBookDeltas, PriceType, QuoteTick, TradeTick,
};

use crate::error::BinanceError;
use crate::messages::{AggTrade, BookTicker, DepthUpdate, KlineEvent, PriceLevel, SymbolInfo};

pub const BINANCE_VENUE: &str = "BINANCE";

const PERP_SUFFIX: &str = "-PERP";
const NANOS_PER_MILLI: u64 = 1_000_000;

/// Venue millisecond timestamp to UNIX nanoseconds
pub fn millis_to_nanos(ms: u64) -> u64 {
    ms.saturating_mul(NANOS_PER_MILLI)
}

/// Exchange symbol for an instrument: `ADAUSDT-PERP.BINANCE` -> `ADAUSDT`
pub fn raw_symbol(instrument_id: &InstrumentId) -> Result<String, BinanceError> {
    if instrument_id.venue() != BINANCE_VENUE {
        return Err(BinanceError::Unsupported(format!(
            "venue {} for {}",
            instrument_id.venue(),
            instrument_id
        )));
    }
    let symbol = instrument_id.symbol();
    Ok(symbol.strip_suffix(PERP_SUFFIX).unwrap_or(symbol).to_string())
}

/// Binance kline interval for a bar specification. Only time bars
/// the exchange publishes natively are supported.
pub fn kline_interval(spec: &BarSpecification) -> Result<&'static str, BinanceError> {
    if spec.price_type != PriceType::Last {
        return Err(BinanceError::Unsupported(format!(
            "bar price type {} (klines are LAST only)",
            spec.price_type
        )));
    }
    let interval = match (spec.aggregation, spec.step) {
        (BarAggregation::Minute, 1) => "1m",
        (BarAggregation::Minute, 3) => "3m",
        (BarAggregation::Minute, 5) => "5m",
        (BarAggregation::Minute, 15) => "15m",
        (BarAggregation::Minute, 30) => "30m",
        (BarAggregation::Hour, 1) => "1h",
        (BarAggregation::Hour, 2) => "2h",
        (BarAggregation::Hour, 4) => "4h",
        (BarAggregation::Hour, 6) => "6h",
        (BarAggregation::Hour, 8) => "8h",
        (BarAggregation::Hour, 12) => "12h",
        (BarAggregation::Day, 1) => "1d",
        (BarAggregation::Day, 3) => "3d",
        (BarAggregation::Week, 1) => "1w",
        (BarAggregation::Month, 1) => "1M",
        _ => {
            return Err(BinanceError::Unsupported(format!(
                "bar interval {}-{}",
                spec.step, spec.aggregation
            )))
        }
    };
    Ok(interval)
}

/// Raw stream name for a subscription, `None` for instrument definitions
/// (served from REST, not a stream).
pub fn stream_name(subscription: &Subscription) -> Result<Option<String>, BinanceError> {
    let stream = match subscription {
        Subscription::Instrument(_) => return Ok(None),
        Subscription::Quotes(id) => format!("{}@bookTicker", stream_symbol(id)?),
        Subscription::Trades(id) => format!("{}@aggTrade", stream_symbol(id)?),
        Subscription::BookDeltas {
            instrument_id,
            book_type,
            ..
        } => {
            if *book_type != BookType::L2Mbp {
                return Err(BinanceError::Unsupported(format!("book type {}", book_type)));
            }
            format!("{}@depth@100ms", stream_symbol(instrument_id)?)
        }
        Subscription::Bars(bar_type) => {
            if bar_type.source() != AggregationSource::External {
                return Err(BinanceError::Unsupported(format!(
                    "internally aggregated bars {}",
                    bar_type
                )));
            }
            format!(
                "{}@kline_{}",
                stream_symbol(bar_type.instrument_id())?,
                kline_interval(bar_type.spec())?
            )
        }
    };
    Ok(Some(stream))
}

fn stream_symbol(instrument_id: &InstrumentId) -> Result<String, BinanceError> {
    Ok(raw_symbol(instrument_id)?.to_lowercase())
}

pub fn parse_quote(msg: &BookTicker, instrument_id: InstrumentId, ts_init: u64) -> QuoteTick {
    QuoteTick {
        instrument_id,
        bid_price: msg.bid_price,
        ask_price: msg.ask_price,
        bid_size: msg.bid_qty,
        ask_size: msg.ask_qty,
        ts_event: millis_to_nanos(msg.transaction_time),
        ts_init,
    }
}

pub fn parse_trade(msg: &AggTrade, instrument_id: InstrumentId, ts_init: u64) -> TradeTick {
    // Maker buyer means the taker sold
    let aggressor_side = if msg.buyer_is_maker {
        AggressorSide::Seller
    } else {
        AggressorSide::Buyer
    };
    TradeTick {
        instrument_id,
        price: msg.price,
        size: msg.quantity,
        aggressor_side,
        trade_id: msg.agg_trade_id.to_string(),
        ts_event: millis_to_nanos(msg.trade_time),
        ts_init,
    }
}

pub fn parse_depth(msg: &DepthUpdate, instrument_id: InstrumentId, ts_init: u64) -> OrderBookDeltas {
    let bids = msg.bids.iter().map(|level| level_delta(BookSide::Bid, level));
    let asks = msg.asks.iter().map(|level| level_delta(BookSide::Ask, level));
    OrderBookDeltas {
        instrument_id,
        book_type: BookType::L2Mbp,
        deltas: bids.chain(asks).collect(),
        sequence: msg.final_update_id,
        is_snapshot: false,
        ts_event: millis_to_nanos(msg.transaction_time),
        ts_init,
    }
}

fn level_delta(side: BookSide, &(price, size): &PriceLevel) -> BookDelta {
    let action = if size.is_zero() {
        BookAction::Delete
    } else {
        BookAction::Update
    };
    BookDelta {
        action,
        side,
        price,
        size,
    }
}

/// Bar for a closed kline. Open klines are interim updates and yield `None`.
pub fn parse_kline(msg: &KlineEvent, bar_type: BarType, ts_init: u64) -> Option<Bar> {
    let k = &msg.kline;
    if !k.is_closed {
        return None;
    }
    Some(Bar {
        bar_type,
        open: k.open,
        high: k.high,
        low: k.low,
        close: k.close,
        volume: k.volume,
        ts_event: millis_to_nanos(k.close_time),
        ts_init,
    })
}

pub fn parse_instrument(
    info: &SymbolInfo,
    instrument_id: InstrumentId,
    ts_init: u64,
) -> Result<InstrumentInfo, BinanceError> {
    let tick_size = info
        .tick_size()
        .ok_or_else(|| BinanceError::UnknownSymbol(format!("{} has no PRICE_FILTER", info.symbol)))?;
    let step_size = info
        .step_size()
        .ok_or_else(|| BinanceError::UnknownSymbol(format!("{} has no LOT_SIZE", info.symbol)))?;
    let contract_type = match info.contract_type.as_str() {
        "PERPETUAL" => ContractType::Perpetual,
        "" => instrument_id.contract_type(),
        _ => ContractType::Delivery,
    };
    Ok(InstrumentInfo {
        raw_symbol: info.symbol.clone(),
        instrument_id,
        contract_type,
        base_currency: info.base_asset.clone(),
        quote_currency: info.quote_asset.clone(),
        price_precision: info.price_precision,
        size_precision: info.quantity_precision,
        tick_size,
        step_size,
        ts_init,
    })
}
