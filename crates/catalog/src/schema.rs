//! Arrow schemas for each event category.
//!
//! Decimals are stored as `Decimal128(38, 9)` and timestamps as UTC
//! nanoseconds. Book deltas are flattened to one row per operation.

use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanBuilder, Decimal128Builder, StringBuilder, TimestampNanosecondBuilder,
    UInt64Builder, UInt8Builder,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use rust_decimal::Decimal;

use mdbridge_model::{Category, MarketEvent};

pub const DECIMAL_PRECISION: u8 = 38;
pub const DECIMAL_SCALE: i8 = 9;

fn decimal_type() -> DataType {
    DataType::Decimal128(DECIMAL_PRECISION, DECIMAL_SCALE)
}

fn ts_type() -> DataType {
    DataType::Timestamp(TimeUnit::Nanosecond, Some(Arc::from("UTC")))
}

/// Fixed-point mantissa at `DECIMAL_SCALE` digits.
///
/// `rescale` settles for a smaller scale when the value is too large for
/// nine fractional digits; such values are refused.
fn to_fixed(value: Decimal) -> Result<i128, ArrowError> {
    let mut fixed = value.round_dp(DECIMAL_SCALE as u32);
    fixed.rescale(DECIMAL_SCALE as u32);
    if fixed.scale() != DECIMAL_SCALE as u32 {
        return Err(ArrowError::InvalidArgumentError(format!(
            "{} does not fit Decimal128({}, {})",
            value, DECIMAL_PRECISION, DECIMAL_SCALE
        )));
    }
    Ok(fixed.mantissa())
}

fn check_decimals(values: &[Decimal]) -> Result<(), ArrowError> {
    values.iter().try_for_each(|v| to_fixed(*v).map(|_| ()))
}

/// Check that a record can be stored, so a bad value is refused when it is
/// written rather than when its partition is flushed.
pub fn validate(event: &MarketEvent) -> Result<(), ArrowError> {
    match event {
        MarketEvent::Quote(q) => check_decimals(&[q.bid_price, q.ask_price, q.bid_size, q.ask_size]),
        MarketEvent::Trade(t) => check_decimals(&[t.price, t.size]),
        MarketEvent::BookDeltas(d) => {
            if d.deltas.is_empty() {
                return Err(ArrowError::InvalidArgumentError(format!(
                    "book delta batch for {} has no levels",
                    d.instrument_id
                )));
            }
            d.deltas
                .iter()
                .try_for_each(|delta| check_decimals(&[delta.price, delta.size]))
        }
        MarketEvent::Bar(b) => check_decimals(&[b.open, b.high, b.low, b.close, b.volume]),
        MarketEvent::Instrument(i) => check_decimals(&[i.tick_size, i.step_size]),
    }
}

fn decimal_builder() -> Result<Decimal128Builder, ArrowError> {
    Decimal128Builder::new().with_precision_and_scale(DECIMAL_PRECISION, DECIMAL_SCALE)
}

fn ts_builder() -> TimestampNanosecondBuilder {
    TimestampNanosecondBuilder::new().with_timezone("UTC")
}

pub fn schema_for(category: Category) -> Arc<Schema> {
    let fields = match category {
        Category::Quote => vec![
            Field::new("instrument_id", DataType::Utf8, false),
            Field::new("bid_price", decimal_type(), false),
            Field::new("ask_price", decimal_type(), false),
            Field::new("bid_size", decimal_type(), false),
            Field::new("ask_size", decimal_type(), false),
            Field::new("ts_event", ts_type(), false),
            Field::new("ts_init", ts_type(), false),
        ],
        Category::Trade => vec![
            Field::new("instrument_id", DataType::Utf8, false),
            Field::new("price", decimal_type(), false),
            Field::new("size", decimal_type(), false),
            Field::new("aggressor_side", DataType::Utf8, false),
            Field::new("trade_id", DataType::Utf8, false),
            Field::new("ts_event", ts_type(), false),
            Field::new("ts_init", ts_type(), false),
        ],
        Category::BookDelta => vec![
            Field::new("instrument_id", DataType::Utf8, false),
            Field::new("book_type", DataType::Utf8, false),
            Field::new("action", DataType::Utf8, false),
            Field::new("side", DataType::Utf8, false),
            Field::new("price", decimal_type(), false),
            Field::new("size", decimal_type(), false),
            Field::new("sequence", DataType::UInt64, false),
            Field::new("is_snapshot", DataType::Boolean, false),
            Field::new("ts_event", ts_type(), false),
            Field::new("ts_init", ts_type(), false),
        ],
        Category::Bar => vec![
            Field::new("bar_type", DataType::Utf8, false),
            Field::new("open", decimal_type(), false),
            Field::new("high", decimal_type(), false),
            Field::new("low", decimal_type(), false),
            Field::new("close", decimal_type(), false),
            Field::new("volume", decimal_type(), false),
            Field::new("ts_event", ts_type(), false),
            Field::new("ts_init", ts_type(), false),
        ],
        Category::Instrument => vec![
            Field::new("instrument_id", DataType::Utf8, false),
            Field::new("raw_symbol", DataType::Utf8, false),
            Field::new("contract_type", DataType::Utf8, false),
            Field::new("base_currency", DataType::Utf8, false),
            Field::new("quote_currency", DataType::Utf8, false),
            Field::new("price_precision", DataType::UInt8, false),
            Field::new("size_precision", DataType::UInt8, false),
            Field::new("tick_size", decimal_type(), false),
            Field::new("step_size", decimal_type(), false),
            Field::new("ts_init", ts_type(), false),
        ],
    };
    Arc::new(Schema::new(fields))
}

fn mismatch(expected: Category, event: &MarketEvent) -> ArrowError {
    ArrowError::InvalidArgumentError(format!(
        "expected {} record, got {}",
        expected,
        event.category()
    ))
}

/// Build a RecordBatch from events that all belong to `category`.
pub fn to_record_batch(category: Category, events: &[MarketEvent]) -> Result<RecordBatch, ArrowError> {
    let columns: Vec<ArrayRef> = match category {
        Category::Quote => quote_columns(events)?,
        Category::Trade => trade_columns(events)?,
        Category::BookDelta => book_delta_columns(events)?,
        Category::Bar => bar_columns(events)?,
        Category::Instrument => instrument_columns(events)?,
    };
    RecordBatch::try_new(schema_for(category), columns)
}

fn quote_columns(events: &[MarketEvent]) -> Result<Vec<ArrayRef>, ArrowError> {
    let mut instrument_id = StringBuilder::new();
    let mut bid_price = decimal_builder()?;
    let mut ask_price = decimal_builder()?;
    let mut bid_size = decimal_builder()?;
    let mut ask_size = decimal_builder()?;
    let mut ts_event = ts_builder();
    let mut ts_init = ts_builder();

    for event in events {
        let MarketEvent::Quote(q) = event else {
            return Err(mismatch(Category::Quote, event));
        };
        instrument_id.append_value(q.instrument_id.to_string());
        bid_price.append_value(to_fixed(q.bid_price)?);
        ask_price.append_value(to_fixed(q.ask_price)?);
        bid_size.append_value(to_fixed(q.bid_size)?);
        ask_size.append_value(to_fixed(q.ask_size)?);
        ts_event.append_value(q.ts_event as i64);
        ts_init.append_value(q.ts_init as i64);
    }

    Ok(vec![
        Arc::new(instrument_id.finish()),
        Arc::new(bid_price.finish()),
        Arc::new(ask_price.finish()),
        Arc::new(bid_size.finish()),
        Arc::new(ask_size.finish()),
        Arc::new(ts_event.finish()),
        Arc::new(ts_init.finish()),
    ])
}

fn trade_columns(events: &[MarketEvent]) -> Result<Vec<ArrayRef>, ArrowError> {
    let mut instrument_id = StringBuilder::new();
    let mut price = decimal_builder()?;
    let mut size = decimal_builder()?;
    let mut aggressor_side = StringBuilder::new();
    let mut trade_id = StringBuilder::new();
    let mut ts_event = ts_builder();
    let mut ts_init = ts_builder();

    for event in events {
        let MarketEvent::Trade(t) = event else {
            return Err(mismatch(Category::Trade, event));
        };
        instrument_id.append_value(t.instrument_id.to_string());
        price.append_value(to_fixed(t.price)?);
        size.append_value(to_fixed(t.size)?);
        aggressor_side.append_value(t.aggressor_side.as_str());
        trade_id.append_value(&t.trade_id);
        ts_event.append_value(t.ts_event as i64);
        ts_init.append_value(t.ts_init as i64);
    }

    Ok(vec![
        Arc::new(instrument_id.finish()),
        Arc::new(price.finish()),
        Arc::new(size.finish()),
        Arc::new(aggressor_side.finish()),
        Arc::new(trade_id.finish()),
        Arc::new(ts_event.finish()),
        Arc::new(ts_init.finish()),
    ])
}

fn book_delta_columns(events: &[MarketEvent]) -> Result<Vec<ArrayRef>, ArrowError> {
    let mut instrument_id = StringBuilder::new();
    let mut book_type = StringBuilder::new();
    let mut action = StringBuilder::new();
    let mut side = StringBuilder::new();
    let mut price = decimal_builder()?;
    let mut size = decimal_builder()?;
    let mut sequence = UInt64Builder::new();
    let mut is_snapshot = BooleanBuilder::new();
    let mut ts_event = ts_builder();
    let mut ts_init = ts_builder();

    for event in events {
        let MarketEvent::BookDeltas(batch) = event else {
            return Err(mismatch(Category::BookDelta, event));
        };
        let id = batch.instrument_id.to_string();
        for delta in &batch.deltas {
            instrument_id.append_value(&id);
            book_type.append_value(batch.book_type.as_str());
            action.append_value(delta.action.as_str());
            side.append_value(delta.side.as_str());
            price.append_value(to_fixed(delta.price)?);
            size.append_value(to_fixed(delta.size)?);
            sequence.append_value(batch.sequence);
            is_snapshot.append_value(batch.is_snapshot);
            ts_event.append_value(batch.ts_event as i64);
            ts_init.append_value(batch.ts_init as i64);
        }
    }

    Ok(vec![
        Arc::new(instrument_id.finish()),
        Arc::new(book_type.finish()),
        Arc::new(action.finish()),
        Arc::new(side.finish()),
        Arc::new(price.finish()),
        Arc::new(size.finish()),
        Arc::new(sequence.finish()),
        Arc::new(is_snapshot.finish()),
        Arc::new(ts_event.finish()),
        Arc::new(ts_init.finish()),
    ])
}

fn bar_columns(events: &[MarketEvent]) -> Result<Vec<ArrayRef>, ArrowError> {
    let mut bar_type = StringBuilder::new();
    let mut open = decimal_builder()?;
    let mut high = decimal_builder()?;
    let mut low = decimal_builder()?;
    let mut close = decimal_builder()?;
    let mut volume = decimal_builder()?;
    let mut ts_event = ts_builder();
    let mut ts_init = ts_builder();

    for event in events {
        let MarketEvent::Bar(b) = event else {
            return Err(mismatch(Category::Bar, event));
        };
        bar_type.append_value(b.bar_type.to_string());
        open.append_value(to_fixed(b.open)?);
        high.append_value(to_fixed(b.high)?);
        low.append_value(to_fixed(b.low)?);
        close.append_value(to_fixed(b.close)?);
        volume.append_value(to_fixed(b.volume)?);
        ts_event.append_value(b.ts_event as i64);
        ts_init.append_value(b.ts_init as i64);
    }

    Ok(vec![
        Arc::new(bar_type.finish()),
        Arc::new(open.finish()),
        Arc::new(high.finish()),
        Arc::new(low.finish()),
        Arc::new(close.finish()),
        Arc::new(volume.finish()),
        Arc::new(ts_event.finish()),
        Arc::new(ts_init.finish()),
    ])
}

fn instrument_columns(events: &[MarketEvent]) -> Result<Vec<ArrayRef>, ArrowError> {
    let mut instrument_id = StringBuilder::new();
    let mut raw_symbol = StringBuilder::new();
    let mut contract_type = StringBuilder::new();
    let mut base_currency = StringBuilder::new();
    let mut quote_currency = StringBuilder::new();
    let mut price_precision = UInt8Builder::new();
    let mut size_precision = UInt8Builder::new();
    let mut tick_size = decimal_builder()?;
    let mut step_size = decimal_builder()?;
    let mut ts_init = ts_builder();

    for event in events {
        let MarketEvent::Instrument(i) = event else {
            return Err(mismatch(Category::Instrument, event));
        };
        instrument_id.append_value(i.instrument_id.to_string());
        raw_symbol.append_value(&i.raw_symbol);
        contract_type.append_value(i.contract_type.as_str());
        base_currency.append_value(&i.base_currency);
        quote_currency.append_value(&i.quote_currency);
        price_precision.append_value(i.price_precision);
        size_precision.append_value(i.size_precision);
        tick_size.append_value(to_fixed(i.tick_size)?);
        step_size.append_value(to_fixed(i.step_size)?);
        ts_init.append_value(i.ts_init as i64);
    }

    Ok(vec![
        Arc::new(instrument_id.finish()),
        Arc::new(raw_symbol.finish()),
        Arc::new(contract_type.finish()),
        Arc::new(base_currency.finish()),
        Arc::new(quote_currency.finish()),
        Arc::new(price_precision.finish()),
        Arc::new(size_precision.finish()),
        Arc::new(tick_size.finish()),
        Arc::new(step_size.finish()),
        Arc::new(ts_init.finish()),
    ])
}
