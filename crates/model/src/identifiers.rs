//! Instrument and bar-series identifiers.
//!
//! Formats:
//! - Instrument: `{SYMBOL}.{VENUE}`, e.g. `ADAUSDT-PERP.BINANCE`
//! - Bar type: `{INSTRUMENT}-{STEP}-{AGGREGATION}-{PRICE_TYPE}-{SOURCE}`,
//!   e.g. `ADAUSDT-PERP.BINANCE-1-MINUTE-LAST-EXTERNAL`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::enums::{AggregationSource, BarAggregation, ContractType, PriceType};
use crate::error::ParseError;

/// Resolved identifier for a tradable instrument. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct InstrumentId {
    symbol: String,
    venue: String,
}

impl InstrumentId {
    pub fn new(symbol: impl Into<String>, venue: impl Into<String>) -> Result<Self, ParseError> {
        let symbol = symbol.into();
        let venue = venue.into();
        validate_symbol(&symbol)?;
        validate_venue(&venue)?;
        Ok(Self { symbol, venue })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn venue(&self) -> &str {
        &self.venue
    }

    /// Contract type implied by the symbol suffix.
    pub fn contract_type(&self) -> ContractType {
        if self.symbol.ends_with("-PERP") {
            return ContractType::Perpetual;
        }
        match self.symbol.rsplit_once('_') {
            Some((_, expiry)) if expiry.len() == 6 && expiry.bytes().all(|b| b.is_ascii_digit()) => {
                ContractType::Delivery
            }
            _ => ContractType::Spot,
        }
    }
}

/// Symbols become catalog directory names, so path separators are refused.
fn validate_symbol(symbol: &str) -> Result<(), ParseError> {
    if symbol.is_empty()
        || symbol
            .chars()
            .any(|c| c.is_whitespace() || c == '/' || c == '\\')
    {
        return Err(ParseError::InvalidSymbol(symbol.to_string()));
    }
    Ok(())
}

fn validate_venue(venue: &str) -> Result<(), ParseError> {
    if venue.is_empty() || !venue.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ParseError::InvalidVenue(venue.to_string()));
    }
    Ok(())
}

impl FromStr for InstrumentId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseError::Empty);
        }
        let (symbol, venue) = s.rsplit_once('.').ok_or_else(|| ParseError::MissingSeparator {
            input: s.to_string(),
            separator: '.',
        })?;
        Self::new(symbol, venue)
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.symbol, self.venue)
    }
}

impl From<InstrumentId> for String {
    fn from(id: InstrumentId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for InstrumentId {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Interval, aggregation method and price basis of a bar series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BarSpecification {
    pub step: u64,
    pub aggregation: BarAggregation,
    pub price_type: PriceType,
}

impl BarSpecification {
    pub fn new(step: u64, aggregation: BarAggregation, price_type: PriceType) -> Result<Self, ParseError> {
        if step == 0 {
            return Err(ParseError::InvalidStep(step.to_string()));
        }
        Ok(Self {
            step,
            aggregation,
            price_type,
        })
    }
}

impl fmt::Display for BarSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.step, self.aggregation, self.price_type)
    }
}

fn parse_step(s: &str) -> Result<u64, ParseError> {
    match s.parse::<u64>() {
        Ok(step) if step > 0 => Ok(step),
        _ => Err(ParseError::InvalidStep(s.to_string())),
    }
}

/// Resolved identifier for a derived OHLCV series. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct BarType {
    instrument_id: InstrumentId,
    spec: BarSpecification,
    source: AggregationSource,
}

impl BarType {
    pub fn new(instrument_id: InstrumentId, spec: BarSpecification, source: AggregationSource) -> Self {
        Self {
            instrument_id,
            spec,
            source,
        }
    }

    /// Combine an instrument with a `{STEP}-{AGGREGATION}-{PRICE_TYPE}-{SOURCE}` descriptor.
    pub fn for_instrument(instrument_id: &InstrumentId, descriptor: &str) -> Result<Self, ParseError> {
        format!("{}-{}", instrument_id, descriptor.trim()).parse()
    }

    pub fn instrument_id(&self) -> &InstrumentId {
        &self.instrument_id
    }

    pub fn spec(&self) -> &BarSpecification {
        &self.spec
    }

    pub fn source(&self) -> AggregationSource {
        self.source
    }
}

impl FromStr for BarType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseError::Empty);
        }

        // Split from the right so hyphens inside the symbol survive
        let mut parts = s.rsplitn(5, '-');
        let mut next = || {
            parts.next().ok_or_else(|| ParseError::MissingSeparator {
                input: s.to_string(),
                separator: '-',
            })
        };
        let source = next()?;
        let price_type = next()?;
        let aggregation = next()?;
        let step = next()?;
        let instrument = next()?;

        let spec = BarSpecification {
            step: parse_step(step)?,
            aggregation: aggregation.parse()?,
            price_type: price_type.parse()?,
        };

        Ok(Self {
            instrument_id: instrument.parse()?,
            spec,
            source: source.parse()?,
        })
    }
}

impl fmt::Display for BarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.instrument_id, self.spec, self.source)
    }
}

impl From<BarType> for String {
    fn from(bar_type: BarType) -> Self {
        bar_type.to_string()
    }
}

impl TryFrom<String> for BarType {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
