use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;

/// Contract type, derived from the venue symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractType {
    Spot,
    Perpetual,
    Delivery,
}

impl ContractType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::Perpetual => "perpetual",
            Self::Delivery => "delivery",
        }
    }
}

impl fmt::Display for ContractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BarAggregation {
    Tick,
    Volume,
    Value,
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl BarAggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tick => "TICK",
            Self::Volume => "VOLUME",
            Self::Value => "VALUE",
            Self::Millisecond => "MILLISECOND",
            Self::Second => "SECOND",
            Self::Minute => "MINUTE",
            Self::Hour => "HOUR",
            Self::Day => "DAY",
            Self::Week => "WEEK",
            Self::Month => "MONTH",
        }
    }
}

impl FromStr for BarAggregation {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TICK" => Ok(Self::Tick),
            "VOLUME" => Ok(Self::Volume),
            "VALUE" => Ok(Self::Value),
            "MILLISECOND" => Ok(Self::Millisecond),
            "SECOND" => Ok(Self::Second),
            "MINUTE" => Ok(Self::Minute),
            "HOUR" => Ok(Self::Hour),
            "DAY" => Ok(Self::Day),
            "WEEK" => Ok(Self::Week),
            "MONTH" => Ok(Self::Month),
            other => Err(ParseError::UnknownAggregation(other.to_string())),
        }
    }
}

impl fmt::Display for BarAggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Price basis a bar is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceType {
    Bid,
    Ask,
    Mid,
    Last,
    Mark,
}

impl PriceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bid => "BID",
            Self::Ask => "ASK",
            Self::Mid => "MID",
            Self::Last => "LAST",
            Self::Mark => "MARK",
        }
    }
}

impl FromStr for PriceType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BID" => Ok(Self::Bid),
            "ASK" => Ok(Self::Ask),
            "MID" => Ok(Self::Mid),
            "LAST" => Ok(Self::Last),
            "MARK" => Ok(Self::Mark),
            other => Err(ParseError::UnknownPriceType(other.to_string())),
        }
    }
}

impl fmt::Display for PriceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether bars are aggregated by the venue or locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregationSource {
    External,
    Internal,
}

impl AggregationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::External => "EXTERNAL",
            Self::Internal => "INTERNAL",
        }
    }
}

impl FromStr for AggregationSource {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EXTERNAL" => Ok(Self::External),
            "INTERNAL" => Ok(Self::Internal),
            other => Err(ParseError::UnknownAggregationSource(other.to_string())),
        }
    }
}

impl fmt::Display for AggregationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggressorSide {
    Buyer,
    Seller,
    NoAggressor,
}

impl AggressorSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buyer => "buyer",
            Self::Seller => "seller",
            Self::NoAggressor => "no_aggressor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookAction {
    Add,
    Update,
    Delete,
    Clear,
}

impl BookAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Clear => "clear",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookSide {
    Bid,
    Ask,
}

impl BookSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bid => "bid",
            Self::Ask => "ask",
        }
    }
}

/// Order book granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookType {
    /// Top of book, market by price
    #[serde(rename = "L1_MBP")]
    L1Mbp,
    /// Aggregated price levels, market by price
    #[serde(rename = "L2_MBP")]
    L2Mbp,
    /// Individual orders, market by order
    #[serde(rename = "L3_MBO")]
    L3Mbo,
}

impl BookType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::L1Mbp => "L1_MBP",
            Self::L2Mbp => "L2_MBP",
            Self::L3Mbo => "L3_MBO",
        }
    }
}

impl fmt::Display for BookType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregation_parse_is_case_sensitive() {
        assert_eq!("MINUTE".parse::<BarAggregation>().unwrap(), BarAggregation::Minute);
        assert!("minute".parse::<BarAggregation>().is_err());
    }

    #[test]
    fn test_book_type_serializes_as_venue_name() {
        let json = serde_json::to_string(&BookType::L2Mbp).unwrap();
        assert_eq!(json, "\"L2_MBP\"");
    }
}
