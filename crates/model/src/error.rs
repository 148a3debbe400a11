use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty identifier")]
    Empty,
    #[error("missing '{separator}' separator in '{input}'")]
    MissingSeparator { input: String, separator: char },
    #[error("invalid symbol '{0}'")]
    InvalidSymbol(String),
    #[error("invalid venue '{0}'")]
    InvalidVenue(String),
    #[error("invalid bar step '{0}': expected a positive integer")]
    InvalidStep(String),
    #[error("unknown bar aggregation '{0}'")]
    UnknownAggregation(String),
    #[error("unknown price type '{0}'")]
    UnknownPriceType(String),
    #[error("unknown aggregation source '{0}'")]
    UnknownAggregationSource(String),
}
