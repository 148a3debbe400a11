//! mdbridge-binance: Binance USD-M futures feed
//!
//! Streams quotes, trades, book diffs and klines over one WebSocket and
//! fetches instrument definitions from REST `exchangeInfo`.

pub mod dispatcher;
pub mod error;
pub mod feed;
pub mod messages;
pub mod parse;
pub mod rest;

pub use error::BinanceError;
pub use feed::{
    BinanceFeed, BinanceFeedConfig, BINANCE_FUTURES_HTTP_URL, BINANCE_FUTURES_TESTNET_HTTP_URL,
    BINANCE_FUTURES_TESTNET_WS_URL, BINANCE_FUTURES_WS_URL,
};
pub use rest::BinanceRestClient;
