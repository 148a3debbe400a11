//! Binance USD-M futures WebSocket and REST message types.
//!
//! Raw streams on `/ws` deliver payloads unwrapped, tagged by `"e"`:
//! - bookTicker: {"e":"bookTicker","u":1,"E":1,"T":1,"s":"ADAUSDT","b":"0.35","B":"10","a":"0.36","A":"20"}
//! - aggTrade:   {"e":"aggTrade","E":1,"a":5,"s":"ADAUSDT","p":"0.35","q":"100","f":1,"l":2,"T":1,"m":true}
//! - depthUpdate: {"e":"depthUpdate","E":1,"T":1,"s":"ADAUSDT","U":1,"u":2,"pu":0,"b":[["0.35","10"]],"a":[]}
//! - kline:      {"e":"kline","E":1,"s":"ADAUSDT","k":{"t":0,"T":59999,"i":"1m","o":"0.35",...,"x":true}}
//!
//! Requests are answered with {"result":null,"id":1} or
//! {"error":{"code":2,"msg":"Invalid request"},"id":1}.
//!
//! Reference: https://developers.binance.com/docs/derivatives/usds-margined-futures/websocket-market-streams

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// SUBSCRIBE / UNSUBSCRIBE request frame
#[derive(Debug, Clone, Serialize)]
pub struct StreamRequest<'a> {
    pub method: &'static str,
    pub params: Vec<&'a str>,
    pub id: u64,
}

impl<'a> StreamRequest<'a> {
    pub fn subscribe(stream: &'a str, id: u64) -> Self {
        Self {
            method: "SUBSCRIBE",
            params: vec![stream],
            id,
        }
    }

    pub fn unsubscribe(stream: &'a str, id: u64) -> Self {
        Self {
            method: "UNSUBSCRIBE",
            params: vec![stream],
            id,
        }
    }
}

/// Top-level message from the raw stream endpoint.
/// Uses `#[serde(untagged)]`: Response must come first, only it carries "id".
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BinanceWsMessage {
    Response(WsResponse),
    Event(StreamEvent),
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsResponse {
    pub id: u64,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<WsErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsErrorBody {
    pub code: i64,
    pub msg: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "e")]
pub enum StreamEvent {
    #[serde(rename = "bookTicker")]
    BookTicker(BookTicker),
    #[serde(rename = "aggTrade")]
    AggTrade(AggTrade),
    #[serde(rename = "depthUpdate")]
    DepthUpdate(DepthUpdate),
    #[serde(rename = "kline")]
    Kline(KlineEvent),
}

impl StreamEvent {
    pub fn symbol(&self) -> &str {
        match self {
            Self::BookTicker(m) => &m.symbol,
            Self::AggTrade(m) => &m.symbol,
            Self::DepthUpdate(m) => &m.symbol,
            Self::Kline(m) => &m.symbol,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookTicker {
    #[serde(rename = "u")]
    pub update_id: u64,
    #[serde(rename = "E")]
    pub event_time: u64,
    #[serde(rename = "T")]
    pub transaction_time: u64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "b")]
    pub bid_price: Decimal,
    #[serde(rename = "B")]
    pub bid_qty: Decimal,
    #[serde(rename = "a")]
    pub ask_price: Decimal,
    #[serde(rename = "A")]
    pub ask_qty: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggTrade {
    #[serde(rename = "E")]
    pub event_time: u64,
    #[serde(rename = "a")]
    pub agg_trade_id: u64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "p")]
    pub price: Decimal,
    #[serde(rename = "q")]
    pub quantity: Decimal,
    #[serde(rename = "T")]
    pub trade_time: u64,
    /// True when the buyer was the resting (maker) side
    #[serde(rename = "m")]
    pub buyer_is_maker: bool,
}

/// One `[price, quantity]` level
pub type PriceLevel = (Decimal, Decimal);

#[derive(Debug, Clone, Deserialize)]
pub struct DepthUpdate {
    #[serde(rename = "E")]
    pub event_time: u64,
    #[serde(rename = "T")]
    pub transaction_time: u64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "U")]
    pub first_update_id: u64,
    #[serde(rename = "u")]
    pub final_update_id: u64,
    #[serde(rename = "b")]
    pub bids: Vec<PriceLevel>,
    #[serde(rename = "a")]
    pub asks: Vec<PriceLevel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KlineEvent {
    #[serde(rename = "E")]
    pub event_time: u64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "k")]
    pub kline: Kline,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Kline {
    #[serde(rename = "t")]
    pub open_time: u64,
    #[serde(rename = "T")]
    pub close_time: u64,
    #[serde(rename = "i")]
    pub interval: String,
    #[serde(rename = "o")]
    pub open: Decimal,
    #[serde(rename = "h")]
    pub high: Decimal,
    #[serde(rename = "l")]
    pub low: Decimal,
    #[serde(rename = "c")]
    pub close: Decimal,
    #[serde(rename = "v")]
    pub volume: Decimal,
    #[serde(rename = "x")]
    pub is_closed: bool,
}

/// `GET /fapi/v1/exchangeInfo` response (fields the bridge uses)
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    #[serde(default)]
    pub contract_type: String,
    #[serde(default)]
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub price_precision: u8,
    pub quantity_precision: u8,
    #[serde(default)]
    pub filters: Vec<SymbolFilter>,
}

impl SymbolInfo {
    pub fn tick_size(&self) -> Option<Decimal> {
        self.filters.iter().find_map(|f| match f {
            SymbolFilter::PriceFilter { tick_size } => Some(*tick_size),
            _ => None,
        })
    }

    pub fn step_size(&self) -> Option<Decimal> {
        self.filters.iter().find_map(|f| match f {
            SymbolFilter::LotSize { step_size } => Some(*step_size),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "filterType")]
pub enum SymbolFilter {
    #[serde(rename = "PRICE_FILTER")]
    PriceFilter {
        #[serde(rename = "tickSize")]
        tick_size: Decimal,
    },
    #[serde(rename = "LOT_SIZE")]
    LotSize {
        #[serde(rename = "stepSize")]
        step_size: Decimal,
    },
    #[serde(other)]
    Other,
}

/// REST error body: {"code":-1121,"msg":"Invalid symbol."}
#[derive(Debug, Clone, Deserialize)]
pub struct RestErrorBody {
    pub code: i64,
    pub msg: String,
}
