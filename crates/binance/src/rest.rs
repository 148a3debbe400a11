use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::BinanceError;
use crate::messages::{ExchangeInfo, RestErrorBody, SymbolInfo};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const EXCHANGE_INFO_PATH: &str = "/fapi/v1/exchangeInfo";
const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// Binance USD-M futures REST client for instrument definitions.
///
/// `exchangeInfo` is fetched once and cached for the life of the client.
pub struct BinanceRestClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    symbols: Mutex<Option<Arc<HashMap<String, SymbolInfo>>>>,
}

impl BinanceRestClient {
    /// `base_url` should be either:
    /// - `https://fapi.binance.com` for production
    /// - `https://testnet.binancefuture.com` for testnet
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, BinanceError> {
        let http = Client::builder().timeout(DEFAULT_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            symbols: Mutex::new(None),
        })
    }

    /// Definition for one exchange symbol (e.g. `ADAUSDT`)
    pub async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, BinanceError> {
        let symbols = self.load_symbols().await?;
        symbols
            .get(symbol)
            .cloned()
            .ok_or_else(|| BinanceError::UnknownSymbol(symbol.to_string()))
    }

    async fn load_symbols(&self) -> Result<Arc<HashMap<String, SymbolInfo>>, BinanceError> {
        let mut cached = self.symbols.lock().await;
        if let Some(symbols) = cached.as_ref() {
            return Ok(Arc::clone(symbols));
        }

        let info = self.exchange_info().await?;
        let symbols: HashMap<String, SymbolInfo> = info
            .symbols
            .into_iter()
            .map(|s| (s.symbol.clone(), s))
            .collect();
        info!(count = symbols.len(), "Loaded exchange info");

        let symbols = Arc::new(symbols);
        *cached = Some(Arc::clone(&symbols));
        Ok(symbols)
    }

    async fn exchange_info(&self) -> Result<ExchangeInfo, BinanceError> {
        let url = format!("{}{}", self.base_url, EXCHANGE_INFO_PATH);
        debug!(url = %url, "GET request");

        let mut request = self.http.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }
        let resp = request.send().await?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(match serde_json::from_str::<RestErrorBody>(&body) {
                Ok(err) => BinanceError::Server {
                    code: err.code,
                    msg: err.msg,
                },
                Err(_) => BinanceError::Server {
                    code: i64::from(status.as_u16()),
                    msg: body,
                },
            });
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn exchange_info_body() -> serde_json::Value {
        serde_json::json!({
            "timezone": "UTC",
            "serverTime": 1700000000000u64,
            "symbols": [{
                "symbol": "ADAUSDT",
                "pair": "ADAUSDT",
                "contractType": "PERPETUAL",
                "status": "TRADING",
                "baseAsset": "ADA",
                "quoteAsset": "USDT",
                "pricePrecision": 4,
                "quantityPrecision": 0,
                "filters": [
                    {"filterType": "PRICE_FILTER", "minPrice": "0.0001", "maxPrice": "100", "tickSize": "0.0001"},
                    {"filterType": "LOT_SIZE", "minQty": "1", "maxQty": "1000000", "stepSize": "1"},
                    {"filterType": "MIN_NOTIONAL", "notional": "5"}
                ]
            }]
        })
    }

    #[tokio::test]
    async fn test_symbol_info_sends_key_and_caches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(EXCHANGE_INFO_PATH))
            .and(header(API_KEY_HEADER, "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(exchange_info_body()))
            .expect(1)
            .mount(&server)
            .await;

        let client = BinanceRestClient::new(server.uri(), Some("test-key".to_string())).unwrap();
        let info = client.symbol_info("ADAUSDT").await.unwrap();
        assert_eq!(info.tick_size(), Some(Decimal::new(1, 4)));
        assert_eq!(info.base_asset, "ADA");

        // Second lookup is served from the cache
        assert!(matches!(
            client.symbol_info("DOGEUSDT").await,
            Err(BinanceError::UnknownSymbol(_))
        ));
    }

    #[tokio::test]
    async fn test_server_error_body_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(EXCHANGE_INFO_PATH))
            .respond_with(ResponseTemplate::new(418).set_body_json(serde_json::json!({
                "code": -1003,
                "msg": "Way too many requests"
            })))
            .mount(&server)
            .await;

        let client = BinanceRestClient::new(server.uri(), None).unwrap();
        match client.symbol_info("ADAUSDT").await {
            Err(BinanceError::Server { code, .. }) => assert_eq!(code, -1003),
            other => panic!("expected server error, got {:?}", other),
        }
    }
}
