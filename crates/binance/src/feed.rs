//! Binance USD-M futures WebSocket feed.
//!
//! Connects to the raw stream endpoint (`/ws`) and multiplexes every
//! subscription over one socket with `SUBSCRIBE`/`UNSUBSCRIBE` requests:
//! {"method":"SUBSCRIBE","params":["adausdt@bookTicker"],"id":1}
//!
//! Instrument definitions come from REST `exchangeInfo` and are delivered on
//! the same event channel as stream data.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async_with_config, tungstenite, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use mdbridge_lib::{FeedClient, FeedError, Subscription};
use mdbridge_model::MarketEvent;

use crate::dispatcher::Dispatcher;
use crate::error::BinanceError;
use crate::messages::StreamRequest;
use crate::parse::{parse_instrument, raw_symbol, stream_name};
use crate::rest::BinanceRestClient;

pub const BINANCE_FUTURES_WS_URL: &str = "wss://fstream.binance.com/ws";
pub const BINANCE_FUTURES_HTTP_URL: &str = "https://fapi.binance.com";
pub const BINANCE_FUTURES_TESTNET_WS_URL: &str = "wss://fstream.binancefuture.com/ws";
pub const BINANCE_FUTURES_TESTNET_HTTP_URL: &str = "https://testnet.binancefuture.com";

const MAX_MESSAGE_SIZE: usize = 1024 * 1024; // 1 MiB
const CHANNEL_BUFFER_SIZE: usize = 4096;
/// Server pings every 3 minutes; anything longer than that without a frame
/// means the socket is dead.
const READ_TIMEOUT: Duration = Duration::from_secs(600);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, tungstenite::Message>;

/// Endpoints and credentials for one feed.
#[derive(Debug, Clone)]
pub struct BinanceFeedConfig {
    pub ws_url: String,
    pub http_url: String,
    pub api_key: Option<String>,
    /// How long a SUBSCRIBE/UNSUBSCRIBE waits for its response
    pub request_timeout: Duration,
}

impl BinanceFeedConfig {
    pub fn production() -> Self {
        Self {
            ws_url: BINANCE_FUTURES_WS_URL.to_string(),
            http_url: BINANCE_FUTURES_HTTP_URL.to_string(),
            api_key: None,
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn testnet() -> Self {
        Self {
            ws_url: BINANCE_FUTURES_TESTNET_WS_URL.to_string(),
            http_url: BINANCE_FUTURES_TESTNET_HTTP_URL.to_string(),
            ..Self::production()
        }
    }
}

impl Default for BinanceFeedConfig {
    fn default() -> Self {
        Self::production()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

pub struct BinanceFeed {
    config: BinanceFeedConfig,
    rest: BinanceRestClient,
    dispatcher: Arc<Dispatcher>,
    sink: Arc<tokio::sync::Mutex<Option<WsSink>>>,
    /// Weak so the channel closes when the reader task exits
    events_tx: Mutex<Option<mpsc::WeakSender<MarketEvent>>>,
    events_rx: Mutex<Option<mpsc::Receiver<MarketEvent>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    connected: Arc<AtomicBool>,
    next_id: AtomicU64,
}

impl BinanceFeed {
    pub fn new(config: BinanceFeedConfig) -> Result<Self, BinanceError> {
        let rest = BinanceRestClient::new(config.http_url.clone(), config.api_key.clone())?;
        Ok(Self {
            config,
            rest,
            dispatcher: Arc::new(Dispatcher::new()),
            sink: Arc::new(tokio::sync::Mutex::new(None)),
            events_tx: Mutex::new(None),
            events_rx: Mutex::new(None),
            reader: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Number of streams currently routed
    pub fn stream_count(&self) -> usize {
        self.dispatcher.route_count()
    }

    async fn open(&self) -> Result<(), BinanceError> {
        let url = self.config.ws_url.as_str();
        let ws_config = tungstenite::protocol::WebSocketConfig {
            max_message_size: Some(MAX_MESSAGE_SIZE),
            ..Default::default()
        };

        info!(url = %url, "Connecting to Binance Futures WS");
        let (ws, _) = connect_async_with_config(url, Some(ws_config), false).await?;
        info!("Connected to Binance Futures WS");

        let (sink, stream) = ws.split();
        *self.sink.lock().await = Some(sink);

        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        *lock(&self.events_tx) = Some(tx.downgrade());
        *lock(&self.events_rx) = Some(rx);
        self.connected.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(read_loop(
            stream,
            Arc::clone(&self.sink),
            Arc::clone(&self.dispatcher),
            tx,
            Arc::clone(&self.connected),
        ));
        *lock(&self.reader) = Some(handle);
        Ok(())
    }

    /// Send a request and wait for the response with the same id
    async fn request(&self, method: &'static str, stream: &str) -> Result<(), BinanceError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = match method {
            "SUBSCRIBE" => StreamRequest::subscribe(stream, id),
            _ => StreamRequest::unsubscribe(stream, id),
        };
        let text = serde_json::to_string(&request)?;
        let reply = self.dispatcher.expect_reply(id);

        {
            let mut sink = self.sink.lock().await;
            let Some(sink) = sink.as_mut() else {
                self.dispatcher.forget_reply(id);
                return Err(BinanceError::NotConnected);
            };
            debug!(method, stream, id, "Sending stream request");
            if let Err(e) = sink.send(tungstenite::Message::Text(text)).await {
                self.dispatcher.forget_reply(id);
                return Err(e.into());
            }
        }

        let limit = self.config.request_timeout;
        match timeout(limit, reply).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BinanceError::ConnectionClosed),
            Err(_) => {
                self.dispatcher.forget_reply(id);
                Err(BinanceError::Timeout(limit))
            }
        }
    }

    async fn send_instrument(&self, subscription: &Subscription) -> Result<(), BinanceError> {
        let instrument_id = subscription.instrument_id().clone();
        let symbol = raw_symbol(&instrument_id)?;
        let info = self.rest.symbol_info(&symbol).await?;
        let instrument = parse_instrument(&info, instrument_id, now_nanos())?;

        let tx = lock(&self.events_tx)
            .as_ref()
            .and_then(|weak| weak.upgrade())
            .ok_or(BinanceError::NotConnected)?;
        tx.send(MarketEvent::Instrument(instrument))
            .await
            .map_err(|_| BinanceError::ConnectionClosed)
    }

    async fn subscribe_inner(&self, subscription: &Subscription) -> Result<(), BinanceError> {
        if !self.is_connected() {
            return Err(BinanceError::NotConnected);
        }
        let Some(stream) = stream_name(subscription)? else {
            return self.send_instrument(subscription).await;
        };

        // Route before the request so no early payload is dropped
        let added = self.dispatcher.add_route(stream.clone(), subscription.clone())?;
        if let Err(e) = self.request("SUBSCRIBE", &stream).await {
            if added {
                self.dispatcher.remove_route(&stream);
            }
            return Err(e);
        }
        info!(stream = %stream, "Subscribed to Binance stream");
        Ok(())
    }

    async fn unsubscribe_inner(&self, subscription: &Subscription) -> Result<(), BinanceError> {
        let Some(stream) = stream_name(subscription)? else {
            // Instrument definitions are one-shot
            return Ok(());
        };
        if !self.is_connected() {
            return Err(BinanceError::NotConnected);
        }
        self.request("UNSUBSCRIBE", &stream).await?;
        self.dispatcher.remove_route(&stream);
        info!(stream = %stream, "Unsubscribed from Binance stream");
        Ok(())
    }
}

#[async_trait]
impl FeedClient for BinanceFeed {
    async fn connect(&self) -> Result<(), FeedError> {
        if self.is_connected() {
            return Ok(());
        }
        Ok(self.open().await?)
    }

    async fn subscribe(&self, subscription: &Subscription) -> Result<(), FeedError> {
        Ok(self.subscribe_inner(subscription).await?)
    }

    async fn unsubscribe(&self, subscription: &Subscription) -> Result<(), FeedError> {
        Ok(self.unsubscribe_inner(subscription).await?)
    }

    fn events(&self) -> Option<mpsc::Receiver<MarketEvent>> {
        lock(&self.events_rx).take()
    }

    async fn close(&self) -> Result<(), FeedError> {
        self.connected.store(false, Ordering::SeqCst);
        let sink = self.sink.lock().await.take();
        let result = match sink {
            Some(mut sink) => sink.close().await.map_err(BinanceError::from),
            None => Ok(()),
        };
        if let Some(handle) = lock(&self.reader).take() {
            handle.abort();
        }
        self.dispatcher.fail_pending();
        *lock(&self.events_tx) = None;
        info!("Binance feed closed");
        Ok(result?)
    }
}

/// Reads frames until the socket closes. Dropping `tx` on exit closes the
/// event channel, which the host treats as a disconnect.
async fn read_loop(
    mut stream: SplitStream<WsStream>,
    sink: Arc<tokio::sync::Mutex<Option<WsSink>>>,
    dispatcher: Arc<Dispatcher>,
    tx: mpsc::Sender<MarketEvent>,
    connected: Arc<AtomicBool>,
) {
    loop {
        let frame = match timeout(READ_TIMEOUT, stream.next()).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                warn!("Binance stream ended");
                break;
            }
            Err(_) => {
                error!(timeout = ?READ_TIMEOUT, "No frame from Binance within read timeout");
                break;
            }
        };

        match frame {
            Ok(tungstenite::Message::Text(text)) => {
                match dispatcher.handle_text(&text, now_nanos()) {
                    Ok(Some(event)) => {
                        if tx.send(event).await.is_err() {
                            debug!("Event receiver dropped");
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, raw = %text, "Failed to parse Binance message"),
                }
            }
            Ok(tungstenite::Message::Ping(data)) => {
                if let Some(sink) = sink.lock().await.as_mut() {
                    if let Err(e) = sink.send(tungstenite::Message::Pong(data)).await {
                        warn!(error = %e, "Failed to answer ping");
                    }
                }
            }
            Ok(tungstenite::Message::Close(frame)) => {
                info!(frame = ?frame, "Binance closed the connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "Binance WebSocket error");
                break;
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
    dispatcher.fail_pending();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_presets() {
        let prod = BinanceFeedConfig::production();
        assert_eq!(prod.ws_url, "wss://fstream.binance.com/ws");
        assert_eq!(prod.http_url, "https://fapi.binance.com");

        let testnet = BinanceFeedConfig::testnet();
        assert_eq!(testnet.ws_url, "wss://fstream.binancefuture.com/ws");
        assert_eq!(testnet.request_timeout, prod.request_timeout);
    }

    #[tokio::test]
    async fn test_subscribe_before_connect_fails() {
        let feed = BinanceFeed::new(BinanceFeedConfig::production()).unwrap();
        let id = "ADAUSDT-PERP.BINANCE".parse().unwrap();
        let result = feed.subscribe(&Subscription::Quotes(id)).await;
        assert!(matches!(result, Err(FeedError::NotConnected)));
        assert!(feed.events().is_none());
    }

    #[tokio::test]
    async fn test_close_without_connect_is_ok() {
        let feed = BinanceFeed::new(BinanceFeedConfig::testnet()).unwrap();
        assert!(feed.close().await.is_ok());
        assert!(feed.close().await.is_ok());
    }
}
