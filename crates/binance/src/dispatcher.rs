//! Routes inbound frames: request responses to their waiting caller,
//! stream payloads to bridge events.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use mdbridge_lib::Subscription;
use mdbridge_model::MarketEvent;

use crate::error::BinanceError;
use crate::messages::{BinanceWsMessage, StreamEvent, WsResponse};
use crate::parse::{parse_depth, parse_kline, parse_quote, parse_trade};

type Reply = oneshot::Sender<Result<(), BinanceError>>;

#[derive(Default)]
pub struct Dispatcher {
    /// Stream name -> subscription that requested it
    routes: DashMap<String, Subscription>,
    /// Request id -> caller awaiting the response
    pending: DashMap<u64, Reply>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `stream` to `subscription`. Returns whether a new route was
    /// added. A stream already routed to a different subscription is refused,
    /// e.g. `ADAUSDT.BINANCE` and `ADAUSDT-PERP.BINANCE` share one stream.
    pub fn add_route(&self, stream: String, subscription: Subscription) -> Result<bool, BinanceError> {
        match self.routes.entry(stream) {
            Entry::Occupied(existing) if *existing.get() == subscription => Ok(false),
            Entry::Occupied(existing) => Err(BinanceError::StreamInUse {
                stream: existing.key().clone(),
                owner: existing.get().to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(subscription);
                Ok(true)
            }
        }
    }

    pub fn remove_route(&self, stream: &str) -> Option<Subscription> {
        self.routes.remove(stream).map(|(_, sub)| sub)
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn expect_reply(&self, id: u64) -> oneshot::Receiver<Result<(), BinanceError>> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        rx
    }

    pub fn forget_reply(&self, id: u64) {
        self.pending.remove(&id);
    }

    /// Fail every outstanding request, e.g. when the socket goes away
    pub fn fail_pending(&self) {
        let ids: Vec<u64> = self.pending.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, reply)) = self.pending.remove(&id) {
                let _ = reply.send(Err(BinanceError::ConnectionClosed));
            }
        }
    }

    /// Handle one text frame. Returns the event to deliver, if any.
    pub fn handle_text(&self, text: &str, ts_init: u64) -> Result<Option<MarketEvent>, BinanceError> {
        match serde_json::from_str::<BinanceWsMessage>(text)? {
            BinanceWsMessage::Response(response) => {
                self.resolve(response);
                Ok(None)
            }
            BinanceWsMessage::Event(event) => Ok(self.convert(event, ts_init)),
        }
    }

    fn resolve(&self, response: WsResponse) {
        let Some((_, reply)) = self.pending.remove(&response.id) else {
            debug!(id = response.id, "Response for unknown request id");
            return;
        };
        let result = match response.error {
            Some(err) => Err(BinanceError::Server {
                code: err.code,
                msg: err.msg,
            }),
            None => Ok(()),
        };
        let _ = reply.send(result);
    }

    fn convert(&self, event: StreamEvent, ts_init: u64) -> Option<MarketEvent> {
        let stream = stream_of(&event);
        let Some(subscription) = self.routes.get(&stream).map(|r| r.value().clone()) else {
            trace!(stream = %stream, "Dropping payload for unrouted stream");
            return None;
        };

        match (event, subscription) {
            (StreamEvent::BookTicker(msg), Subscription::Quotes(id)) => {
                Some(MarketEvent::Quote(parse_quote(&msg, id, ts_init)))
            }
            (StreamEvent::AggTrade(msg), Subscription::Trades(id)) => {
                Some(MarketEvent::Trade(parse_trade(&msg, id, ts_init)))
            }
            (StreamEvent::DepthUpdate(msg), Subscription::BookDeltas { .. })
                if msg.bids.is_empty() && msg.asks.is_empty() =>
            {
                trace!(stream = %stream, update_id = msg.final_update_id, "Skipping empty depth update");
                None
            }
            (StreamEvent::DepthUpdate(msg), Subscription::BookDeltas { instrument_id, .. }) => {
                Some(MarketEvent::BookDeltas(parse_depth(&msg, instrument_id, ts_init)))
            }
            (StreamEvent::Kline(msg), Subscription::Bars(bar_type)) => {
                parse_kline(&msg, bar_type, ts_init).map(MarketEvent::Bar)
            }
            (_, subscription) => {
                warn!(stream = %stream, subscription = %subscription, "Payload does not match its route");
                None
            }
        }
    }
}

/// Stream name a payload arrived on, rebuilt from its contents
fn stream_of(event: &StreamEvent) -> String {
    let symbol = event.symbol().to_lowercase();
    match event {
        StreamEvent::BookTicker(_) => format!("{}@bookTicker", symbol),
        StreamEvent::AggTrade(_) => format!("{}@aggTrade", symbol),
        StreamEvent::DepthUpdate(_) => format!("{}@depth@100ms", symbol),
        StreamEvent::Kline(k) => format!("{}@kline_{}", symbol, k.kline.interval),
    }
}
