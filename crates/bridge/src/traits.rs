use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc;

use mdbridge_model::{BarType, BookType, Category, InstrumentId, MarketEvent};

use crate::error::{FeedError, ResolverError};

/// One stream the bridge asks the feed for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subscription {
    Instrument(InstrumentId),
    Quotes(InstrumentId),
    Trades(InstrumentId),
    /// `depth == 0` means full depth
    BookDeltas {
        instrument_id: InstrumentId,
        book_type: BookType,
        depth: u32,
    },
    Bars(BarType),
}

impl Subscription {
    /// Category of the events this subscription produces
    pub fn category(&self) -> Category {
        match self {
            Self::Instrument(_) => Category::Instrument,
            Self::Quotes(_) => Category::Quote,
            Self::Trades(_) => Category::Trade,
            Self::BookDeltas { .. } => Category::BookDelta,
            Self::Bars(_) => Category::Bar,
        }
    }

    /// Instrument id, or bar-type string for bar subscriptions
    pub fn target(&self) -> String {
        match self {
            Self::Instrument(id) | Self::Quotes(id) | Self::Trades(id) => id.to_string(),
            Self::BookDeltas { instrument_id, .. } => instrument_id.to_string(),
            Self::Bars(bar_type) => bar_type.to_string(),
        }
    }

    pub fn instrument_id(&self) -> &InstrumentId {
        match self {
            Self::Instrument(id) | Self::Quotes(id) | Self::Trades(id) => id,
            Self::BookDeltas { instrument_id, .. } => instrument_id,
            Self::Bars(bar_type) => bar_type.instrument_id(),
        }
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.category(), self.target())
    }
}

/// Feed trait for market data sources (Binance, in-memory, etc.)
///
/// Methods take `&self` so one client can be shared between the
/// subscription roster and the host loop.
#[async_trait]
pub trait FeedClient: Send + Sync {
    /// Establish connection to the data source
    async fn connect(&self) -> Result<(), FeedError>;

    /// Start delivering events for a subscription
    async fn subscribe(&self, subscription: &Subscription) -> Result<(), FeedError>;

    /// Stop delivering events for a subscription
    async fn unsubscribe(&self, subscription: &Subscription) -> Result<(), FeedError>;

    /// Take the receiver for incoming events. Returns `None` once taken.
    fn events(&self) -> Option<mpsc::Receiver<MarketEvent>>;

    /// Close the connection
    async fn close(&self) -> Result<(), FeedError>;
}

/// KeyResolver trait for credential sources (env vars, Vault, etc.)
pub trait KeyResolver: Send + Sync {
    /// Resolve keys from a source string (e.g., "env:VAR1,VAR2")
    fn resolve(&self, source: &str) -> Result<HashMap<String, String>, ResolverError>;
}
