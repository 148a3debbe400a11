use std::time::Duration;

use thiserror::Error;

use mdbridge_catalog::CatalogError;
use mdbridge_model::{Category, ParseError};

/// Errors raised by a feed collaborator.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("unsupported target: {0}")]
    Unsupported(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("feed is not connected")]
    NotConnected,
    #[error("disconnected: {0}")]
    Disconnected(String),
}

/// Bridge error taxonomy. Everything except `Feed` and `Disconnected` is
/// recovered where it occurs and only surfaces as a log record.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("malformed {kind} identifier '{input}': {source}")]
    MalformedIdentifier {
        kind: &'static str,
        input: String,
        #[source]
        source: ParseError,
    },

    #[error("subscribe {category} {target} failed: {source}")]
    SubscriptionFailed {
        category: Category,
        target: String,
        #[source]
        source: FeedError,
    },

    #[error("write {category} {key} failed: {source}")]
    WriteFailed {
        category: Category,
        key: String,
        #[source]
        source: CatalogError,
    },

    #[error("unsubscribe {category} {target} failed: {source}")]
    UnsubscribeFailed {
        category: Category,
        target: String,
        #[source]
        source: FeedError,
    },

    #[error("catalog inventory unavailable: {0}")]
    CatalogInventoryUnavailable(#[source] CatalogError),

    #[error("feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("feed disconnected: {0}")]
    Disconnected(String),
}

#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("unsupported source: {0}")]
    UnsupportedSource(String),
    #[error("missing key: {0}")]
    MissingKey(String),
}
