use std::time::Duration;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

use mdbridge_lib::FeedError;

#[derive(Debug, Error)]
pub enum BinanceError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server error {code}: {msg}")]
    Server { code: i64, msg: String },
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),
    #[error("stream {stream} already carries {owner}")]
    StreamInUse { stream: String, owner: String },
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("not connected")]
    NotConnected,
    #[error("connection closed")]
    ConnectionClosed,
}

impl From<BinanceError> for FeedError {
    fn from(err: BinanceError) -> Self {
        match err {
            BinanceError::Server { .. }
            | BinanceError::UnknownSymbol(_)
            | BinanceError::StreamInUse { .. } => {
                FeedError::Rejected(err.to_string())
            }
            BinanceError::Unsupported(msg) => FeedError::Unsupported(msg),
            BinanceError::Timeout(limit) => FeedError::Timeout(limit),
            BinanceError::NotConnected => FeedError::NotConnected,
            BinanceError::ConnectionClosed => FeedError::Disconnected(err.to_string()),
            BinanceError::WebSocket(_) | BinanceError::Json(_) | BinanceError::Http(_) => {
                FeedError::ConnectionFailed(err.to_string())
            }
        }
    }
}
