//! Error types for the streaming layer
//!
//! Errors are `Clone` because one rejection is observed by every waiter of
//! a [`Future`](crate::future::Future).

use thiserror::Error;

/// Market data streaming errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarketDataError {
    #[error("WebSocket connection error: {0}")]
    WebSocketConnection(String),

    #[error("WebSocket message error: {0}")]
    WebSocketMessage(String),

    #[error("Failed to parse message: {0}")]
    ParseError(String),

    #[error("Failed to decompress binary frame: {0}")]
    Decompression(String),

    #[error("Request timeout: {0}")]
    RequestTimeout(String),

    #[error("Connection closed by remote server: {0}")]
    ConnectionClosed(String),

    #[error("Connection closed by the user: {0}")]
    ClosedByUser(String),

    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("{symbol} nonce is behind the cache after {tries} tries")]
    NonceBehindCache { symbol: String, tries: u32 },

    #[error("Snapshot fetch failed: {0}")]
    SnapshotFetch(String),

    #[error("Order book error: {0}")]
    OrderBookError(String),

    #[error("Consumer on topic {topic} failed: {message}")]
    ConsumerError { topic: String, message: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl MarketDataError {
    /// Whether the error means the connection is unusable and must be replaced.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MarketDataError::WebSocketConnection(_)
                | MarketDataError::RequestTimeout(_)
                | MarketDataError::ConnectionClosed(_)
                | MarketDataError::ClosedByUser(_)
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for MarketDataError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        MarketDataError::WebSocketConnection(err.to_string())
    }
}

impl From<serde_json::Error> for MarketDataError {
    fn from(err: serde_json::Error) -> Self {
        MarketDataError::ParseError(err.to_string())
    }
}

impl From<config::ConfigError> for MarketDataError {
    fn from(err: config::ConfigError) -> Self {
        MarketDataError::ConfigError(err.to_string())
    }
}

impl From<std::io::Error> for MarketDataError {
    fn from(err: std::io::Error) -> Self {
        MarketDataError::Decompression(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MarketDataError>;
