//! Market data streaming layer
//!
//! Persistent WebSocket connections with request/response correlation,
//! order books and rolling caches kept consistent under concurrent
//! access, and a topic-based dispatcher with bounded consumer backlogs.
//! Venue-specific message grammars live outside this crate: a
//! [`MessageHandler`] receives decoded frames and decides which book or
//! cache to update and which future to resolve.

pub mod cache;
pub mod config;
pub mod error;
pub mod future;
pub mod metrics;
pub mod orderbook;
pub mod shared;
pub mod stream;
pub mod websocket;

pub use cache::{
    ArrayCache, ArrayCacheBySymbolById, ArrayCacheBySymbolBySide, ArrayCacheByTimestamp,
};
pub use config::Config;
pub use error::{MarketDataError, Result};
pub use future::{race, Future};
pub use orderbook::{
    BookDelta, BookSnapshot, OrderBook, OrderBookManager, OrderBookSide, PriceLevel,
    SharedOrderBook,
};
pub use shared::Shared;
pub use stream::{Message, Stream};
pub use websocket::{Connection, ConnectionOptions, ConnectionPool, MessageHandler};
