//! Core order book implementation
//!
//! Two sorted sides plus nonce / timestamp / symbol metadata, with
//! snapshot reset and nonce-gated updates.

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Level, OrderBookSide, PriceLevel};
use crate::metrics::metrics;
use crate::shared::Shared;

/// Full book state as delivered by a snapshot or a full-refresh message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSnapshot<L = PriceLevel> {
    #[serde(default = "Vec::new")]
    pub bids: Vec<L>,
    #[serde(default = "Vec::new")]
    pub asks: Vec<L>,
    pub nonce: Option<u64>,
    /// Exchange timestamp in milliseconds
    pub timestamp: Option<i64>,
    pub symbol: Option<String>,
}

impl<L> Default for BookSnapshot<L> {
    fn default() -> Self {
        Self {
            bids: Vec::new(),
            asks: Vec::new(),
            nonce: None,
            timestamp: None,
            symbol: None,
        }
    }
}

/// Incremental change to a book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookDelta<L = PriceLevel> {
    #[serde(default = "Vec::new")]
    pub bids: Vec<L>,
    #[serde(default = "Vec::new")]
    pub asks: Vec<L>,
    /// First sequence number covered by this delta, when the venue sends one
    pub first_nonce: Option<u64>,
    /// Last sequence number covered by this delta
    pub nonce: Option<u64>,
    pub timestamp: Option<i64>,
}

impl<L> Default for BookDelta<L> {
    fn default() -> Self {
        Self {
            bids: Vec::new(),
            asks: Vec::new(),
            first_nonce: None,
            nonce: None,
            timestamp: None,
        }
    }
}

/// Order book for a single symbol
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBook<L: Level = PriceLevel> {
    bids: OrderBookSide<L>,
    asks: OrderBookSide<L>,
    /// Last accepted sequence number
    nonce: Option<u64>,
    /// Timestamp of last update (milliseconds)
    timestamp: Option<i64>,
    datetime: Option<String>,
    symbol: Option<String>,
    /// Deltas received before the book was synchronised with a snapshot
    cache: Vec<BookDelta<L>>,
}

/// Book behind its own mutex, shared by the receive task and readers
pub type SharedOrderBook<L = PriceLevel> = Shared<OrderBook<L>>;

impl<L: Level> OrderBook<L> {
    /// Create a new empty order book
    pub fn new(symbol: Option<&str>, depth: Option<usize>) -> Self {
        Self {
            bids: OrderBookSide::bids(depth),
            asks: OrderBookSide::asks(depth),
            nonce: None,
            timestamp: None,
            datetime: None,
            symbol: symbol.map(str::to_string),
            cache: Vec::new(),
        }
    }

    /// Create a book populated from a snapshot
    pub fn from_snapshot(snapshot: &BookSnapshot<L>, depth: Option<usize>) -> Self {
        let mut book = Self::new(None, depth);
        book.reset(snapshot);
        book
    }

    /// Replace both sides with the snapshot contents
    ///
    /// Metadata absent from the snapshot keeps its previous value.
    pub fn reset(&mut self, snapshot: &BookSnapshot<L>) -> &mut Self {
        self.bids.clear();
        self.asks.clear();
        self.bids.store_array(snapshot.bids.iter().cloned());
        self.asks.store_array(snapshot.asks.iter().cloned());

        if snapshot.nonce.is_some() {
            self.nonce = snapshot.nonce;
        }
        if snapshot.timestamp.is_some() {
            self.set_timestamp(snapshot.timestamp);
        }
        if snapshot.symbol.is_some() {
            self.symbol = snapshot.symbol.clone();
        }
        self
    }

    /// Reset from the snapshot unless its nonce is not newer than ours
    ///
    /// Returns true if the snapshot was applied.
    pub fn update(&mut self, snapshot: &BookSnapshot<L>) -> bool {
        if self.is_stale(snapshot.nonce) {
            return false;
        }
        self.reset(snapshot);
        true
    }

    /// Apply an incremental delta unless its nonce is not newer than ours
    ///
    /// Returns true if the delta was applied.
    pub fn apply(&mut self, delta: &BookDelta<L>) -> bool {
        if self.is_stale(delta.nonce) {
            return false;
        }
        self.bids.store_array(delta.bids.iter().cloned());
        self.asks.store_array(delta.asks.iter().cloned());

        if delta.nonce.is_some() {
            self.nonce = delta.nonce;
        }
        if delta.timestamp.is_some() {
            self.set_timestamp(delta.timestamp);
        }
        true
    }

    fn is_stale(&self, nonce: Option<u64>) -> bool {
        match (nonce, self.nonce) {
            (Some(incoming), Some(current)) if incoming <= current => {
                debug!(
                    symbol = ?self.symbol,
                    incoming,
                    current,
                    "Ignoring stale order book update"
                );
                metrics().stale_updates.inc();
                true
            }
            _ => false,
        }
    }

    fn set_timestamp(&mut self, timestamp: Option<i64>) {
        self.timestamp = timestamp;
        self.datetime = timestamp
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true));
    }

    /// Trim both sides to the configured depth
    pub fn limit(&mut self) -> &mut Self {
        self.bids.limit();
        self.asks.limit();
        self
    }

    /// Buffer a delta that arrived before the book was synchronised
    pub fn buffer(&mut self, delta: BookDelta<L>) {
        self.cache.push(delta);
    }

    /// Deltas waiting for a snapshot
    pub fn buffered(&self) -> &[BookDelta<L>] {
        &self.cache
    }

    pub fn clear_buffer(&mut self) {
        self.cache.clear();
    }

    pub fn bids(&self) -> &OrderBookSide<L> {
        &self.bids
    }

    pub fn asks(&self) -> &OrderBookSide<L> {
        &self.asks
    }

    pub fn bids_mut(&mut self) -> &mut OrderBookSide<L> {
        &mut self.bids
    }

    pub fn asks_mut(&mut self) -> &mut OrderBookSide<L> {
        &mut self.asks
    }

    pub fn nonce(&self) -> Option<u64> {
        self.nonce
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    /// ISO-8601 rendering of the timestamp
    pub fn datetime(&self) -> Option<&str> {
        self.datetime.as_deref()
    }

    pub fn symbol(&self) -> Option<&str> {
        self.symbol.as_deref()
    }

    /// Get best bid price
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.best().map(Level::price)
    }

    /// Get best ask price
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.best().map(Level::price)
    }

    /// Get mid price
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::from(2)),
            _ => None,
        }
    }

    /// Current state as a snapshot, keeping at most `limit` levels per side
    pub fn to_snapshot(&self, limit: Option<usize>) -> BookSnapshot<L> {
        let take = |side: &OrderBookSide<L>| match limit {
            Some(n) => side.iter().take(n).cloned().collect(),
            None => side.to_vec(),
        };
        BookSnapshot {
            bids: take(&self.bids),
            asks: take(&self.asks),
            nonce: self.nonce,
            timestamp: self.timestamp,
            symbol: self.symbol.clone(),
        }
    }
}

impl<L: Level> SharedOrderBook<L> {
    pub fn reset(&self, snapshot: &BookSnapshot<L>) {
        self.write(|book| {
            book.reset(snapshot);
        });
    }

    pub fn update(&self, snapshot: &BookSnapshot<L>) -> bool {
        self.write(|book| book.update(snapshot))
    }

    pub fn apply(&self, delta: &BookDelta<L>) -> bool {
        self.write(|book| book.apply(delta))
    }

    pub fn limit(&self) {
        self.write(|book| {
            book.limit();
        });
    }

    /// Deep copy taken under the book's lock
    pub fn copy(&self) -> OrderBook<L> {
        self.snapshot()
    }
}
