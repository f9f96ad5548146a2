//! Records stored in the rolling caches
//!
//! Venue handlers turn wire payloads into these before appending them.
//! The traits describe the key each cache variant indexes by.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Item appended to a symbol-aware cache
pub trait CacheItem: Clone + Debug + Send + Sync + 'static {
    fn symbol(&self) -> &str;
}

/// Item keyed by its leading timestamp
pub trait Timestamped: Clone + Debug + Send + Sync + 'static {
    fn timestamp(&self) -> i64;
}

/// Item keyed by (symbol, id)
pub trait Identified: CacheItem {
    fn id(&self) -> &str;
}

/// Item keyed by (symbol, side)
pub trait Sided: CacheItem {
    fn side(&self) -> PositionSide;
}

/// Side of a derivatives position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn opposite(self) -> Self {
        match self {
            PositionSide::Long => PositionSide::Short,
            PositionSide::Short => PositionSide::Long,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        }
    }
}

/// Public trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub id: String,
    pub timestamp: i64,
    pub price: Decimal,
    pub amount: Decimal,
    #[serde(default)]
    pub side: Option<String>,
}

impl CacheItem for Trade {
    fn symbol(&self) -> &str {
        &self.symbol
    }
}

impl Identified for Trade {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Candle row `[timestamp, open, high, low, close, volume]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "(i64, Decimal, Decimal, Decimal, Decimal, Decimal)",
    into = "(i64, Decimal, Decimal, Decimal, Decimal, Decimal)"
)]
pub struct Ohlcv {
    pub timestamp: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl From<(i64, Decimal, Decimal, Decimal, Decimal, Decimal)> for Ohlcv {
    fn from(
        (timestamp, open, high, low, close, volume): (i64, Decimal, Decimal, Decimal, Decimal, Decimal),
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

impl From<Ohlcv> for (i64, Decimal, Decimal, Decimal, Decimal, Decimal) {
    fn from(c: Ohlcv) -> Self {
        (c.timestamp, c.open, c.high, c.low, c.close, c.volume)
    }
}

impl Timestamped for Ohlcv {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

/// Private order update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub symbol: String,
    pub id: String,
    pub timestamp: i64,
    pub price: Option<Decimal>,
    pub amount: Decimal,
    #[serde(default)]
    pub filled: Decimal,
    pub status: String,
}

impl CacheItem for Order {
    fn symbol(&self) -> &str {
        &self.symbol
    }
}

impl Identified for Order {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Open position on one side of a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    pub contracts: Decimal,
    pub entry_price: Option<Decimal>,
    pub timestamp: Option<i64>,
}

impl CacheItem for Position {
    fn symbol(&self) -> &str {
        &self.symbol
    }
}

impl Sided for Position {
    fn side(&self) -> PositionSide {
        self.side
    }
}
