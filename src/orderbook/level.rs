//! Price level rows stored in a book side
//!
//! Each row type is a policy for the one sorted-side algorithm: it names
//! its identity (price, or order id) and what counts as a deletion.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::hash::Hash;

/// A row stored in an [`OrderBookSide`](super::OrderBookSide)
pub trait Level: Clone + Debug + PartialEq + Send + Sync + 'static {
    /// Order identity for indexed rows
    type Id: Clone + Debug + Eq + Hash + Ord + Send + Sync;

    fn price(&self) -> Decimal;

    fn size(&self) -> Decimal;

    /// `None` when the row is identified by its price
    fn id(&self) -> Option<&Self::Id>;

    /// Replace the price, used when an order update omits it
    fn with_price(self, price: Decimal) -> Self;

    /// Whether storing this row deletes the existing one
    fn is_removal(&self) -> bool {
        self.size().is_zero()
    }
}

/// Aggregated level identified by price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(Decimal, Decimal)", into = "(Decimal, Decimal)")]
pub struct PriceLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

impl From<(Decimal, Decimal)> for PriceLevel {
    fn from((price, size): (Decimal, Decimal)) -> Self {
        Self { price, size }
    }
}

impl From<PriceLevel> for (Decimal, Decimal) {
    fn from(level: PriceLevel) -> Self {
        (level.price, level.size)
    }
}

impl Level for PriceLevel {
    type Id = ();

    fn price(&self) -> Decimal {
        self.price
    }

    fn size(&self) -> Decimal {
        self.size
    }

    fn id(&self) -> Option<&()> {
        None
    }

    fn with_price(self, price: Decimal) -> Self {
        Self { price, ..self }
    }
}

/// Aggregated level carrying the number of orders behind it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    from = "(Decimal, Decimal, Decimal)",
    into = "(Decimal, Decimal, Decimal)"
)]
pub struct CountedLevel {
    pub price: Decimal,
    pub size: Decimal,
    pub count: Decimal,
}

impl CountedLevel {
    pub fn new(price: Decimal, size: Decimal, count: Decimal) -> Self {
        Self { price, size, count }
    }
}

impl From<(Decimal, Decimal, Decimal)> for CountedLevel {
    fn from((price, size, count): (Decimal, Decimal, Decimal)) -> Self {
        Self { price, size, count }
    }
}

impl From<CountedLevel> for (Decimal, Decimal, Decimal) {
    fn from(level: CountedLevel) -> Self {
        (level.price, level.size, level.count)
    }
}

impl Level for CountedLevel {
    type Id = ();

    fn price(&self) -> Decimal {
        self.price
    }

    fn size(&self) -> Decimal {
        self.size
    }

    fn id(&self) -> Option<&()> {
        None
    }

    fn with_price(self, price: Decimal) -> Self {
        Self { price, ..self }
    }

    fn is_removal(&self) -> bool {
        self.size.is_zero() || self.count.is_zero()
    }
}

/// Individual resting order identified by its order id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(Decimal, Decimal, String)", into = "(Decimal, Decimal, String)")]
pub struct OrderLevel {
    pub price: Decimal,
    pub size: Decimal,
    pub order_id: String,
}

impl OrderLevel {
    pub fn new(price: Decimal, size: Decimal, order_id: impl Into<String>) -> Self {
        Self {
            price,
            size,
            order_id: order_id.into(),
        }
    }
}

impl From<(Decimal, Decimal, String)> for OrderLevel {
    fn from((price, size, order_id): (Decimal, Decimal, String)) -> Self {
        Self {
            price,
            size,
            order_id,
        }
    }
}

impl From<OrderLevel> for (Decimal, Decimal, String) {
    fn from(level: OrderLevel) -> Self {
        (level.price, level.size, level.order_id)
    }
}

impl Level for OrderLevel {
    type Id = String;

    fn price(&self) -> Decimal {
        self.price
    }

    fn size(&self) -> Decimal {
        self.size
    }

    fn id(&self) -> Option<&String> {
        Some(&self.order_id)
    }

    fn with_price(self, price: Decimal) -> Self {
        Self { price, ..self }
    }
}
