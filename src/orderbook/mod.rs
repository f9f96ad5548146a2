//! Order book module
//!
//! Sorted book sides, books with nonce-gated updates, a per-symbol
//! registry, and snapshot recovery against buffered deltas.

mod book;
mod level;
mod manager;
mod recovery;
mod side;

pub use book::{BookDelta, BookSnapshot, OrderBook, SharedOrderBook};
pub use level::{CountedLevel, Level, OrderLevel, PriceLevel};
pub use manager::OrderBookManager;
pub use recovery::{default_cache_index, load_order_book, SnapshotSource};
pub use side::OrderBookSide;

/// Book of aggregated levels carrying an order count
pub type CountedOrderBook = OrderBook<CountedLevel>;

/// Book of individual orders identified by order id
pub type IndexedOrderBook = OrderBook<OrderLevel>;
