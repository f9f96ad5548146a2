//! Order book manager
//!
//! Manages one shared order book per symbol.

use std::collections::HashMap;

use tracing::warn;

use super::{
    default_cache_index, BookDelta, BookSnapshot, Level, OrderBook, PriceLevel, SharedOrderBook,
};
use crate::shared::Shared;

/// Manages order books for multiple symbols
#[derive(Debug)]
pub struct OrderBookManager<L: Level = PriceLevel> {
    books: HashMap<String, SharedOrderBook<L>>,
    max_depth: Option<usize>,
}

impl<L: Level> Default for OrderBookManager<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: Level> OrderBookManager<L> {
    /// Create a new order book manager with unbounded depth
    pub fn new() -> Self {
        Self {
            books: HashMap::new(),
            max_depth: None,
        }
    }

    /// Create with custom depth
    pub fn with_depth(max_depth: Option<usize>) -> Self {
        Self {
            books: HashMap::new(),
            max_depth,
        }
    }

    /// Synchronise the symbol's book with a snapshot
    ///
    /// The book is reset in place, so handles taken earlier stay live.
    /// Buffered deltas newer than the snapshot are replayed on top of it;
    /// if they do not line up with the snapshot nonce they are dropped.
    pub fn init_book(&mut self, symbol: &str, snapshot: &BookSnapshot<L>) -> SharedOrderBook<L> {
        let shared = self.get_or_create(symbol);
        shared.write(|book| {
            let pending = match default_cache_index(snapshot, book.buffered()) {
                Some(index) => book.buffered()[index..].to_vec(),
                None => {
                    if !book.buffered().is_empty() {
                        warn!(
                            symbol = %symbol,
                            snapshot_nonce = ?snapshot.nonce,
                            dropped = book.buffered().len(),
                            "Buffered deltas do not line up with the snapshot"
                        );
                    }
                    Vec::new()
                }
            };
            book.reset(snapshot);
            for delta in &pending {
                book.apply(delta);
            }
            book.clear_buffer();
            book.limit();
        });
        shared
    }

    /// Book for `symbol`, created empty if it is not tracked yet
    pub fn get_or_create(&mut self, symbol: &str) -> SharedOrderBook<L> {
        let depth = self.max_depth;
        self.books
            .entry(symbol.to_string())
            .or_insert_with(|| Shared::new(OrderBook::new(Some(symbol), depth)))
            .clone()
    }

    pub fn get(&self, symbol: &str) -> Option<SharedOrderBook<L>> {
        self.books.get(symbol).cloned()
    }

    /// Route a delta to the symbol's book
    ///
    /// Until the book has been synchronised (it has no nonce yet) the delta
    /// is buffered for snapshot recovery. Returns true if it was applied.
    pub fn apply_update(&mut self, symbol: &str, delta: BookDelta<L>) -> bool {
        let book = self.get_or_create(symbol);
        book.write(|book| {
            if book.nonce().is_none() {
                book.buffer(delta);
                return false;
            }
            let applied = book.apply(&delta);
            if applied {
                book.limit();
            }
            applied
        })
    }

    /// Consistent copy of a specific book
    pub fn get_state(&self, symbol: &str) -> Option<OrderBook<L>> {
        self.books.get(symbol).map(|book| book.copy())
    }

    /// Copies of all books
    pub fn get_all_states(&self) -> Vec<OrderBook<L>> {
        self.books.values().map(|book| book.copy()).collect()
    }

    /// Check if a book is synchronised with a snapshot
    pub fn is_initialized(&self, symbol: &str) -> bool {
        self.books
            .get(symbol)
            .map(|book| book.read(|book| book.nonce().is_some()))
            .unwrap_or(false)
    }

    /// Get the last accepted nonce for a symbol
    pub fn nonce(&self, symbol: &str) -> Option<u64> {
        self.books.get(symbol).and_then(|book| book.read(|book| book.nonce()))
    }

    /// Get list of symbols being tracked
    pub fn symbols(&self) -> Vec<String> {
        self.books.keys().cloned().collect()
    }

    /// Check if a symbol exists
    pub fn has_symbol(&self, symbol: &str) -> bool {
        self.books.contains_key(symbol)
    }

    /// Stop tracking a symbol
    pub fn remove(&mut self, symbol: &str) -> Option<SharedOrderBook<L>> {
        self.books.remove(symbol)
    }
}
