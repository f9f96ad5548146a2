//! Rolling caches for trades, candles, orders and positions
//!
//! Every cache is bounded and counts the items that arrived since the last
//! [`get_limit`](ArrayCache::get_limit) call, per symbol and in total. A
//! read only flags its counters; they are cleared on the next append so a
//! reader that just consumed still sees a stable count.

mod array;
mod by_id;
mod by_side;
mod item;
mod timestamp;

use std::collections::{HashMap, HashSet};

pub use array::ArrayCache;
pub use by_id::ArrayCacheBySymbolById;
pub use by_side::ArrayCacheBySymbolBySide;
pub use item::{CacheItem, Identified, Ohlcv, Order, Position, PositionSide, Sided, Timestamped, Trade};
pub use timestamp::ArrayCacheByTimestamp;

/// Per-symbol tally of new updates
pub(crate) trait Tally: Default {
    fn count(&self) -> usize;
    fn reset(&mut self);
}

impl Tally for usize {
    fn count(&self) -> usize {
        *self
    }

    fn reset(&mut self) {
        *self = 0;
    }
}

/// Distinct keys seen since the last read
impl Tally for HashSet<String> {
    fn count(&self) -> usize {
        self.len()
    }

    fn reset(&mut self) {
        self.clear();
    }
}

/// "New updates since last read" counters with deferred clearing
#[derive(Debug, Clone, Default)]
pub(crate) struct NewUpdates<V> {
    by_symbol: HashMap<String, V>,
    clear_by_symbol: HashSet<String>,
    all: usize,
    clear_all: bool,
}

impl<V: Tally> NewUpdates<V> {
    /// Unread count capped at `limit`, marking the updates as read
    pub(crate) fn get_limit(&mut self, symbol: Option<&str>, limit: Option<usize>) -> Option<usize> {
        let unread = match symbol {
            None => {
                self.clear_all = true;
                Some(self.all)
            }
            Some(symbol) => {
                self.clear_by_symbol.insert(symbol.to_string());
                self.by_symbol.get(symbol).map(Tally::count)
            }
        };
        match (unread, limit) {
            (None, limit) => limit,
            (Some(unread), Some(limit)) => Some(unread.min(limit)),
            (Some(unread), None) => Some(unread),
        }
    }

    /// Record an append for `symbol`; `f` updates the tally and returns the
    /// amount to add to the global counter
    pub(crate) fn record(&mut self, symbol: &str, f: impl FnOnce(&mut V) -> usize) {
        if self.clear_all {
            self.clear_all = false;
            self.clear_by_symbol.clear();
            self.by_symbol.clear();
            self.all = 0;
        }
        let tally = self.by_symbol.entry(symbol.to_string()).or_default();
        if self.clear_by_symbol.remove(symbol) {
            tally.reset();
        }
        self.all += f(tally);
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Add `key` to a distinct-key tally, returning the net growth
pub(crate) fn add_distinct(ids: &mut HashSet<String>, key: &str) -> usize {
    let before = ids.len();
    ids.insert(key.to_string());
    ids.len() - before
}
