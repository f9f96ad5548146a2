//! One side of an order book kept sorted by effective price
//!
//! Rows live in a `Vec` next to a parallel `Vec` of sort keys. The key is
//! the price for asks and the negated price for bids, so both sides use
//! one ascending comparison and index 0 is always the best price. The two
//! vectors are only ever modified together.

use rust_decimal::Decimal;
use std::collections::HashMap;

use super::Level;

/// Price-ordered container for one side of a book
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBookSide<L: Level> {
    /// `true` for bids (best = highest price)
    is_bid: bool,
    /// Maximum levels retained by [`limit`](Self::limit)
    depth: Option<usize>,
    levels: Vec<L>,
    keys: Vec<Decimal>,
    /// Order id -> last known sort key, for rows identified by id
    index: HashMap<L::Id, Decimal>,
}

impl<L: Level> OrderBookSide<L> {
    /// Create a new empty side
    pub fn new(is_bid: bool, depth: Option<usize>) -> Self {
        Self {
            is_bid,
            depth,
            levels: Vec::new(),
            keys: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn asks(depth: Option<usize>) -> Self {
        Self::new(false, depth)
    }

    pub fn bids(depth: Option<usize>) -> Self {
        Self::new(true, depth)
    }

    pub fn is_bid(&self) -> bool {
        self.is_bid
    }

    pub fn depth(&self) -> Option<usize> {
        self.depth
    }

    pub fn set_depth(&mut self, depth: Option<usize>) {
        self.depth = depth;
    }

    fn sort_key(&self, price: Decimal) -> Decimal {
        if self.is_bid {
            -price
        } else {
            price
        }
    }

    fn price_of(&self, key: Decimal) -> Decimal {
        self.sort_key(key)
    }

    /// First position whose key is not less than `key`
    fn bisect_left(&self, key: Decimal) -> usize {
        self.keys.partition_point(|k| *k < key)
    }

    /// Apply one row: insert, overwrite in place, or delete on zero size
    pub fn store(&mut self, level: L) {
        match level.id().cloned() {
            None => self.store_by_price(level),
            Some(id) => self.store_by_id(id, level),
        }
    }

    /// Apply a batch of rows in order
    pub fn store_array(&mut self, levels: impl IntoIterator<Item = L>) {
        for level in levels {
            self.store(level);
        }
    }

    fn store_by_price(&mut self, level: L) {
        let key = self.sort_key(level.price());
        let i = self.bisect_left(key);
        let exists = self.keys.get(i) == Some(&key);

        if level.is_removal() {
            if exists {
                self.keys.remove(i);
                self.levels.remove(i);
            }
        } else if exists {
            self.levels[i] = level;
        } else {
            self.keys.insert(i, key);
            self.levels.insert(i, level);
        }
    }

    fn store_by_id(&mut self, id: L::Id, mut level: L) {
        let previous = self.index.get(&id).copied();

        if level.is_removal() {
            if let Some(old_key) = previous {
                self.remove_at_key(&id, old_key);
                self.index.remove(&id);
            }
            return;
        }

        // size-only updates keep the order's last known price
        if let Some(old_key) = previous {
            if level.price().is_zero() {
                level = level.with_price(self.price_of(old_key));
            }
        }
        let key = self.sort_key(level.price());

        if let Some(old_key) = previous {
            if old_key == key {
                if let Some(i) = self.position_of(&id, key) {
                    self.levels[i] = level;
                    return;
                }
            } else {
                self.remove_at_key(&id, old_key);
            }
        }

        let i = self.insertion_point(&id, key);
        self.keys.insert(i, key);
        self.levels.insert(i, level);
        self.index.insert(id, key);
    }

    /// Scan the run of equal keys for the row with `id`
    fn position_of(&self, id: &L::Id, key: Decimal) -> Option<usize> {
        let mut i = self.bisect_left(key);
        while i < self.keys.len() && self.keys[i] == key {
            if self.levels[i].id() == Some(id) {
                return Some(i);
            }
            i += 1;
        }
        None
    }

    /// Equal keys stay ordered by ascending order id
    fn insertion_point(&self, id: &L::Id, key: Decimal) -> usize {
        let mut i = self.bisect_left(key);
        while i < self.keys.len()
            && self.keys[i] == key
            && self.levels[i].id().is_some_and(|other| other < id)
        {
            i += 1;
        }
        i
    }

    fn remove_at_key(&mut self, id: &L::Id, key: Decimal) {
        if let Some(i) = self.position_of(id, key) {
            self.keys.remove(i);
            self.levels.remove(i);
        }
    }

    /// Truncate the worst prices so at most `depth` levels remain
    pub fn limit(&mut self) {
        let Some(depth) = self.depth else {
            return;
        };
        if self.levels.len() <= depth {
            return;
        }
        for level in self.levels.drain(depth..) {
            if let Some(id) = level.id() {
                self.index.remove(id);
            }
        }
        self.keys.truncate(depth);
    }

    /// Remove all levels
    pub fn clear(&mut self) {
        self.levels.clear();
        self.keys.clear();
        self.index.clear();
    }

    /// Number of levels on this side
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Levels from best to worst
    pub fn levels(&self) -> &[L] {
        &self.levels
    }

    pub fn iter(&self) -> impl Iterator<Item = &L> {
        self.levels.iter()
    }

    /// Top-of-book level
    pub fn best(&self) -> Option<&L> {
        self.levels.first()
    }

    /// Level currently stored for an order id
    pub fn get_order(&self, id: &L::Id) -> Option<&L> {
        let key = *self.index.get(id)?;
        self.position_of(id, key).map(|i| &self.levels[i])
    }

    /// Independent copy of the levels, best first
    pub fn to_vec(&self) -> Vec<L> {
        self.levels.clone()
    }
}
