use std::collections::VecDeque;

use super::{CacheItem, NewUpdates};

/// Append-only cache that evicts its oldest item once full
#[derive(Debug, Clone)]
pub struct ArrayCache<T> {
    items: VecDeque<T>,
    /// `None` or zero means unbounded
    max_size: Option<usize>,
    updates: NewUpdates<usize>,
}

impl<T: CacheItem> ArrayCache<T> {
    pub fn new(max_size: Option<usize>) -> Self {
        Self {
            items: VecDeque::new(),
            max_size,
            updates: NewUpdates::default(),
        }
    }

    pub fn append(&mut self, item: T) {
        if let Some(max) = self.max_size.filter(|max| *max > 0) {
            while self.items.len() >= max {
                self.items.pop_front();
            }
        }
        let symbol = item.symbol().to_string();
        self.items.push_back(item);
        self.updates.record(&symbol, |count| {
            *count += 1;
            1
        });
    }

    /// Number of items to return to a reader: the unread count for `symbol`
    /// (or all symbols) capped at `limit`. Marks those items as read.
    pub fn get_limit(&mut self, symbol: Option<&str>, limit: Option<usize>) -> Option<usize> {
        self.updates.get_limit(symbol, limit)
    }

    pub fn max_size(&self) -> Option<usize> {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// The newest `limit` items for `symbol`, oldest first
    pub fn latest(&self, symbol: Option<&str>, limit: Option<usize>) -> Vec<T> {
        let mut picked: Vec<T> = self
            .items
            .iter()
            .rev()
            .filter(|item| symbol.map_or(true, |s| item.symbol() == s))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        picked.reverse();
        picked
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.updates.clear();
    }
}
