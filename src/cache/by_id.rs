use std::collections::{HashMap, HashSet, VecDeque};

use super::{add_distinct, Identified, NewUpdates};

/// Cache of items upserted by (symbol, id), e.g. orders or my trades
///
/// An update for a known id replaces the stored item at its current
/// position. New ids are appended, evicting the oldest item when full.
/// Repeated updates of one id between reads count once.
#[derive(Debug, Clone)]
pub struct ArrayCacheBySymbolById<T> {
    items: VecDeque<T>,
    max_size: Option<usize>,
    /// symbol -> ids currently stored
    index: HashMap<String, HashSet<String>>,
    updates: NewUpdates<HashSet<String>>,
}

impl<T: Identified> ArrayCacheBySymbolById<T> {
    pub fn new(max_size: Option<usize>) -> Self {
        Self {
            items: VecDeque::new(),
            max_size,
            index: HashMap::new(),
            updates: NewUpdates::default(),
        }
    }

    pub fn append(&mut self, item: T) {
        let symbol = item.symbol().to_string();
        let id = item.id().to_string();

        if self.contains(&symbol, &id) {
            if let Some(pos) = self.position(&symbol, &id) {
                self.items[pos] = item;
            }
        } else {
            if let Some(max) = self.max_size.filter(|max| *max > 0) {
                while self.items.len() >= max {
                    self.evict_oldest();
                }
            }
            self.index
                .entry(symbol.clone())
                .or_default()
                .insert(id.clone());
            self.items.push_back(item);
        }

        self.updates.record(&symbol, |ids| add_distinct(ids, &id));
    }

    fn evict_oldest(&mut self) {
        let Some(evicted) = self.items.pop_front() else {
            return;
        };
        if let Some(ids) = self.index.get_mut(evicted.symbol()) {
            ids.remove(evicted.id());
            if ids.is_empty() {
                self.index.remove(evicted.symbol());
            }
        }
    }

    fn position(&self, symbol: &str, id: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|item| item.symbol() == symbol && item.id() == id)
    }

    pub fn contains(&self, symbol: &str, id: &str) -> bool {
        self.index.get(symbol).is_some_and(|ids| ids.contains(id))
    }

    pub fn get_by_id(&self, symbol: &str, id: &str) -> Option<&T> {
        self.position(symbol, id).and_then(|pos| self.items.get(pos))
    }

    /// Distinct ids updated since the last read, capped at `limit`
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

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.index.clear();
        self.updates.clear();
    }
}
