use std::collections::{HashSet, VecDeque};

use super::Timestamped;

/// Cache of rows keyed by timestamp, e.g. candles
///
/// A row for a known timestamp replaces the stored one in place. New
/// timestamps are appended, evicting the oldest row when full.
#[derive(Debug, Clone)]
pub struct ArrayCacheByTimestamp<T> {
    items: VecDeque<T>,
    max_size: Option<usize>,
    keys: HashSet<i64>,
    /// Distinct timestamps touched since the last read
    size_tracker: HashSet<i64>,
    new_updates: usize,
    clear_updates: bool,
}

impl<T: Timestamped> ArrayCacheByTimestamp<T> {
    pub fn new(max_size: Option<usize>) -> Self {
        Self {
            items: VecDeque::new(),
            max_size,
            keys: HashSet::new(),
            size_tracker: HashSet::new(),
            new_updates: 0,
            clear_updates: false,
        }
    }

    pub fn append(&mut self, item: T) {
        let key = item.timestamp();
        if self.keys.contains(&key) {
            if let Some(slot) = self.items.iter_mut().find(|row| row.timestamp() == key) {
                *slot = item;
            }
        } else {
            if let Some(max) = self.max_size.filter(|max| *max > 0) {
                while self.items.len() >= max {
                    if let Some(evicted) = self.items.pop_front() {
                        self.keys.remove(&evicted.timestamp());
                    }
                }
            }
            self.keys.insert(key);
            self.items.push_back(item);
        }

        if self.clear_updates {
            self.clear_updates = false;
            self.size_tracker.clear();
        }
        self.size_tracker.insert(key);
        self.new_updates = self.size_tracker.len();
    }

    /// Distinct rows touched since the last read, capped at `limit`
    ///
    /// The cache holds a single series, so `_symbol` is not used.
    pub fn get_limit(&mut self, _symbol: Option<&str>, limit: Option<usize>) -> Option<usize> {
        self.clear_updates = true;
        Some(match limit {
            Some(limit) => self.new_updates.min(limit),
            None => self.new_updates,
        })
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

    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.keys.clear();
        self.size_tracker.clear();
        self.new_updates = 0;
        self.clear_updates = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Ohlcv;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn candle(timestamp: i64, close: Decimal) -> Ohlcv {
        Ohlcv {
            timestamp,
            open: dec!(1),
            high: close,
            low: dec!(1),
            close,
            volume: dec!(10),
        }
    }

    #[test]
    fn test_same_timestamp_replaces_in_place() {
        let mut cache = ArrayCacheByTimestamp::new(Some(10));
        cache.append(candle(60_000, dec!(1)));
        cache.append(candle(120_000, dec!(2)));
        cache.append(candle(60_000, dec!(5)));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.iter().next().map(|c| c.close), Some(dec!(5)));
        assert_eq!(cache.last().map(|c| c.timestamp), Some(120_000));
    }

    #[test]
    fn test_eviction_drops_oldest_key() {
        let mut cache = ArrayCacheByTimestamp::new(Some(2));
        for ts in [1, 2, 3] {
            cache.append(candle(ts, dec!(1)));
        }
        let keys: Vec<_> = cache.iter().map(|c| c.timestamp).collect();
        assert_eq!(keys, vec![2, 3]);

        // the evicted key is appended again, not replaced
        cache.append(candle(1, dec!(9)));
        let keys: Vec<_> = cache.iter().map(|c| c.timestamp).collect();
        assert_eq!(keys, vec![3, 1]);
    }

    #[test]
    fn test_new_updates_are_deduplicated() {
        let mut cache = ArrayCacheByTimestamp::new(None);
        cache.append(candle(1, dec!(1)));
        cache.append(candle(1, dec!(2)));
        cache.append(candle(2, dec!(3)));
        assert_eq!(cache.get_limit(None, None), Some(2));
        assert_eq!(cache.get_limit(None, Some(1)), Some(1));

        cache.append(candle(2, dec!(4)));
        assert_eq!(cache.get_limit(None, None), Some(1));
    }
}
