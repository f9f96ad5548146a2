use std::collections::{HashMap, HashSet, VecDeque};

use super::{add_distinct, NewUpdates, PositionSide, Sided};

/// Cache of positions keyed by (symbol, side)
///
/// In hedge mode a symbol may hold one long and one short entry. Otherwise
/// only one side may be open, and storing a side evicts the opposite one
/// for that symbol. When both sides arrive in one batch the later write
/// wins.
#[derive(Debug, Clone)]
pub struct ArrayCacheBySymbolBySide<T> {
    items: VecDeque<T>,
    hedged: bool,
    index: HashMap<String, HashSet<PositionSide>>,
    updates: NewUpdates<HashSet<String>>,
}

impl<T: Sided> ArrayCacheBySymbolBySide<T> {
    pub fn new(hedged: bool) -> Self {
        Self {
            items: VecDeque::new(),
            hedged,
            index: HashMap::new(),
            updates: NewUpdates::default(),
        }
    }

    pub fn append(&mut self, item: T) {
        let symbol = item.symbol().to_string();
        let side = item.side();

        if !self.hedged {
            self.remove(&symbol, side.opposite());
        }

        match self.position(&symbol, side) {
            Some(pos) => self.items[pos] = item,
            None => {
                self.index.entry(symbol.clone()).or_default().insert(side);
                self.items.push_back(item);
            }
        }

        self.updates
            .record(&symbol, |sides| add_distinct(sides, side.as_str()));
    }

    /// Drop the entry for (symbol, side), returning it if present
    pub fn remove(&mut self, symbol: &str, side: PositionSide) -> Option<T> {
        let pos = self.position(symbol, side)?;
        if let Some(sides) = self.index.get_mut(symbol) {
            sides.remove(&side);
            if sides.is_empty() {
                self.index.remove(symbol);
            }
        }
        self.items.remove(pos)
    }

    fn position(&self, symbol: &str, side: PositionSide) -> Option<usize> {
        if !self.index.get(symbol).is_some_and(|sides| sides.contains(&side)) {
            return None;
        }
        self.items
            .iter()
            .position(|item| item.symbol() == symbol && item.side() == side)
    }

    pub fn get(&self, symbol: &str, side: PositionSide) -> Option<&T> {
        self.position(symbol, side).and_then(|pos| self.items.get(pos))
    }

    /// Distinct sides updated since the last read, capped at `limit`
    pub fn get_limit(&mut self, symbol: Option<&str>, limit: Option<usize>) -> Option<usize> {
        self.updates.get_limit(symbol, limit)
    }

    pub fn is_hedged(&self) -> bool {
        self.hedged
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Position;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn position(symbol: &str, side: PositionSide, contracts: Decimal) -> Position {
        Position {
            symbol: symbol.to_string(),
            side,
            contracts,
            entry_price: None,
            timestamp: None,
        }
    }

    #[test]
    fn test_hedged_keeps_both_sides() {
        let mut cache = ArrayCacheBySymbolBySide::new(true);
        cache.append(position("BTC/USDT", PositionSide::Long, dec!(1)));
        cache.append(position("BTC/USDT", PositionSide::Short, dec!(2)));
        cache.append(position("BTC/USDT", PositionSide::Long, dec!(3)));

        assert_eq!(cache.len(), 2);
        assert_eq!(
            cache.get("BTC/USDT", PositionSide::Long).map(|p| p.contracts),
            Some(dec!(3))
        );
        // replaced in place
        assert_eq!(cache.iter().next().map(|p| p.side), Some(PositionSide::Long));
    }

    #[test]
    fn test_one_way_mode_evicts_opposite_side() {
        let mut cache = ArrayCacheBySymbolBySide::new(false);
        cache.append(position("BTC/USDT", PositionSide::Long, dec!(1)));
        cache.append(position("ETH/USDT", PositionSide::Long, dec!(1)));
        cache.append(position("BTC/USDT", PositionSide::Short, dec!(2)));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("BTC/USDT", PositionSide::Long).is_none());
        assert!(cache.get("ETH/USDT", PositionSide::Long).is_some());

        // last write in a batch wins
        cache.append(position("BTC/USDT", PositionSide::Long, dec!(4)));
        let btc: Vec<_> = cache
            .iter()
            .filter(|p| p.symbol == "BTC/USDT")
            .map(|p| (p.side, p.contracts))
            .collect();
        assert_eq!(btc, vec![(PositionSide::Long, dec!(4))]);
    }

    #[test]
    fn test_new_updates_by_side() {
        let mut cache = ArrayCacheBySymbolBySide::new(true);
        cache.append(position("BTC/USDT", PositionSide::Long, dec!(1)));
        cache.append(position("BTC/USDT", PositionSide::Long, dec!(2)));
        cache.append(position("BTC/USDT", PositionSide::Short, dec!(1)));
        assert_eq!(cache.get_limit(Some("BTC/USDT"), None), Some(2));
        assert_eq!(cache.get_limit(None, Some(1)), Some(1));
    }
}
