//! Snapshot store: the authoritative mapping from symbol to latest merged [`Snapshot`].
//!
//! Written by the compute worker only, read by every rendered cell.

use crate::model::{Merge, Snapshot, Symbol};
use fnv::FnvHashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Store handle shared between the compute worker and the views.
pub type SharedSnapshotStore = Arc<RwLock<SnapshotStore>>;

#[derive(Debug, Clone, Default)]
pub struct SnapshotStore {
    snapshots: FnvHashMap<Symbol, Snapshot>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new store behind a shared lock.
    pub fn shared() -> SharedSnapshotStore {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Partially merge `update` into the snapshot of its symbol, returning the snapshot as it was
    /// before the merge (`None` for a symbol seen for the first time).
    ///
    /// Sub-records absent from `update` are left untouched, as are absent fields inside present
    /// sub-records.
    pub fn apply_update(&mut self, update: Snapshot) -> Option<Snapshot> {
        match self.snapshots.get_mut(&update.symbol) {
            Some(current) => {
                let previous = current.clone();
                current.merge(update);
                Some(previous)
            }
            None => {
                self.snapshots.insert(update.symbol.clone(), update);
                None
            }
        }
    }

    pub fn get(&self, symbol: &str) -> Option<&Snapshot> {
        self.snapshots.get(symbol)
    }

    pub fn remove<S: AsRef<str>>(&mut self, symbols: &[S]) {
        for symbol in symbols {
            self.snapshots.remove(symbol.as_ref());
        }
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.snapshots.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BookLevel, OrderBook, PriceCompare, Trade};

    const SYMBOL: &str = "ACB:G1:STX";

    fn trade_update() -> Snapshot {
        Snapshot::new(SYMBOL).with_trade(Trade {
            price: Some(25_000.0),
            volume: Some(1_000.0),
            compare: Some(PriceCompare::Up),
            ..Default::default()
        })
    }

    fn book_update() -> Snapshot {
        let mut book = OrderBook::default();
        book.bids[0] = BookLevel {
            price: Some(24_950.0),
            volume: Some(3_000.0),
            compare: Some(PriceCompare::Down),
        };
        Snapshot::new(SYMBOL).with_order_book(book)
    }

    #[test]
    fn test_merge_idempotence() {
        let mut once = SnapshotStore::new();
        once.apply_update(trade_update());

        let mut twice = SnapshotStore::new();
        twice.apply_update(trade_update());
        twice.apply_update(trade_update());

        assert_eq!(once.get(SYMBOL), twice.get(SYMBOL));
        assert_eq!(twice.len(), 1);
    }

    #[test]
    fn test_partial_merge_keeps_both_sub_records() {
        let mut store = SnapshotStore::new();

        assert!(store.apply_update(trade_update()).is_none());
        let previous = store.apply_update(book_update()).unwrap();

        assert!(previous.order_book.is_none());
        let snapshot = store.get(SYMBOL).unwrap();
        assert_eq!(snapshot.trade.as_ref().unwrap().price, Some(25_000.0));
        assert_eq!(snapshot.order_book.as_ref().unwrap().bids[0].price, Some(24_950.0));
    }

    #[test]
    fn test_remove_and_clear() {
        let mut store = SnapshotStore::new();
        store.apply_update(trade_update());
        store.apply_update(Snapshot::new("FPT:G1:STX").with_trade(Trade::default()));

        store.remove(&["FPT:G1:STX", "MISSING"]);
        assert_eq!(store.symbols().collect::<Vec<_>>(), vec![SYMBOL]);

        store.clear();
        assert!(store.is_empty());
        assert!(store.get(SYMBOL).is_none());
    }
}
