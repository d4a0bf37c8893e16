//! Visibility registry: which `(symbol, field)` cells are currently mounted on screen.
//!
//! The registry is a lookup relation only. It stores [`Weak`] references, so a cell that its view
//! dropped without unregistering simply stops resolving.

use crate::{
    error::SinkError,
    model::{FieldKey, FlashKind, PriceCompare, Symbol},
};
use fnv::FnvHashMap;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};

/// Renderable cell bound to one `(symbol, field)` pair.
///
/// Implementations own their visual state; the pipeline only ever writes colour and flash state
/// through this interface.
pub trait CellSink: Send + Sync {
    /// Replace the cell's exclusive colour class. `None` is the neutral style.
    fn apply_color(&self, color: Option<PriceCompare>) -> Result<(), SinkError>;

    /// Set or clear the transient flash marker.
    fn set_flash(&self, flash: Option<FlashKind>) -> Result<(), SinkError>;

    /// Flash marker currently set on the cell.
    fn flash(&self) -> Option<FlashKind>;
}

/// Identity of a cell, used to deduplicate queued work per cell.
pub(crate) fn cell_id(cell: &Weak<dyn CellSink>) -> usize {
    cell.as_ptr() as *const () as usize
}

type RowCells = FnvHashMap<FieldKey, Weak<dyn CellSink>>;

/// Cloneable handle over the shared registry state.
#[derive(Clone, Default)]
pub struct VisibilityRegistry {
    rows: Arc<RwLock<FnvHashMap<Symbol, RowCells>>>,
}

impl std::fmt::Debug for VisibilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisibilityRegistry")
            .field("rows", &self.rows.read().len())
            .finish()
    }
}

impl VisibilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `cell` as the visible cell of `(symbol, field)`, replacing any previous one.
    pub fn register(&self, symbol: impl Into<Symbol>, field: FieldKey, cell: &Arc<dyn CellSink>) {
        self.rows
            .write()
            .entry(symbol.into())
            .or_default()
            .insert(field, Arc::downgrade(cell));
    }

    /// Unregister one field of `symbol`, or the whole row when `field` is `None`.
    ///
    /// Unregistering something that is not registered is a no-op.
    pub fn unregister(&self, symbol: &str, field: Option<FieldKey>) {
        let mut rows = self.rows.write();
        match field {
            None => {
                rows.remove(symbol);
            }
            Some(field) => {
                if let Some(row) = rows.get_mut(symbol) {
                    row.remove(&field);
                    if row.is_empty() {
                        rows.remove(symbol);
                    }
                }
            }
        }
    }

    /// Live cell of `(symbol, field)`, if one is mounted.
    pub fn get(&self, symbol: &str, field: FieldKey) -> Option<Arc<dyn CellSink>> {
        self.rows.read().get(symbol)?.get(&field)?.upgrade()
    }

    /// Weak reference to the cell of `(symbol, field)`, if its cell is still alive.
    pub(crate) fn get_weak(&self, symbol: &str, field: FieldKey) -> Option<Weak<dyn CellSink>> {
        let rows = self.rows.read();
        let cell = rows.get(symbol)?.get(&field)?;
        (cell.strong_count() > 0).then(|| cell.clone())
    }

    /// Check if `symbol` has at least one live visible cell.
    pub fn has_visible(&self, symbol: &str) -> bool {
        self.rows
            .read()
            .get(symbol)
            .is_some_and(|row| row.values().any(|cell| cell.strong_count() > 0))
    }

    /// Symbols with at least one live visible cell.
    pub fn visible_symbols(&self) -> Vec<Symbol> {
        self.rows
            .read()
            .iter()
            .filter(|(_, row)| row.values().any(|cell| cell.strong_count() > 0))
            .map(|(symbol, _)| symbol.clone())
            .collect()
    }

    /// Drop entries whose cells no longer exist. Returns the number of entries dropped.
    pub fn prune(&self) -> usize {
        let mut rows = self.rows.write();
        let mut pruned = 0;
        rows.retain(|_, row| {
            let before = row.len();
            row.retain(|_, cell| cell.strong_count() > 0);
            pruned += before - row.len();
            !row.is_empty()
        });
        pruned
    }

    /// Number of registered `(symbol, field)` entries, dead or alive.
    pub fn len(&self) -> usize {
        self.rows.read().values().map(|row| row.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}
