use super::frame::FrameSignal;
use crate::{
    compare::FieldColors,
    model::Symbol,
    registry::VisibilityRegistry,
};
use fnv::FnvHashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Batches per-cell colours and applies them at most once per frame.
///
/// Colours for a symbol with no visible cell are kept until the row scrolls into view, so a colour
/// update is never lost for a temporarily off-screen symbol.
#[derive(Debug, Clone)]
pub struct ColorScheduler {
    pending: Arc<Mutex<FnvHashMap<Symbol, FieldColors>>>,
    registry: VisibilityRegistry,
    frame: FrameSignal,
}

impl ColorScheduler {
    pub fn new(registry: VisibilityRegistry, frame: FrameSignal) -> Self {
        Self {
            pending: Arc::default(),
            registry,
            frame,
        }
    }

    /// Queue colours for `symbol`. Later calls before the frame fires win per field.
    pub fn queue_colors(&self, symbol: Symbol, colors: FieldColors) {
        if colors.is_empty() {
            return;
        }

        self.pending.lock().entry(symbol).or_default().extend(colors);
        self.frame.request();
    }

    /// Apply pending colours to visible cells, keeping every field whose cell is not mounted.
    ///
    /// Returns `true` if entries remain deferred and another frame is needed.
    pub fn flush_frame(&self) -> bool {
        let mut pending = self.pending.lock();

        pending.retain(|symbol, fields| {
            if !self.registry.has_visible(symbol) {
                return true;
            }

            // Fields without a mounted cell wait for a later frame
            fields.retain(|&field, color| {
                let Some(cell) = self.registry.get(symbol, field) else {
                    return true;
                };
                if let Err(error) = cell.apply_color(*color) {
                    debug!(%symbol, %field, %error, "skipping colour for cell");
                }
                false
            });
            !fields.is_empty()
        });

        !pending.is_empty()
    }

    /// Forget pending colours of `symbols`.
    pub fn remove<S: AsRef<str>>(&self, symbols: &[S]) {
        let mut pending = self.pending.lock();
        for symbol in symbols {
            pending.remove(symbol.as_ref());
        }
    }

    pub fn clear(&self) {
        self.pending.lock().clear();
    }

    /// Number of symbols with pending colours.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}
