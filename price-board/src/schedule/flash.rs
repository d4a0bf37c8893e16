use super::frame::FrameSignal;
use crate::{
    compare::FlashResult,
    model::FlashKind,
    registry::{CellSink, VisibilityRegistry, cell_id},
};
use fnv::FnvHashMap;
use parking_lot::Mutex;
use std::{
    sync::{Arc, Weak},
    time::Duration,
};
use tracing::debug;

/// Default time a flash marker stays on a cell.
pub const DEFAULT_FLASH_DURATION: Duration = Duration::from_millis(500);

type FlashCells = FnvHashMap<usize, Weak<dyn CellSink>>;

/// Batches transient highlight markers per frame.
///
/// Unlike colours, flashes are droppable: a flash for a cell that is not visible when queued is
/// discarded on the spot.
#[derive(Clone)]
pub struct FlashScheduler {
    pending: Arc<Mutex<FnvHashMap<FlashKind, FlashCells>>>,
    registry: VisibilityRegistry,
    frame: FrameSignal,
    duration: Duration,
}

impl std::fmt::Debug for FlashScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlashScheduler")
            .field("pending", &self.pending_len())
            .field("duration", &self.duration)
            .finish()
    }
}

impl FlashScheduler {
    pub fn new(registry: VisibilityRegistry, frame: FrameSignal, duration: Duration) -> Self {
        Self {
            pending: Arc::default(),
            registry,
            frame,
            duration,
        }
    }

    /// Queue flashes for the next frame, dropping those whose cell is not visible.
    ///
    /// A cell queued several times before the frame keeps only its latest kind.
    pub fn queue_flash(&self, results: &[FlashResult]) {
        let mut queued = false;
        {
            let mut pending = self.pending.lock();
            for result in results {
                let Some(cell) = self.registry.get_weak(&result.symbol, result.field_key) else {
                    continue;
                };

                let id = cell_id(&cell);
                for (kind, cells) in pending.iter_mut() {
                    if *kind != result.flash_kind {
                        cells.remove(&id);
                    }
                }
                pending.entry(result.flash_kind).or_default().insert(id, cell);
                queued = true;
            }
        }

        if queued {
            self.frame.request();
        }
    }

    /// Set the queued markers and start one clearing timer per kind.
    ///
    /// Must be called from within a Tokio runtime: markers are cleared by a real-time timer so
    /// they disappear even if frames stop being produced.
    pub fn flush_frame(&self) {
        let pending = std::mem::take(&mut *self.pending.lock());

        for (kind, cells) in pending {
            let flashed = cells
                .into_values()
                .filter(|cell| {
                    let Some(sink) = cell.upgrade() else {
                        return false;
                    };
                    match sink.set_flash(Some(kind)) {
                        Ok(()) => true,
                        Err(error) => {
                            debug!(%kind, %error, "skipping flash for cell");
                            false
                        }
                    }
                })
                .collect::<Vec<_>>();

            if flashed.is_empty() {
                continue;
            }

            let duration = self.duration;
            tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                for cell in flashed {
                    let Some(sink) = cell.upgrade() else {
                        continue;
                    };
                    // A newer flash of another kind owns the marker now
                    if sink.flash() != Some(kind) {
                        continue;
                    }
                    if let Err(error) = sink.set_flash(None) {
                        debug!(%kind, %error, "skipping flash clear for cell");
                    }
                }
            });
        }
    }

    pub fn clear(&self) {
        self.pending.lock().clear();
    }

    /// Number of cells with a queued flash.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().values().map(|cells| cells.len()).sum()
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}
