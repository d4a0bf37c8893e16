//! Frame tick: a periodic flush, nominally aligned to display refresh, that only runs while a
//! scheduler has asked for one.

use super::{color::ColorScheduler, flash::FlashScheduler};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::{
    sync::Notify,
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, trace};

/// Default interval between two frames (~60 Hz).
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Coalescing "please flush on the next frame" signal shared by the schedulers.
///
/// Any number of requests made before the frame fires collapse into one flush.
#[derive(Debug, Clone, Default)]
pub struct FrameSignal {
    notify: Arc<Notify>,
    requested: Arc<AtomicBool>,
}

impl FrameSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for a flush on the next frame.
    pub fn request(&self) {
        if !self.requested.swap(true, Ordering::AcqRel) {
            self.notify.notify_one();
        }
    }

    /// Check if a frame has been requested and not yet started.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Wait until a frame is requested, then consume the request.
    pub async fn wait(&self) {
        self.notify.notified().await;
        self.requested.store(false, Ordering::Release);
    }
}

/// Spawn the task that flushes both schedulers once per frame while work is pending.
///
/// The colour scheduler may keep deferred entries for symbols that are off screen; while it does,
/// the driver keeps requesting frames. Flashes never need a follow-up frame: their markers are
/// cleared by real-time timers.
pub fn spawn_frame_driver(
    signal: FrameSignal,
    colors: ColorScheduler,
    flashes: FlashScheduler,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(interval_ms = interval.as_millis() as u64, "frame driver started");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            signal.wait().await;
            ticker.tick().await;

            let colors_pending = colors.flush_frame();
            flashes.flush_frame();

            if colors_pending {
                trace!(deferred = colors.pending_len(), "colours deferred, requesting next frame");
                signal.request();
            }
        }
    })
}
