//! Frame-batched application of colours and flashes to visible cells.
//!
//! Message arrival rate (hundreds per second per symbol under load) is decoupled from paint rate:
//! outcomes are queued as they are computed and applied at most once per frame, last write wins.

pub mod color;
pub mod flash;
pub mod frame;

pub use color::ColorScheduler;
pub use flash::{DEFAULT_FLASH_DURATION, FlashScheduler};
pub use frame::{DEFAULT_FRAME_INTERVAL, FrameSignal, spawn_frame_driver};
