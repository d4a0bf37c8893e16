use parking_lot::Mutex;
use price_board::{CellSink, FlashKind, PriceCompare, SinkError};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CellStyle {
    pub color: Option<PriceCompare>,
    pub flash: Option<FlashKind>,
}

/// One mounted table cell. The renderer reads its style every frame.
#[derive(Debug, Default)]
pub struct TuiCell {
    style: Mutex<CellStyle>,
}

impl TuiCell {
    pub fn with_color(color: Option<PriceCompare>) -> Self {
        Self {
            style: Mutex::new(CellStyle { color, flash: None }),
        }
    }

    pub fn style(&self) -> CellStyle {
        *self.style.lock()
    }
}

impl CellSink for TuiCell {
    fn apply_color(&self, color: Option<PriceCompare>) -> Result<(), SinkError> {
        self.style.lock().color = color;
        Ok(())
    }

    fn set_flash(&self, flash: Option<FlashKind>) -> Result<(), SinkError> {
        self.style.lock().flash = flash;
        Ok(())
    }

    fn flash(&self) -> Option<FlashKind> {
        self.style.lock().flash
    }
}
