use crate::cell::TuiCell;
use fnv::FnvHashMap;
use price_board::{
    Board, BoardKind, CellSink, ConnectionStatus, FieldKey, PipelineServices, PricePipeline,
    SubscriptionState, Symbol,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Table columns after the symbol column: field and header.
pub const COLUMNS: &[(FieldKey, &str)] = &[
    (FieldKey::Reference, "Ref"),
    (FieldKey::Ceiling, "Ceil"),
    (FieldKey::Floor, "Floor"),
    (FieldKey::Bid2Price, "Bid2"),
    (FieldKey::Bid2Volume, "Vol"),
    (FieldKey::Bid1Price, "Bid1"),
    (FieldKey::Bid1Volume, "Vol"),
    (FieldKey::LastPrice, "Last"),
    (FieldKey::LastVolume, "Vol"),
    (FieldKey::Change, "+/-"),
    (FieldKey::ChangePercent, "%"),
    (FieldKey::Ask1Price, "Ask1"),
    (FieldKey::Ask1Volume, "Vol"),
    (FieldKey::Ask2Price, "Ask2"),
    (FieldKey::Ask2Volume, "Vol"),
    (FieldKey::High, "High"),
    (FieldKey::Low, "Low"),
    (FieldKey::Average, "Avg"),
    (FieldKey::TotalVolume, "Total"),
    (FieldKey::ForeignBuy, "F.Buy"),
    (FieldKey::ForeignSell, "F.Sell"),
    (FieldKey::ForeignRoom, "Room"),
];

type RowCells = Vec<(FieldKey, Arc<TuiCell>)>;

/// Cells mounted for the rows inside the viewport. Rows scrolled out are unregistered and
/// dropped, so the pipeline only ever paints what is on screen.
#[derive(Debug, Default)]
pub struct MountedRows {
    rows: FnvHashMap<Symbol, RowCells>,
}

impl MountedRows {
    /// Mount cells for `visible` and unmount every other row. Returns whether the set changed.
    pub fn sync(&mut self, services: &PipelineServices, visible: &[Symbol]) -> bool {
        let mut changed = false;

        self.rows.retain(|symbol, _| {
            let keep = visible.contains(symbol);
            if !keep {
                services.registry.unregister(symbol, None);
                changed = true;
            }
            keep
        });
        if changed {
            let pruned = services.registry.prune();
            if pruned > 0 {
                debug!(pruned, "dropped dead cell registrations");
            }
        }

        for symbol in visible {
            if self.rows.contains_key(symbol) {
                continue;
            }

            let cells = COLUMNS
                .iter()
                .map(|&(field, _)| {
                    let color = services
                        .cell_state(symbol, field)
                        .and_then(|(_, color)| color);
                    let cell = Arc::new(TuiCell::with_color(color));
                    let sink: Arc<dyn CellSink> = cell.clone();
                    services.registry.register(symbol.clone(), field, &sink);
                    (field, cell)
                })
                .collect();

            self.rows.insert(symbol.clone(), cells);
            changed = true;
        }

        changed
    }

    pub fn cell(&self, symbol: &str, field: FieldKey) -> Option<&Arc<TuiCell>> {
        self.rows
            .get(symbol)?
            .iter()
            .find(|(key, _)| *key == field)
            .map(|(_, cell)| cell)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

pub struct App {
    pipeline: PricePipeline,
    boards: Vec<Board>,
    selected: usize,
    offset: usize,
    viewport: usize,
    rows: Vec<Symbol>,
    mounted: MountedRows,
    pub should_quit: bool,
}

impl App {
    pub fn new(pipeline: PricePipeline, boards: Vec<Board>) -> Self {
        Self {
            pipeline,
            boards,
            selected: 0,
            offset: 0,
            viewport: 0,
            rows: Vec::new(),
            mounted: MountedRows::default(),
            should_quit: false,
        }
    }

    pub fn services(&self) -> &PipelineServices {
        self.pipeline.services()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.pipeline.status()
    }

    pub fn boards(&self) -> &[Board] {
        &self.boards
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn subscription_state(&self) -> SubscriptionState {
        self.pipeline.subscriptions().state()
    }

    pub fn total_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn mounted(&self) -> &MountedRows {
        &self.mounted
    }

    /// Rows currently inside the viewport.
    pub fn visible_rows(&self) -> &[Symbol] {
        let end = (self.offset + self.viewport).min(self.rows.len());
        &self.rows[self.offset.min(end)..end]
    }

    /// Switch to the board at `index` in the background.
    pub fn select(&mut self, index: usize) {
        let Some(board) = self.boards.get(index).cloned() else {
            return;
        };
        self.selected = index;
        self.offset = 0;

        let subscriptions = self.pipeline.subscriptions().clone();
        tokio::spawn(async move {
            if let Err(error) = subscriptions.select_board(board.clone()).await {
                warn!(%board, %error, "board selection failed");
            }
        });
    }

    pub fn next_board(&mut self) {
        if !self.boards.is_empty() {
            self.select((self.selected + 1) % self.boards.len());
        }
    }

    pub fn previous_board(&mut self) {
        if !self.boards.is_empty() {
            self.select((self.selected + self.boards.len() - 1) % self.boards.len());
        }
    }

    pub fn scroll(&mut self, delta: isize) {
        let max = self.rows.len().saturating_sub(self.viewport);
        self.offset = self.offset.saturating_add_signed(delta).min(max);
    }

    pub fn page(&mut self, pages: isize) {
        let viewport = isize::try_from(self.viewport.max(1)).unwrap_or(1);
        self.scroll(pages * viewport);
    }

    pub fn set_viewport(&mut self, rows: usize) {
        self.viewport = rows;
    }

    pub fn resubscribe(&self) {
        let subscriptions = self.pipeline.subscriptions().clone();
        tokio::spawn(async move {
            match subscriptions.resubscribe().await {
                Ok(true) => info!("board resubscribed on request"),
                Ok(false) => {}
                Err(error) => warn!(%error, "resubscribe failed"),
            }
        });
    }

    pub fn on_focus_lost(&self) {
        self.pipeline.subscriptions().on_hidden();
    }

    pub fn on_focus_gained(&self) {
        let subscriptions = self.pipeline.subscriptions().clone();
        tokio::spawn(async move {
            if let Err(error) = subscriptions.on_visible().await {
                warn!(%error, "refresh after focus failed");
            }
        });
    }

    /// Recompute the board rows and remount the viewport, forwarding the visible symbols when
    /// they change.
    pub fn refresh(&mut self) {
        self.rows = self.board_rows();
        self.scroll(0);

        let visible = self.visible_rows().to_vec();
        let services = self.pipeline.services();
        if self.mounted.sync(services, &visible) {
            self.pipeline
                .set_visible_symbols(services.registry.visible_symbols());
        }
    }

    /// Negotiated boards list whatever symbols the feed has pushed so far.
    fn board_rows(&self) -> Vec<Symbol> {
        match self.pipeline.subscriptions().state() {
            SubscriptionState::Active { board, symbols } => match board.kind {
                BoardKind::Negotiated { .. } => {
                    let store = self.pipeline.services().store.read();
                    let mut symbols = store.symbols().cloned().collect::<Vec<_>>();
                    symbols.sort();
                    symbols
                }
                BoardKind::Index | BoardKind::Favorites => symbols,
            },
            SubscriptionState::Idle | SubscriptionState::Subscribing { .. } => Vec::new(),
        }
    }

    pub fn dispose(self) {
        self.pipeline.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use price_board::{PriceCompare, Snapshot, Trade};
    use std::time::Duration;

    fn symbols(list: &[&str]) -> Vec<Symbol> {
        list.iter().map(|symbol| Symbol::new(symbol)).collect()
    }

    #[test]
    fn test_mount_registers_every_column() {
        let services = PipelineServices::create(Duration::from_millis(500));
        let mut mounted = MountedRows::default();

        assert!(mounted.sync(&services, &symbols(&["ACB:G1:STX", "FPT:G1:STX"])));
        assert_eq!(mounted.len(), 2);
        assert_eq!(services.registry.len(), 2 * COLUMNS.len());
        assert!(services.registry.get("ACB:G1:STX", FieldKey::LastPrice).is_some());
        assert!(services.registry.get("ACB:G1:STX", FieldKey::ForeignRoom).is_some());

        assert!(!mounted.sync(&services, &symbols(&["ACB:G1:STX", "FPT:G1:STX"])));
    }

    #[test]
    fn test_scrolled_out_rows_are_unregistered() {
        let services = PipelineServices::create(Duration::from_millis(500));
        let mut mounted = MountedRows::default();

        mounted.sync(&services, &symbols(&["ACB:G1:STX", "FPT:G1:STX"]));
        assert!(mounted.sync(&services, &symbols(&["FPT:G1:STX", "HPG:G1:STX"])));

        assert!(!services.registry.has_visible("ACB:G1:STX"));
        assert!(services.registry.has_visible("HPG:G1:STX"));

        let mut visible = services.registry.visible_symbols();
        visible.sort();
        assert_eq!(visible, symbols(&["FPT:G1:STX", "HPG:G1:STX"]));
        assert!(mounted.cell("ACB:G1:STX", FieldKey::LastPrice).is_none());
    }

    #[test]
    fn test_remount_prunes_dead_registrations() {
        let services = PipelineServices::create(Duration::from_millis(500));
        let detached: Arc<dyn CellSink> = Arc::new(TuiCell::with_color(None));
        services
            .registry
            .register("VIC:G1:STX", FieldKey::LastPrice, &detached);
        drop(detached);

        let mut mounted = MountedRows::default();
        mounted.sync(&services, &symbols(&["ACB:G1:STX"]));
        assert!(mounted.sync(&services, &symbols(&["FPT:G1:STX"])));

        assert_eq!(services.registry.len(), COLUMNS.len());
        assert_eq!(services.registry.visible_symbols(), symbols(&["FPT:G1:STX"]));
    }

    #[test]
    fn test_mounted_cell_starts_with_stored_color() {
        let services = PipelineServices::create(Duration::from_millis(500));
        services.store.write().apply_update(Snapshot::new("ACB:G1:STX").with_trade(Trade {
            price: Some(25_000.0),
            compare: Some(PriceCompare::Up),
            ..Default::default()
        }));

        let mut mounted = MountedRows::default();
        mounted.sync(&services, &symbols(&["ACB:G1:STX"]));

        let style = mounted
            .cell("ACB:G1:STX", FieldKey::LastPrice)
            .unwrap()
            .style();
        assert_eq!(style.color, Some(PriceCompare::Up));
        assert_eq!(style.flash, None);
    }
}
