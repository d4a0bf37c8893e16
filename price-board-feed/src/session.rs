use crate::market::Market;
use fnv::{FnvHashMap, FnvHashSet};
use price_board::{
    Symbol,
    wire::{ControlAction, ControlMessage, WireMessage},
};
use rand::Rng;
use smol_str::SmolStr;
use tracing::{debug, warn};

/// Symbols one client subscribed to, grouped by the board that asked for them.
#[derive(Debug, Default)]
pub struct ClientSubscriptions {
    groups: FnvHashMap<SmolStr, FnvHashSet<Symbol>>,
}

impl ClientSubscriptions {
    /// Apply a control message, returning the frames to send back.
    pub fn handle<R: Rng>(
        &mut self,
        control: ControlMessage,
        market: &Market,
        rng: &mut R,
    ) -> Vec<WireMessage> {
        let group_id = control.group_id.unwrap_or_default();
        debug!(
            action = %control.action,
            session = %control.session_id,
            group = %group_id,
            "control message"
        );

        match control.action {
            ControlAction::Subscribe => {
                let symbols = control.symbols.unwrap_or_default();
                self.subscribe(group_id, symbols, market, rng)
            }
            ControlAction::Unsubscribe => {
                match control.symbols {
                    Some(symbols) if !symbols.is_empty() => {
                        if let Some(group) = self.groups.get_mut(&group_id) {
                            for symbol in &symbols {
                                group.remove(symbol);
                            }
                            if group.is_empty() {
                                self.groups.remove(&group_id);
                            }
                        }
                    }
                    _ => {
                        self.groups.remove(&group_id);
                    }
                }
                Vec::new()
            }
            ControlAction::ListSymbols => {
                let symbols = market.board_symbols(&group_id);
                if symbols.is_empty() {
                    warn!(group = %group_id, "symbols requested for unknown board");
                }
                vec![WireMessage::SymbolList { group_id, symbols }]
            }
            ControlAction::RequestNegotiated => {
                let market_id = control.market_id.unwrap_or_default();
                let symbols = market.negotiated_symbols(&market_id);
                if symbols.is_empty() {
                    warn!(market = %market_id, "negotiated deals requested for unknown market");
                }
                self.subscribe(group_id, symbols, market, rng)
            }
        }
    }

    fn subscribe<R: Rng>(
        &mut self,
        group_id: SmolStr,
        symbols: Vec<Symbol>,
        market: &Market,
        rng: &mut R,
    ) -> Vec<WireMessage> {
        let group = self.groups.entry(group_id).or_default();

        symbols
            .into_iter()
            .filter(|symbol| group.insert(symbol.clone()))
            .flat_map(|symbol| market.snapshot(&symbol, rng))
            .collect()
    }

    /// Whether a broadcast market-data frame should reach this client.
    pub fn wants(&self, message: &WireMessage) -> bool {
        message
            .symbol()
            .is_some_and(|symbol| self.groups.values().any(|group| group.contains(symbol)))
    }

    pub fn symbol_count(&self) -> usize {
        self.groups.values().map(FnvHashSet::len).sum()
    }
}
