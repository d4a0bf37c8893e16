//! Board selection and the feed subscription lifecycle.
//!
//! Selecting a board unsubscribes the previous one, clears every pending colour and flash, resolves
//! the new board's symbols and subscribes to them. Resolution may be slow (a network round trip),
//! so every selection takes a monotonically increasing token; a resolution that finishes after a
//! newer selection has started is discarded.

pub mod board;
pub mod source;

pub use board::{Board, BoardId, BoardKind};
pub use source::{FeedSymbolSource, HttpSymbolSource, SymbolSource};

use crate::{
    cache::LocalCache,
    error::PipelineError,
    model::Symbol,
    pipeline::PipelineServices,
    transport::TransportHandle,
    wire::ControlMessage,
    worker::WorkerRequest,
};
use fnv::FnvHashMap;
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, info, warn};

/// Time hidden after which returning to the board forces a full resubscribe.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionState {
    Idle,
    Subscribing { board: Board, token: u64 },
    Active { board: Board, symbols: Vec<Symbol> },
}

/// Result of [`SubscriptionManager::select_board`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionOutcome {
    Active { board: Board, symbols: Vec<Symbol> },
    /// A newer selection started while this one was resolving symbols.
    Superseded { board: Board },
}

#[derive(Debug)]
struct ManagerState {
    state: SubscriptionState,
    token: u64,
    live: FnvHashMap<BoardId, Vec<Symbol>>,
    hidden_at: Option<Instant>,
}

/// Owns the active board subscription of one pipeline.
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<Mutex<ManagerState>>,
    services: PipelineServices,
    transport: TransportHandle,
    source: Arc<dyn SymbolSource>,
    cache: LocalCache,
    worker_tx: mpsc::Sender<WorkerRequest>,
    stale_after: Duration,
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("state", &self.inner.lock().state)
            .field("stale_after", &self.stale_after)
            .finish()
    }
}

impl SubscriptionManager {
    pub fn new(
        services: PipelineServices,
        transport: TransportHandle,
        source: Arc<dyn SymbolSource>,
        cache: LocalCache,
        worker_tx: mpsc::Sender<WorkerRequest>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManagerState {
                state: SubscriptionState::Idle,
                token: 0,
                live: FnvHashMap::default(),
                hidden_at: None,
            })),
            services,
            transport,
            source,
            cache,
            worker_tx,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn state(&self) -> SubscriptionState {
        self.inner.lock().state.clone()
    }

    /// Board of the current selection, resolved or not.
    pub fn current_board(&self) -> Option<Board> {
        match &self.inner.lock().state {
            SubscriptionState::Idle => None,
            SubscriptionState::Subscribing { board, .. } | SubscriptionState::Active { board, .. } => {
                Some(board.clone())
            }
        }
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    /// Switch the pipeline to `board`.
    pub async fn select_board(&self, board: Board) -> Result<SelectionOutcome, PipelineError> {
        let (token, reset) = self.begin_selection(&board)?;
        if let Some(reset) = reset {
            self.send_worker(reset).await?;
        }

        let symbols = match self.resolve_symbols(&board).await {
            Ok(symbols) => symbols,
            Err(error) => {
                let mut inner = self.inner.lock();
                if inner.token == token {
                    inner.state = SubscriptionState::Idle;
                }
                return Err(error);
            }
        };

        self.complete_selection(board, token, symbols)
    }

    /// Take a new token, unsubscribe the previous board and clear pending work.
    ///
    /// Returns the token and the store reset for the previous board, if one was active.
    fn begin_selection(&self, board: &Board) -> Result<(u64, Option<WorkerRequest>), PipelineError> {
        let mut inner = self.inner.lock();
        inner.token += 1;
        let token = inner.token;

        let previous = std::mem::replace(
            &mut inner.state,
            SubscriptionState::Subscribing {
                board: board.clone(),
                token,
            },
        );
        debug!(%board, token, "selecting board");

        let reset = match previous {
            SubscriptionState::Active {
                board: previous,
                symbols,
            } => {
                self.send_unsubscribe(&previous, &symbols)?;
                Some(reset_request(&previous, symbols))
            }
            SubscriptionState::Idle | SubscriptionState::Subscribing { .. } => None,
        };
        self.services.clear_queues();

        Ok((token, reset))
    }

    fn complete_selection(
        &self,
        board: Board,
        token: u64,
        symbols: Vec<Symbol>,
    ) -> Result<SelectionOutcome, PipelineError> {
        let mut inner = self.inner.lock();
        if inner.token != token {
            debug!(%board, token, current = inner.token, "discarding superseded selection");
            return Ok(SelectionOutcome::Superseded { board });
        }

        if board.kind == BoardKind::Index {
            inner.live.insert(board.id.clone(), symbols.clone());
        }
        inner.state = SubscriptionState::Active {
            board: board.clone(),
            symbols: symbols.clone(),
        };

        // Sent under the lock so a concurrent switch cannot unsubscribe before this subscribe
        self.send_subscribe(&board, &symbols)?;
        info!(%board, symbols = symbols.len(), "board subscribed");

        Ok(SelectionOutcome::Active { board, symbols })
    }

    /// Live cache, then persisted cache, then the symbol source.
    async fn resolve_symbols(&self, board: &Board) -> Result<Vec<Symbol>, PipelineError> {
        match &board.kind {
            BoardKind::Negotiated { .. } => return Ok(Vec::new()),
            BoardKind::Favorites => {
                return self
                    .cache
                    .favorite(board.id.as_str())
                    .map(|list| list.ordered_symbols())
                    .ok_or_else(|| PipelineError::SymbolSource {
                        board: board.id.to_string(),
                        reason: "unknown favourites list".to_string(),
                    });
            }
            BoardKind::Index => {}
        }

        let live = self.inner.lock().live.get(&board.id).cloned();
        if let Some(symbols) = live {
            debug!(%board, "symbols from live cache");
            return Ok(symbols);
        }

        if let Some(symbols) = self.cache.board_symbols(board.id.as_str()) {
            debug!(%board, "symbols from local cache");
            return Ok(symbols);
        }

        let symbols = self.source.list_symbols(board).await?;
        debug!(%board, symbols = symbols.len(), "symbols from source");
        if let Err(error) = self.cache.store_board_symbols(board.id.as_str(), &symbols) {
            warn!(%board, %error, "failed to persist board symbols");
        }

        Ok(symbols)
    }

    /// Full resubscribe of the active board: unsubscribe, clear pending work, drop stored
    /// snapshots, subscribe. Returns `false` if no board is active.
    pub async fn resubscribe(&self) -> Result<bool, PipelineError> {
        let (token, reset) = {
            let inner = self.inner.lock();
            let SubscriptionState::Active { board, symbols } = &inner.state else {
                return Ok(false);
            };

            self.send_unsubscribe(board, symbols)?;
            self.services.clear_queues();
            (inner.token, reset_request(board, symbols.clone()))
        };

        self.send_worker(reset).await?;

        let inner = self.inner.lock();
        if inner.token != token {
            debug!("board changed during resubscribe");
            return Ok(false);
        }
        let SubscriptionState::Active { board, symbols } = &inner.state else {
            return Ok(false);
        };
        self.send_subscribe(board, symbols)?;
        info!(%board, "board resubscribed");

        Ok(true)
    }

    /// The board went out of view (hidden tab, minimised window, lost focus).
    pub fn on_hidden(&self) {
        self.inner.lock().hidden_at.get_or_insert_with(Instant::now);
    }

    /// The board came back into view. Resubscribes if it was hidden for longer than the stale
    /// threshold; returns whether it did.
    pub async fn on_visible(&self) -> Result<bool, PipelineError> {
        let hidden_for = self
            .inner
            .lock()
            .hidden_at
            .take()
            .map(|hidden_at| hidden_at.elapsed());

        match hidden_for {
            Some(hidden_for) if hidden_for > self.stale_after => {
                info!(hidden_secs = hidden_for.as_secs(), "board data stale, resubscribing");
                self.resubscribe().await
            }
            _ => Ok(false),
        }
    }

    /// Forward the on-screen symbols to the transport as a priority hint. The subscription set is
    /// unchanged.
    pub fn set_visible_symbols(&self, symbols: Vec<Symbol>) {
        self.transport.set_visible_symbols(Some(symbols));
    }

    fn send_subscribe(&self, board: &Board, symbols: &[Symbol]) -> Result<(), PipelineError> {
        let session_id = self.transport.session_id();
        let message = match &board.kind {
            BoardKind::Negotiated { market_id } => {
                ControlMessage::request_negotiated(session_id, board.id.0.clone(), market_id.clone())
            }
            BoardKind::Index | BoardKind::Favorites => {
                ControlMessage::subscribe(session_id, board.id.0.clone(), symbols.to_vec())
            }
        };
        self.transport.send(message)
    }

    fn send_unsubscribe(&self, board: &Board, symbols: &[Symbol]) -> Result<(), PipelineError> {
        self.transport.send(ControlMessage::unsubscribe(
            self.transport.session_id(),
            board.id.0.clone(),
            symbols.to_vec(),
        ))
    }

    async fn send_worker(&self, request: WorkerRequest) -> Result<(), PipelineError> {
        self.worker_tx
            .send(request)
            .await
            .map_err(|_| PipelineError::ChannelClosed("worker request"))
    }
}

/// Store reset for a board being left. Negotiated boards have no fixed symbol set, so everything
/// goes.
fn reset_request(board: &Board, symbols: Vec<Symbol>) -> WorkerRequest {
    match board.kind {
        BoardKind::Negotiated { .. } => WorkerRequest::Reset { symbols: None },
        BoardKind::Index | BoardKind::Favorites => WorkerRequest::Reset {
            symbols: Some(symbols),
        },
    }
}
