//! Reconnecting client for the market-data feed.
//!
//! One long-lived websocket connection carries every subscription of the session. The client:
//! - reconnects after a fixed delay whenever the socket closes, errors or goes idle;
//! - forwards control messages sent through a [`TransportHandle`];
//! - decodes inbound frames and hands partial snapshots to the compute worker in batches, one
//!   batch per batch interval (or sooner once `max_batch` updates are buffered);
//! - coalesces updates of symbols outside the visible-symbol hint, so an off-screen symbol
//!   contributes at most one merged update per batch.

use crate::{
    error::PipelineError,
    model::{Merge, Snapshot, Symbol},
    wire::{ControlMessage, SessionId, WireMessage},
    worker::WorkerRequest,
};
use fnv::{FnvHashMap, FnvHashSet};
use futures::{Sink, SinkExt, StreamExt};
use smol_str::SmolStr;
use std::{sync::Arc, time::Duration};
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, error, info, warn};

/// Default read timeout for the feed connection.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Feed websocket URL.
    pub url: String,
    /// Ping interval to keep the connection alive.
    pub ping_interval: Duration,
    /// Delay before reconnecting after a disconnect.
    pub reconnect_delay: Duration,
    /// Close and reconnect if nothing is read for this long.
    pub read_timeout: Duration,
    /// Interval at which buffered updates are handed to the compute worker.
    pub batch_interval: Duration,
    /// Buffered update count that forces an early batch.
    pub max_batch: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9101".to_string(),
            ping_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(2),
            read_timeout: DEFAULT_READ_TIMEOUT,
            batch_interval: Duration::from_millis(50),
            max_batch: 500,
        }
    }
}

impl TransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_batch_interval(mut self, interval: Duration) -> Self {
        self.batch_interval = interval;
        self
    }

    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch.max(1);
        self
    }
}

/// Connection status updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Reconnecting,
}

/// Command accepted by the transport loop.
#[derive(Debug)]
pub enum TransportCommand {
    Send(ControlMessage),
    /// Send a `list-symbols` message and deliver the matching reply.
    ListSymbols {
        message: ControlMessage,
        reply: oneshot::Sender<Vec<Symbol>>,
    },
}

/// Receiving ends of a [`TransportHandle`], consumed by the transport loop.
#[derive(Debug)]
pub struct TransportChannels {
    pub commands: mpsc::UnboundedReceiver<TransportCommand>,
    pub visible: watch::Receiver<Option<FnvHashSet<Symbol>>>,
}

/// Cheaply cloneable handle for sending control messages over the session's connection.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    session_id: SessionId,
    commands: mpsc::UnboundedSender<TransportCommand>,
    visible: Arc<watch::Sender<Option<FnvHashSet<Symbol>>>>,
}

impl TransportHandle {
    pub fn new(session_id: SessionId) -> (Self, TransportChannels) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (visible_tx, visible_rx) = watch::channel(None);

        let handle = Self {
            session_id,
            commands: command_tx,
            visible: Arc::new(visible_tx),
        };
        let channels = TransportChannels {
            commands: command_rx,
            visible: visible_rx,
        };

        (handle, channels)
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Queue a control message. Messages are written in the order they are queued.
    pub fn send(&self, message: ControlMessage) -> Result<(), PipelineError> {
        self.commands
            .send(TransportCommand::Send(message))
            .map_err(|_| PipelineError::ChannelClosed("transport command"))
    }

    /// Ask the feed for the symbols of `group_id` and wait for its reply.
    pub async fn list_symbols(&self, group_id: SmolStr) -> Result<Vec<Symbol>, PipelineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(TransportCommand::ListSymbols {
                message: ControlMessage::list_symbols(&self.session_id, group_id),
                reply: reply_tx,
            })
            .map_err(|_| PipelineError::ChannelClosed("transport command"))?;

        reply_rx
            .await
            .map_err(|_| PipelineError::ChannelClosed("symbol list reply"))
    }

    /// Hint which symbols are currently on screen. `None` treats every symbol as visible.
    pub fn set_visible_symbols(&self, symbols: Option<Vec<Symbol>>) {
        self.visible
            .send_replace(symbols.map(|symbols| symbols.into_iter().collect()));
    }
}

/// Reconnecting feed client.
pub struct TransportClient {
    config: TransportConfig,
    channels: TransportChannels,
    worker_tx: mpsc::Sender<WorkerRequest>,
    status_tx: mpsc::Sender<ConnectionStatus>,
    status_rx: mpsc::Receiver<ConnectionStatus>,
}

impl TransportClient {
    pub fn new(
        config: TransportConfig,
        channels: TransportChannels,
        worker_tx: mpsc::Sender<WorkerRequest>,
    ) -> Self {
        let (status_tx, status_rx) = mpsc::channel(10);

        Self {
            config,
            channels,
            worker_tx,
            status_tx,
            status_rx,
        }
    }

    /// Start the connection loop.
    ///
    /// Returns a receiver for connection status updates and the loop's task handle. The loop ends
    /// when every [`TransportHandle`] is dropped or the worker goes away.
    pub fn start(self) -> (mpsc::Receiver<ConnectionStatus>, JoinHandle<()>) {
        let Self {
            config,
            channels,
            worker_tx,
            status_tx,
            status_rx,
        } = self;

        let task = tokio::spawn(run_transport_loop(config, channels, worker_tx, status_tx));

        (status_rx, task)
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disconnect {
    Reconnect,
    Shutdown,
}

/// A `list-symbols` message awaiting its reply.
#[derive(Debug)]
struct PendingList {
    message: ControlMessage,
    replies: Vec<oneshot::Sender<Vec<Symbol>>>,
}

type PendingLists = FnvHashMap<SmolStr, PendingList>;

type FeedStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn run_transport_loop(
    config: TransportConfig,
    mut channels: TransportChannels,
    worker_tx: mpsc::Sender<WorkerRequest>,
    status_tx: mpsc::Sender<ConnectionStatus>,
) {
    info!(url = %config.url, "starting feed transport");
    let mut pending_lists = PendingLists::default();

    loop {
        let _ = status_tx.send(ConnectionStatus::Reconnecting).await;

        let disconnect = match connect_async(&config.url).await {
            Ok((ws_stream, _)) => {
                info!(url = %config.url, "connected to feed");
                let _ = status_tx.send(ConnectionStatus::Connected).await;

                let disconnect = run_connection(
                    &config,
                    ws_stream,
                    &mut channels,
                    &mut pending_lists,
                    &worker_tx,
                )
                .await;

                let _ = status_tx.send(ConnectionStatus::Disconnected).await;
                disconnect
            }
            Err(error) => {
                error!(url = %config.url, %error, "failed to connect to feed");
                let _ = status_tx.send(ConnectionStatus::Disconnected).await;
                Disconnect::Reconnect
            }
        };

        if disconnect == Disconnect::Shutdown {
            info!("feed transport stopped");
            return;
        }

        debug!(delay = ?config.reconnect_delay, "waiting before reconnecting");
        tokio::time::sleep(config.reconnect_delay).await;
    }
}

async fn run_connection(
    config: &TransportConfig,
    ws_stream: FeedStream,
    channels: &mut TransportChannels,
    pending_lists: &mut PendingLists,
    worker_tx: &mpsc::Sender<WorkerRequest>,
) -> Disconnect {
    let (mut write, mut read) = ws_stream.split();

    // Requests sent over a dropped connection are never answered
    prune_abandoned_lists(pending_lists);
    for pending in pending_lists.values() {
        if let Err(error) = write_control(&mut write, &pending.message).await {
            error!(%error, "failed to resend list-symbols request");
            return Disconnect::Reconnect;
        }
    }

    let mut ping = tokio::time::interval(config.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut flush = tokio::time::interval(config.batch_interval);
    flush.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut batcher = Batcher::default();

    // A feed that stops sending without closing the socket leaves the board on stale prices
    let idle = tokio::time::sleep(config.read_timeout);
    tokio::pin!(idle);

    let disconnect = loop {
        tokio::select! {
            _ = &mut idle => {
                warn!(
                    timeout_secs = config.read_timeout.as_secs(),
                    "feed read timeout, no data received"
                );
                break Disconnect::Reconnect;
            },
            message = read.next() => {
                idle.as_mut().reset(Instant::now() + config.read_timeout);
                match message {
                    Some(Ok(Message::Text(text))) => {
                        {
                            let visible = channels.visible.borrow();
                            handle_text(text.as_str(), &mut batcher, pending_lists, visible.as_ref());
                        }

                        if batcher.len() >= config.max_batch && !send_batch(&mut batcher, worker_tx).await {
                            break Disconnect::Shutdown;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        warn!("feed connection closed, will reconnect");
                        break Disconnect::Reconnect;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        error!(%error, "feed connection error");
                        break Disconnect::Reconnect;
                    }
                }
            },
            command = channels.commands.recv() => {
                let Some(command) = command else {
                    info!("all transport handles dropped");
                    break Disconnect::Shutdown;
                };

                let message = match command {
                    TransportCommand::Send(message) => message,
                    TransportCommand::ListSymbols { message, reply } => {
                        prune_abandoned_lists(pending_lists);
                        let Some(group_id) = message.group_id.clone() else {
                            warn!("list-symbols request without group id");
                            continue;
                        };
                        pending_lists
                            .entry(group_id)
                            .or_insert_with(|| PendingList {
                                message: message.clone(),
                                replies: Vec::new(),
                            })
                            .replies
                            .push(reply);
                        message
                    }
                };

                if let Err(error) = write_control(&mut write, &message).await {
                    error!(%error, action = %message.action, "failed to send control message");
                    if error.is_terminal() {
                        break Disconnect::Reconnect;
                    }
                }
            },
            _ = ping.tick() => {
                if write.send(Message::Ping(vec![].into())).await.is_err() {
                    debug!("failed to send ping, connection likely dead");
                    break Disconnect::Reconnect;
                }
            },
            _ = flush.tick() => {
                if !send_batch(&mut batcher, worker_tx).await {
                    break Disconnect::Shutdown;
                }
            },
        }
    };

    // Updates read before the disconnect are still valid
    if disconnect == Disconnect::Reconnect && !send_batch(&mut batcher, worker_tx).await {
        return Disconnect::Shutdown;
    }

    disconnect
}

/// Forget `list-symbols` requests whose callers stopped waiting.
fn prune_abandoned_lists(pending_lists: &mut PendingLists) {
    pending_lists.retain(|group_id, pending| {
        pending.replies.retain(|reply| !reply.is_closed());
        if pending.replies.is_empty() {
            debug!(%group_id, "dropping abandoned list-symbols request");
            return false;
        }
        true
    });
}

async fn write_control<W>(write: &mut W, message: &ControlMessage) -> Result<(), PipelineError>
where
    W: Sink<Message, Error = WsError> + Unpin,
{
    let text = message.encode()?;
    debug!(action = %message.action, group = ?message.group_id, "sending control message");
    write.send(Message::text(text)).await?;
    Ok(())
}

/// Hand the buffered updates to the worker. Returns `false` if the worker is gone.
async fn send_batch(batcher: &mut Batcher, worker_tx: &mpsc::Sender<WorkerRequest>) -> bool {
    let Some(batch) = batcher.take() else {
        return true;
    };

    if worker_tx.send(WorkerRequest::Batch(batch)).await.is_err() {
        warn!("compute worker dropped, stopping transport");
        return false;
    }
    true
}

/// Route one inbound text frame.
fn handle_text(
    text: &str,
    batcher: &mut Batcher,
    pending_lists: &mut PendingLists,
    visible: Option<&FnvHashSet<Symbol>>,
) {
    let message = match WireMessage::decode(text) {
        Ok(message) => message,
        Err(error) => {
            warn!(%error, "failed to decode feed message");
            debug!(raw = text, "undecodable feed message");
            return;
        }
    };

    match message {
        WireMessage::SymbolList { group_id, symbols } => {
            let Some(pending) = pending_lists.remove(&group_id) else {
                debug!(%group_id, "unsolicited symbol list");
                return;
            };
            debug!(%group_id, symbols = symbols.len(), "received symbol list");
            for reply in pending.replies {
                let _ = reply.send(symbols.clone());
            }
        }
        WireMessage::Welcome { message } => {
            debug!(?message, "received welcome message");
        }
        message => {
            if let Some(update) = message.into_update() {
                let is_visible = visible.is_none_or(|visible| visible.contains(&update.symbol));
                batcher.push(update, is_visible);
            }
        }
    }
}

/// Updates buffered between two batches.
///
/// Visible symbols keep every update in arrival order. Updates of an off-screen symbol merge into
/// a single entry, placed where that symbol's first buffered update arrived.
#[derive(Debug, Default)]
struct Batcher {
    updates: Vec<Snapshot>,
    coalesced: FnvHashMap<Symbol, usize>,
}

impl Batcher {
    fn push(&mut self, update: Snapshot, is_visible: bool) {
        if is_visible {
            // Later off-screen updates must land after this one
            self.coalesced.remove(&update.symbol);
            self.updates.push(update);
            return;
        }

        if let Some(&index) = self.coalesced.get(&update.symbol) {
            self.updates[index].merge(update);
            return;
        }

        self.coalesced.insert(update.symbol.clone(), self.updates.len());
        self.updates.push(update);
    }

    fn take(&mut self) -> Option<Vec<Snapshot>> {
        self.coalesced.clear();
        (!self.updates.is_empty()).then(|| std::mem::take(&mut self.updates))
    }

    fn len(&self) -> usize {
        self.updates.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{PriceCompare, Trade},
        wire::ControlAction,
    };
    use tokio::net::TcpListener;

    const SYMBOL: &str = "ACB:G1:STX";

    fn trade(symbol: &str, price: f64) -> Snapshot {
        Snapshot::new(symbol).with_trade(Trade {
            price: Some(price),
            ..Default::default()
        })
    }

    fn prices(updates: &[Snapshot]) -> Vec<(&str, Option<f64>)> {
        updates
            .iter()
            .map(|update| {
                (
                    update.symbol.as_str(),
                    update.trade.as_ref().and_then(|trade| trade.price),
                )
            })
            .collect()
    }

    #[test]
    fn test_config_builder() {
        let config = TransportConfig::new("ws://localhost:8080")
            .with_ping_interval(Duration::from_secs(15))
            .with_reconnect_delay(Duration::from_secs(5))
            .with_read_timeout(Duration::from_secs(60))
            .with_batch_interval(Duration::from_millis(20))
            .with_max_batch(0);

        assert_eq!(config.url, "ws://localhost:8080");
        assert_eq!(config.ping_interval, Duration::from_secs(15));
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.read_timeout, Duration::from_secs(60));
        assert_eq!(config.batch_interval, Duration::from_millis(20));
        assert_eq!(config.max_batch, 1);
    }

    #[test]
    fn test_batcher_keeps_visible_updates_in_order() {
        let mut batcher = Batcher::default();
        batcher.push(trade(SYMBOL, 1.0), true);
        batcher.push(trade(SYMBOL, 2.0), true);

        let batch = batcher.take().unwrap();
        assert_eq!(prices(&batch), vec![(SYMBOL, Some(1.0)), (SYMBOL, Some(2.0))]);
        assert!(batcher.take().is_none());
    }

    #[test]
    fn test_batcher_coalesces_offscreen_symbol() {
        let mut batcher = Batcher::default();
        batcher.push(trade("FPT:G1:STX", 1.0), false);
        batcher.push(trade(SYMBOL, 5.0), true);
        batcher.push(trade("FPT:G1:STX", 2.0), false);
        batcher.push(
            Snapshot::new("FPT:G1:STX").with_trade(Trade {
                compare: Some(PriceCompare::Up),
                ..Default::default()
            }),
            false,
        );

        let batch = batcher.take().unwrap();
        assert_eq!(
            prices(&batch),
            vec![("FPT:G1:STX", Some(2.0)), (SYMBOL, Some(5.0))]
        );
        assert_eq!(
            batch[0].trade.as_ref().unwrap().compare,
            Some(PriceCompare::Up)
        );
    }

    #[test]
    fn test_batcher_visibility_change_preserves_order() {
        let mut batcher = Batcher::default();
        batcher.push(trade(SYMBOL, 1.0), false);
        batcher.push(trade(SYMBOL, 2.0), true);
        batcher.push(trade(SYMBOL, 3.0), false);

        let batch = batcher.take().unwrap();
        assert_eq!(
            prices(&batch),
            vec![(SYMBOL, Some(1.0)), (SYMBOL, Some(2.0)), (SYMBOL, Some(3.0))]
        );
    }

    #[tokio::test]
    async fn test_handle_text_routes_messages() {
        let mut batcher = Batcher::default();
        let mut pending_lists = PendingLists::default();
        let session = SessionId::from(SmolStr::new("tab-1"));
        let (reply_tx, reply_rx) = oneshot::channel();
        pending_lists.insert(
            SmolStr::new("VN30"),
            PendingList {
                message: ControlMessage::list_symbols(&session, SmolStr::new("VN30")),
                replies: vec![reply_tx],
            },
        );

        handle_text(r#"{"t":"W","m":"hi"}"#, &mut batcher, &mut pending_lists, None);
        handle_text("not json", &mut batcher, &mut pending_lists, None);
        handle_text(
            r#"{"t":"T","s":"ACB:G1:STX","p":25000,"pc":"u"}"#,
            &mut batcher,
            &mut pending_lists,
            None,
        );
        handle_text(
            r#"{"t":"L","g":"VN30","s":["ACB:G1:STX","FPT:G1:STX"]}"#,
            &mut batcher,
            &mut pending_lists,
            None,
        );

        assert_eq!(batcher.len(), 1);
        assert!(pending_lists.is_empty());
        assert_eq!(
            reply_rx.await.unwrap(),
            vec![Symbol::new("ACB:G1:STX"), Symbol::new("FPT:G1:STX")]
        );
    }

    #[test]
    fn test_abandoned_list_requests_are_pruned() {
        let session = SessionId::from(SmolStr::new("tab-1"));
        let (abandoned_tx, abandoned_rx) = oneshot::channel();
        let (waiting_tx, _waiting_rx) = oneshot::channel();
        drop(abandoned_rx);

        let mut pending_lists = PendingLists::default();
        for (group_id, reply) in [("VN30", abandoned_tx), ("HNX30", waiting_tx)] {
            pending_lists.insert(
                SmolStr::new(group_id),
                PendingList {
                    message: ControlMessage::list_symbols(&session, SmolStr::new(group_id)),
                    replies: vec![reply],
                },
            );
        }

        prune_abandoned_lists(&mut pending_lists);

        assert_eq!(pending_lists.len(), 1);
        assert!(pending_lists.contains_key("HNX30"));
    }

    #[tokio::test]
    async fn test_silent_feed_triggers_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let _ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let (handle, channels) = TransportHandle::new(SessionId::from(SmolStr::new("tab-1")));
        let (worker_tx, _worker_rx) = mpsc::channel(8);
        let config = TransportConfig::new(url)
            .with_read_timeout(Duration::from_millis(100))
            .with_reconnect_delay(Duration::from_millis(10));
        let (mut status_rx, task) = TransportClient::new(config, channels, worker_tx).start();

        assert_eq!(status_rx.recv().await, Some(ConnectionStatus::Reconnecting));
        assert_eq!(status_rx.recv().await, Some(ConnectionStatus::Connected));

        let status = tokio::time::timeout(Duration::from_secs(5), status_rx.recv())
            .await
            .unwrap();
        assert_eq!(status, Some(ConnectionStatus::Disconnected));

        drop(handle);
        task.abort();
        server.abort();
    }

    #[tokio::test]
    async fn test_transport_against_local_feed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            ws.send(Message::text(r#"{"t":"T","s":"ACB:G1:STX","p":25000,"pc":"u"}"#))
                .await
                .unwrap();

            // First text frame from the client is the subscribe message
            loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        let message: ControlMessage = serde_json::from_str(text.as_str()).unwrap();
                        return message;
                    }
                    Some(Ok(_)) => continue,
                    other => panic!("unexpected frame: {other:?}"),
                }
            }
        });

        let (handle, channels) = TransportHandle::new(SessionId::from(SmolStr::new("tab-1")));
        let (worker_tx, mut worker_rx) = mpsc::channel(8);
        let config = TransportConfig::new(url).with_batch_interval(Duration::from_millis(10));
        let (mut status_rx, task) = TransportClient::new(config, channels, worker_tx).start();

        assert_eq!(status_rx.recv().await, Some(ConnectionStatus::Reconnecting));
        assert_eq!(status_rx.recv().await, Some(ConnectionStatus::Connected));

        handle
            .send(ControlMessage::subscribe(
                handle.session_id(),
                SmolStr::new("VN30"),
                vec![Symbol::new(SYMBOL)],
            ))
            .unwrap();

        let Some(WorkerRequest::Batch(batch)) = worker_rx.recv().await else {
            panic!("expected a batch");
        };
        assert_eq!(prices(&batch), vec![(SYMBOL, Some(25_000.0))]);

        let subscribe = server.await.unwrap();
        assert_eq!(subscribe.action, ControlAction::Subscribe);
        assert_eq!(subscribe.symbols, Some(vec![Symbol::new(SYMBOL)]));

        drop(handle);
        drop(worker_rx);
        task.abort();
    }
}
