//! Explicitly constructed pipeline instances.
//!
//! [`PipelineServices`] bundles the state shared by one board view: snapshot store, visibility
//! registry and the two schedulers driven by one frame signal. [`PricePipeline`] spawns the tasks
//! around it (transport, compute worker, update applier, frame driver) and owns them until
//! disposed. Any number of pipelines can run side by side.

use crate::{
    cache::LocalCache,
    compare::compare,
    config::PipelineConfig,
    error::PipelineError,
    format::display_value,
    model::{FieldKey, PriceCompare, Snapshot, Symbol},
    registry::VisibilityRegistry,
    schedule::{ColorScheduler, FlashScheduler, FrameSignal, spawn_frame_driver},
    store::{SharedSnapshotStore, SnapshotStore},
    subscription::{
        Board, FeedSymbolSource, HttpSymbolSource, SelectionOutcome, SubscriptionManager,
        SymbolSource,
    },
    transport::{ConnectionStatus, TransportChannels, TransportClient, TransportHandle},
    wire::SessionId,
    worker::{PipelineUpdate, WorkerResponse, compute_batch, spawn_compute_worker},
};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

/// Shared state of one pipeline instance.
#[derive(Debug, Clone)]
pub struct PipelineServices {
    pub store: SharedSnapshotStore,
    pub registry: VisibilityRegistry,
    pub frame: FrameSignal,
    pub colors: ColorScheduler,
    pub flashes: FlashScheduler,
}

impl PipelineServices {
    pub fn create(flash_duration: Duration) -> Self {
        let store = SnapshotStore::shared();
        let registry = VisibilityRegistry::new();
        let frame = FrameSignal::new();
        let colors = ColorScheduler::new(registry.clone(), frame.clone());
        let flashes = FlashScheduler::new(registry.clone(), frame.clone(), flash_duration);

        Self {
            store,
            registry,
            frame,
            colors,
            flashes,
        }
    }

    /// Queue the colours and flashes of a computed update.
    pub fn apply_update(&self, update: PipelineUpdate) {
        let PipelineUpdate { colors, flash } = update;
        for (symbol, colors) in colors {
            self.colors.queue_colors(symbol, colors);
        }
        self.flashes.queue_flash(&flash);
    }

    /// Merge and compare `batch` on the calling task, then queue the outcome.
    pub fn process_batch(&self, batch: Vec<Snapshot>) {
        let update = {
            let mut store = self.store.write();
            compute_batch(&mut store, batch)
        };
        self.apply_update(update);
    }

    /// Drop every pending colour and flash.
    pub fn clear_queues(&self) {
        self.colors.clear();
        self.flashes.clear();
    }

    /// What a cell mounting now should show: the rendered value and the colour of its stored
    /// comparison tag.
    pub fn cell_state(&self, symbol: &str, field: FieldKey) -> Option<(String, Option<PriceCompare>)> {
        let store = self.store.read();
        let snapshot = store.get(symbol)?;

        let color = compare(None, snapshot)
            .into_iter()
            .find(|outcome| outcome.field == field)
            .and_then(|outcome| outcome.compare.color_class().map(|_| outcome.compare));

        Some((display_value(snapshot, field), color))
    }

    pub fn spawn_frame_driver(&self, interval: Duration) -> JoinHandle<()> {
        spawn_frame_driver(
            self.frame.clone(),
            self.colors.clone(),
            self.flashes.clone(),
            interval,
        )
    }
}

/// Spawn the task that queues every worker update into `services`' schedulers.
pub fn spawn_update_applier(
    services: PipelineServices,
    mut responses: mpsc::Receiver<WorkerResponse>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(response) = responses.recv().await {
            match response {
                WorkerResponse::Update(update) => services.apply_update(update),
            }
        }
        debug!("update applier stopped");
    })
}

/// A running pipeline.
#[derive(Debug)]
pub struct PricePipeline {
    services: PipelineServices,
    subscriptions: SubscriptionManager,
    transport: TransportHandle,
    status: watch::Receiver<ConnectionStatus>,
    tasks: Vec<JoinHandle<()>>,
}

impl PricePipeline {
    /// Spawn a pipeline from `config`, resolving board symbols over HTTP when an API URL is set
    /// and over the feed otherwise.
    pub fn spawn(config: PipelineConfig) -> Result<Self, PipelineError> {
        let cache = match config.cache_path() {
            Some(path) => LocalCache::load(path)?,
            None => LocalCache::in_memory(),
        };

        let (transport, channels) = TransportHandle::new(SessionId::random());
        let source: Arc<dyn SymbolSource> = match &config.api_url {
            Some(api_url) => Arc::new(HttpSymbolSource::new(api_url.clone())?),
            None => Arc::new(FeedSymbolSource::new(transport.clone())),
        };

        Ok(Self::spawn_with(config, transport, channels, source, cache))
    }

    /// Spawn a pipeline resolving board symbols through `source`.
    pub fn spawn_with_source(
        config: PipelineConfig,
        source: Arc<dyn SymbolSource>,
        cache: LocalCache,
    ) -> Self {
        let (transport, channels) = TransportHandle::new(SessionId::random());
        Self::spawn_with(config, transport, channels, source, cache)
    }

    fn spawn_with(
        config: PipelineConfig,
        transport: TransportHandle,
        channels: TransportChannels,
        source: Arc<dyn SymbolSource>,
        cache: LocalCache,
    ) -> Self {
        info!(
            session_id = %transport.session_id(),
            url = %config.transport.url,
            "spawning price pipeline"
        );

        let services = PipelineServices::create(config.flash_duration);
        let (worker_tx, worker_rx) = mpsc::channel(config.worker_buffer_size);
        let (response_tx, response_rx) = mpsc::channel(config.worker_buffer_size);

        let subscriptions = SubscriptionManager::new(
            services.clone(),
            transport.clone(),
            source,
            cache,
            worker_tx.clone(),
        )
        .with_stale_after(config.stale_after);

        let worker = spawn_compute_worker(services.store.clone(), worker_rx, response_tx);
        let applier = spawn_update_applier(services.clone(), response_rx);
        let frames = services.spawn_frame_driver(config.frame_interval);

        let (status_rx, transport_task) =
            TransportClient::new(config.transport, channels, worker_tx).start();
        let (status_tx, status) = watch::channel(ConnectionStatus::Disconnected);
        let monitor = spawn_status_monitor(status_rx, status_tx, subscriptions.clone());

        Self {
            services,
            subscriptions,
            transport,
            status,
            tasks: vec![worker, applier, frames, transport_task, monitor],
        }
    }

    pub fn services(&self) -> &PipelineServices {
        &self.services
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn transport(&self) -> &TransportHandle {
        &self.transport
    }

    /// Latest connection status.
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn status_receiver(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    pub async fn select_board(&self, board: Board) -> Result<SelectionOutcome, PipelineError> {
        self.subscriptions.select_board(board).await
    }

    /// Forward the symbols of the rows currently on screen to the transport.
    pub fn set_visible_symbols(&self, symbols: Vec<Symbol>) {
        self.subscriptions.set_visible_symbols(symbols);
    }

    /// Stop every task and drop pending work. Cells registered by the view stay with the view.
    pub fn dispose(mut self) {
        self.shutdown();
        info!("price pipeline disposed");
    }

    fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.services.clear_queues();
    }
}

impl Drop for PricePipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Publish the latest status and resubscribe the active board after every reconnect.
fn spawn_status_monitor(
    mut status_rx: mpsc::Receiver<ConnectionStatus>,
    status_tx: watch::Sender<ConnectionStatus>,
    subscriptions: SubscriptionManager,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut connected_before = false;

        while let Some(status) = status_rx.recv().await {
            status_tx.send_replace(status);

            if status != ConnectionStatus::Connected {
                continue;
            }
            if !connected_before {
                connected_before = true;
                continue;
            }

            match subscriptions.resubscribe().await {
                Ok(true) => info!("resubscribed after reconnect"),
                Ok(false) => {}
                Err(error) if error.is_terminal() => {
                    error!(%error, "resubscribe after reconnect failed");
                    break;
                }
                Err(error) => warn!(%error, "resubscribe after reconnect failed"),
            }
        }
    })
}
