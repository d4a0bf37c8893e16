/// Price Board - real-time board pipeline
///
/// Turns a stream of partial market-data snapshots into per-cell colour and flash updates for a
/// scrolling board of symbols:
/// - Snapshot store merging partial updates per symbol
/// - Compare engine deriving colours and flashes from feed tags and rendered values
/// - Colour and flash schedulers applying updates to visible cells once per frame
/// - Visibility registry tracking which cells are currently mounted
/// - Subscription manager and reconnecting transport for the market-data feed
pub mod cache;
pub mod compare;
pub mod config;
pub mod error;
pub mod format;
pub mod model;
pub mod pipeline;
pub mod registry;
pub mod schedule;
pub mod store;
pub mod subscription;
pub mod transport;
pub mod wire;
pub mod worker;

// Re-export commonly used types for convenience
pub use model::{
    BookLevel, FieldKey, FlashKind, ForeignRoom, ForeignTrade, OrderBook, PriceCompare, RefPrices,
    Snapshot, Symbol, Trade,
};

pub use compare::{FieldColors, FlashResult};
pub use error::{PipelineError, SinkError};
pub use registry::{CellSink, VisibilityRegistry};
pub use store::{SharedSnapshotStore, SnapshotStore};

pub use cache::{FavoriteList, LocalCache};
pub use config::PipelineConfig;
pub use pipeline::{PipelineServices, PricePipeline};
pub use subscription::{
    Board, BoardId, BoardKind, SelectionOutcome, SubscriptionManager, SubscriptionState,
    SymbolSource,
};
pub use transport::{ConnectionStatus, TransportConfig, TransportHandle};
