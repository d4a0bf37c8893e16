//! Compute worker: merges snapshot batches into the store and runs the compare engine off the
//! task that drives frames.
//!
//! The worker talks to the rest of the pipeline only through the typed [`WorkerRequest`] and
//! [`WorkerResponse`] messages, and is the only writer of the snapshot store: a reset queued after
//! a batch is applied after that batch.

use crate::{
    compare::{FieldColors, FlashResult, colors, compare, flashes},
    model::{Snapshot, Symbol},
    store::{SharedSnapshotStore, SnapshotStore},
};
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

/// Message into the worker.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum WorkerRequest {
    /// Partial snapshots in arrival order.
    Batch(Vec<Snapshot>),
    /// Drop stored snapshots of `symbols`, or of every symbol if `None`.
    Reset { symbols: Option<Vec<Symbol>> },
}

/// Message out of the worker.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum WorkerResponse {
    Update(PipelineUpdate),
}

/// Colours and flashes computed from one batch.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct PipelineUpdate {
    pub colors: FnvHashMap<Symbol, FieldColors>,
    pub flash: Vec<FlashResult>,
}

impl PipelineUpdate {
    pub fn is_empty(&self) -> bool {
        self.colors.is_empty() && self.flash.is_empty()
    }
}

/// Merge every update of `batch` into `store`, in order, and compare each against the snapshot it
/// replaced.
///
/// Two updates of the same field within one batch collapse to the later colour; both flashes are
/// kept and deduplicated per cell by the flash scheduler.
pub fn compute_batch(store: &mut SnapshotStore, batch: Vec<Snapshot>) -> PipelineUpdate {
    let mut update = PipelineUpdate::default();

    for snapshot in batch {
        if snapshot.is_empty() {
            continue;
        }

        let symbol = snapshot.symbol.clone();
        let previous = store.apply_update(snapshot);
        let Some(current) = store.get(&symbol) else {
            continue;
        };

        let outcomes = compare(previous.as_ref(), current);
        update.flash.extend(flashes(&symbol, &outcomes));
        update
            .colors
            .entry(symbol)
            .or_default()
            .extend(colors(&outcomes));
    }

    update
}

/// Spawn the compute worker task.
///
/// The task ends when either the request sender is dropped or the response receiver is.
pub fn spawn_compute_worker(
    store: SharedSnapshotStore,
    mut requests: mpsc::Receiver<WorkerRequest>,
    responses: mpsc::Sender<WorkerResponse>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("compute worker started");

        while let Some(request) = requests.recv().await {
            match request {
                WorkerRequest::Batch(batch) => {
                    let batch_len = batch.len();
                    let update = {
                        let mut store = store.write();
                        compute_batch(&mut store, batch)
                    };

                    debug!(
                        batch_len,
                        symbols = update.colors.len(),
                        flashes = update.flash.len(),
                        "computed batch"
                    );

                    if update.is_empty() {
                        continue;
                    }
                    if responses.send(WorkerResponse::Update(update)).await.is_err() {
                        warn!("worker response receiver dropped, stopping worker");
                        break;
                    }
                }
                WorkerRequest::Reset { symbols } => {
                    let mut store = store.write();
                    match symbols {
                        Some(symbols) => {
                            debug!(symbols = symbols.len(), "dropping stored snapshots");
                            store.remove(&symbols);
                        }
                        None => {
                            debug!("dropping every stored snapshot");
                            store.clear();
                        }
                    }
                }
            }
        }

        info!("compute worker stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldKey, FlashKind, PriceCompare, Trade};

    fn trade(price: f64, compare: &str) -> Snapshot {
        Snapshot::new("ACB:G1:STX").with_trade(Trade {
            price: Some(price),
            compare: PriceCompare::from_code(compare),
            ..Default::default()
        })
    }

    #[test]
    fn test_compute_batch_in_arrival_order() {
        let mut store = SnapshotStore::new();

        let update = compute_batch(&mut store, vec![trade(25_000.0, "u"), trade(24_000.0, "d")]);

        assert_eq!(store.get("ACB:G1:STX").unwrap().trade.as_ref().unwrap().price, Some(24_000.0));
        assert_eq!(
            update.colors["ACB:G1:STX"][&FieldKey::LastPrice],
            Some(PriceCompare::Down)
        );
        assert_eq!(
            update.flash,
            vec![FlashResult {
                symbol: "ACB:G1:STX".into(),
                field_key: FieldKey::LastPrice,
                flash_kind: FlashKind::Down,
            }]
        );
    }

    #[test]
    fn test_untagged_trade_after_tagged_one_uses_price_direction() {
        let mut store = SnapshotStore::new();
        compute_batch(&mut store, vec![trade(25_000.0, "u")]);

        let update = compute_batch(&mut store, vec![trade(24_000.0, "")]);

        assert_eq!(
            update.colors["ACB:G1:STX"][&FieldKey::LastPrice],
            Some(PriceCompare::Down)
        );
        assert_eq!(
            update.flash,
            vec![FlashResult {
                symbol: "ACB:G1:STX".into(),
                field_key: FieldKey::LastPrice,
                flash_kind: FlashKind::Down,
            }]
        );
    }

    #[test]
    fn test_empty_updates_are_ignored() {
        let mut store = SnapshotStore::new();
        let update = compute_batch(&mut store, vec![Snapshot::new("ACB:G1:STX")]);
        assert!(update.is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_boundary_messages_have_tagged_shape() {
        let request = WorkerRequest::Batch(vec![Snapshot::new("ACB:G1:STX")]);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["type"], "batch");
        assert_eq!(value["data"][0]["symbol"], "ACB:G1:STX");

        let mut update = PipelineUpdate::default();
        update.flash.push(FlashResult {
            symbol: "ACB:G1:STX".into(),
            field_key: FieldKey::LastPrice,
            flash_kind: FlashKind::Up,
        });
        let value = serde_json::to_value(WorkerResponse::Update(update)).unwrap();
        assert_eq!(value["type"], "update");
        assert_eq!(value["data"]["flash"][0]["fieldKey"], "lastPrice");
        assert_eq!(value["data"]["flash"][0]["flashKind"], "up");

        let reset = WorkerRequest::Reset {
            symbols: Some(vec![Symbol::new("ACB:G1:STX")]),
        };
        let value = serde_json::to_value(&reset).unwrap();
        assert_eq!(value["type"], "reset");
        assert_eq!(value["data"]["symbols"][0], "ACB:G1:STX");

        let decoded: Result<WorkerRequest, _> =
            serde_json::from_str(r#"{"type":"explode","data":[]}"#);
        assert!(decoded.is_err());
    }

    #[tokio::test]
    async fn test_worker_round_trip() {
        let store = SnapshotStore::shared();
        let (request_tx, request_rx) = mpsc::channel(8);
        let (response_tx, mut response_rx) = mpsc::channel(8);
        let worker = spawn_compute_worker(store.clone(), request_rx, response_tx);

        request_tx
            .send(WorkerRequest::Batch(vec![trade(25_000.0, "u")]))
            .await
            .unwrap();

        let WorkerResponse::Update(update) = response_rx.recv().await.unwrap();
        assert!(update.flash.is_empty());
        assert_eq!(
            update.colors["ACB:G1:STX"][&FieldKey::LastPrice],
            Some(PriceCompare::Up)
        );
        assert!(store.read().get("ACB:G1:STX").is_some());

        request_tx
            .send(WorkerRequest::Reset { symbols: None })
            .await
            .unwrap();
        drop(request_tx);
        worker.await.unwrap();
        assert!(store.read().is_empty());
    }

    #[tokio::test]
    async fn test_reset_applies_after_queued_batch() {
        let store = SnapshotStore::shared();
        let (request_tx, request_rx) = mpsc::channel(8);
        let (response_tx, _response_rx) = mpsc::channel(8);

        request_tx
            .send(WorkerRequest::Batch(vec![trade(25_000.0, "u")]))
            .await
            .unwrap();
        request_tx
            .send(WorkerRequest::Reset {
                symbols: Some(vec![Symbol::new("ACB:G1:STX")]),
            })
            .await
            .unwrap();
        drop(request_tx);

        let worker = spawn_compute_worker(store.clone(), request_rx, response_tx);
        worker.await.unwrap();
        assert!(store.read().is_empty());
    }
}
