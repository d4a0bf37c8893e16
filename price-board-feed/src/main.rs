mod market;
mod session;

use futures::{SinkExt, StreamExt};
use market::Market;
use parking_lot::Mutex;
use price_board::wire::{ControlMessage, WireMessage};
use session::ClientSubscriptions;
use std::{error::Error, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::broadcast,
    time::interval,
};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

type SharedMarket = Arc<Mutex<Market>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_logging();

    info!("Starting price-board market feed");

    // Configurable via FEED_ADDR env var (default: 0.0.0.0:9101)
    let addr = std::env::var("FEED_ADDR")
        .ok()
        .and_then(|addr| addr.parse::<SocketAddr>().ok())
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 9101)));

    let rate = std::env::var("FEED_RATE_MS")
        .ok()
        .and_then(|ms| ms.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_millis(200));

    let moves = std::env::var("FEED_MOVES")
        .ok()
        .and_then(|moves| moves.parse().ok())
        .unwrap_or(4_usize);

    let buffer_size = std::env::var("FEED_BUFFER_SIZE")
        .ok()
        .and_then(|size| size.parse().ok())
        .unwrap_or(10_000);

    info!(?rate, moves, buffer_size, "Simulation settings");

    let market: SharedMarket = Arc::new(Mutex::new(Market::listed()));
    let (tx, _rx) = broadcast::channel::<WireMessage>(buffer_size);

    let listener = TcpListener::bind(addr).await?;
    info!("Feed listening on ws://{}", addr);

    tokio::spawn(run_market(market.clone(), tx.clone(), rate, moves));

    tokio::select! {
        _ = accept_clients(listener, market, tx) => {
            warn!("Listener stopped accepting connections");
        }
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutdown signal received");
        }
    }

    Ok(())
}

/// Drive the simulated market and broadcast every tick.
async fn run_market(
    market: SharedMarket,
    tx: broadcast::Sender<WireMessage>,
    rate: Duration,
    moves: usize,
) {
    let mut ticker = interval(rate);

    loop {
        ticker.tick().await;

        let messages = {
            let mut rng = rand::rng();
            market.lock().step(&mut rng, moves)
        };

        for message in messages {
            // No receivers is fine, clients come and go
            let _ = tx.send(message);
        }
    }
}

async fn accept_clients(
    listener: TcpListener,
    market: SharedMarket,
    tx: broadcast::Sender<WireMessage>,
) {
    while let Ok((stream, peer_addr)) = listener.accept().await {
        info!("New WebSocket connection from {}", peer_addr);
        tokio::spawn(handle_client(stream, peer_addr, market.clone(), tx.subscribe()));
    }
}

/// Serve one client: apply its control messages and forward the ticks it subscribed to.
async fn handle_client(
    stream: TcpStream,
    peer_addr: SocketAddr,
    market: SharedMarket,
    mut ticks: broadcast::Receiver<WireMessage>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {}", peer_addr, e);
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let mut subscriptions = ClientSubscriptions::default();

    let welcome = WireMessage::Welcome {
        message: Some("Connected to price-board market feed".to_string()),
    };
    if let Ok(text) = welcome.encode() {
        let _ = ws_sender.send(Message::Text(text.into())).await;
    }

    loop {
        let outgoing = tokio::select! {
            message = ws_receiver.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ControlMessage>(&text) {
                        Ok(control) => {
                            let mut rng = rand::rng();
                            subscriptions.handle(control, &market.lock(), &mut rng)
                        }
                        Err(e) => {
                            warn!("Invalid control message from {}: {}", peer_addr, e);
                            Vec::new()
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => Vec::new(),
                Some(Err(e)) => {
                    warn!("WebSocket error from {}: {}", peer_addr, e);
                    break;
                }
            },
            tick = ticks.recv() => match tick {
                Ok(message) if subscriptions.wants(&message) => vec![message],
                Ok(_) => Vec::new(),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Client {} lagged, skipped {} messages", peer_addr, skipped);
                    Vec::new()
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        for message in outgoing {
            let text = match message.encode() {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to encode frame: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                info!("Client {} disconnected", peer_addr);
                return;
            }
        }
    }

    debug!(
        symbols = subscriptions.symbol_count(),
        "Connection closed for {}", peer_addr
    );
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
