//! cortado-daemon: the loyalty-ledger daemon.
//!
//! Single OS process running a Tokio async runtime. The point-of-sale UI
//! communicates with the daemon via JSON-RPC over a Unix socket.

mod commands;
mod config;
mod events;
mod rpc;

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{error, info};

use cortado_chain::{ChainLedger, HttpChainLedger, StubChain};
use cortado_types::event::LoyaltyEventKind;

use crate::config::DaemonConfig;
use crate::events::{Event, EventBus};
use crate::rpc::RpcServer;

/// Daemon-wide shared state.
pub struct DaemonState {
    /// Database connection.
    pub db: Arc<tokio::sync::Mutex<rusqlite::Connection>>,
    /// Configuration.
    pub config: DaemonConfig,
    /// Chain ledger client (gateway or dev stub).
    pub chain: Arc<dyn ChainLedger>,
    /// Event bus for pushing events to subscribers.
    pub event_bus: EventBus,
    /// Shutdown signal sender.
    pub shutdown_tx: broadcast::Sender<()>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cortado=info".parse()?),
        )
        .init();

    info!("Cortado daemon starting");

    // 1. Load config
    let config = DaemonConfig::load()?;
    let data_dir = config.data_dir();

    // Ensure data directory exists
    std::fs::create_dir_all(&data_dir)?;

    // 2. Open database
    let db_path = data_dir.join("cortado.db");
    let conn = cortado_db::open(&db_path)?;
    let db = Arc::new(tokio::sync::Mutex::new(conn));

    // 3. Build the chain client
    let chain: Arc<dyn ChainLedger> = match config.chain.mode.as_str() {
        "stub" => {
            info!("Chain mode: stub (dev only, no gateway)");
            Arc::new(StubChain::new(config.loyalty.reward_threshold))
        }
        _ => Arc::new(HttpChainLedger::new(
            config.chain.gateway_url.clone(),
            config.chain.request_timeout_secs,
        )?),
    };

    // 4. Create event bus
    let event_bus = EventBus::new(1000);

    // 5. Create shutdown channel
    let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);

    // 6. Build daemon state
    let state = Arc::new(DaemonState {
        db,
        config,
        chain,
        event_bus,
        shutdown_tx: shutdown_tx.clone(),
    });

    // 7. Start IPC server
    let socket_path = data_dir.join("daemon.sock");
    let rpc_server = RpcServer::new(state.clone(), socket_path.clone());

    info!("Starting JSON-RPC server on {:?}", socket_path);

    // 8. Emit DaemonStarted event
    state.event_bus.emit(Event {
        kind: LoyaltyEventKind::DaemonStarted,
        timestamp: commands::unix_now(),
        payload: serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
        }),
    });

    // 9. Run the RPC server until shutdown
    let mut shutdown_rx = shutdown_tx.subscribe();
    tokio::select! {
        result = rpc_server.run() => {
            if let Err(e) = result {
                error!("RPC server error: {}", e);
            }
        }
        _ = shutdown_rx.recv() => {
            info!("Shutdown signal received");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
        }
    }

    // Graceful shutdown
    info!("Daemon shutting down gracefully");

    // Clean up socket file
    let _ = std::fs::remove_file(&socket_path);

    info!("Daemon stopped");
    Ok(())
}
