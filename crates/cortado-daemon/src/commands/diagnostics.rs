//! Diagnostics and event subscription command handlers.

use std::sync::Arc;

use serde_json::Value;

use cortado_db::queries::settings;

use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

/// Daemon status for the POS footer and health checks.
pub async fn get_daemon_status(state: &Arc<DaemonState>) -> Result {
    let reward_threshold = {
        let conn = state.db.lock().await;
        settings::get_u32(
            &conn,
            "reward_threshold",
            state.config.loyalty.reward_threshold,
        )
        .map_err(|e| RpcError::internal_error(&e.to_string()))?
    };

    Ok(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "chain_mode": state.config.chain.mode,
        "reward_threshold": reward_threshold,
        "events_emitted": state.event_bus.sequence(),
    }))
}

/// Acknowledge an event subscription.
///
/// Events are delivered over the daemon's event channel; the returned
/// sequence lets the subscriber detect anything emitted before the
/// subscription took effect.
pub async fn subscribe_events(state: &Arc<DaemonState>) -> Result {
    Ok(serde_json::json!({
        "subscribed": true,
        "sequence": state.event_bus.sequence(),
    }))
}
