//! Loyalty command handlers: purchases, stamps, redemptions, dashboards.

use std::sync::Arc;

use serde_json::Value;

use cortado_db::queries::{customers, purchases, rewards, settings};
use cortado_ledger::LedgerError;
use cortado_reconcile::guard::check_drift;
use cortado_reconcile::{
    FlowError, LoyaltyEngine, PurchaseOutcome, PurchaseRequest, RedeemOutcome, RedeemRequest,
    StampRequest, TokioSleep,
};
use cortado_types::event::LoyaltyEventKind;
use cortado_types::{Product, ReconcileStatus, WalletAddress};

use crate::events::Event;
use crate::rpc::RpcError;
use crate::DaemonState;

type Result = std::result::Result<Value, RpcError>;

/// Run a coffee purchase end to end and return the outcome.
pub async fn buy_coffee(state: &Arc<DaemonState>, params: &Value) -> Result {
    let wallet = parse_wallet(params)?;
    let price = params
        .get("price_micro")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| RpcError::invalid_params("price_micro required"))?;
    let product_id = params
        .get("product_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| RpcError::invalid_params("product_id required"))?;
    let product_name = params
        .get("product_name")
        .and_then(|v| v.as_str())
        .unwrap_or(product_id);

    let request = PurchaseRequest {
        wallet,
        price,
        product: Product::new(product_id, product_name),
        stamps_awarded: state.config.loyalty.stamps_per_purchase,
        reward_threshold: reward_threshold(state).await?,
        now: super::unix_now(),
    };

    let sleep = TokioSleep;
    let engine = LoyaltyEngine::new(
        state.chain.as_ref(),
        &state.db,
        &sleep,
        state.config.reconcile.poll_policy(),
    );
    let outcome = engine.purchase(&request).await.map_err(flow_error)?;

    emit_purchase_events(state, &request.wallet, &outcome);
    serde_json::to_value(&outcome).map_err(|e| RpcError::internal_error(&e.to_string()))
}

/// Award loyalty stamps without a payment.
pub async fn add_stamp(state: &Arc<DaemonState>, params: &Value) -> Result {
    let wallet = parse_wallet(params)?;

    let request = StampRequest {
        wallet,
        stamps_awarded: state.config.loyalty.stamps_per_purchase,
        reward_threshold: reward_threshold(state).await?,
        now: super::unix_now(),
    };

    let sleep = TokioSleep;
    let engine = LoyaltyEngine::new(
        state.chain.as_ref(),
        &state.db,
        &sleep,
        state.config.reconcile.poll_policy(),
    );
    let outcome = engine.stamp(&request).await.map_err(flow_error)?;

    emit_purchase_events(state, &request.wallet, &outcome);
    serde_json::to_value(&outcome).map_err(|e| RpcError::internal_error(&e.to_string()))
}

/// Redeem one pending reward.
pub async fn redeem_reward(state: &Arc<DaemonState>, params: &Value) -> Result {
    let wallet = parse_wallet(params)?;
    let reward_amount = params
        .get("reward_amount")
        .and_then(|v| v.as_u64())
        .unwrap_or(1) as u32;

    let request = RedeemRequest {
        wallet,
        reward_amount,
        now: super::unix_now(),
    };

    let sleep = TokioSleep;
    let engine = LoyaltyEngine::new(
        state.chain.as_ref(),
        &state.db,
        &sleep,
        state.config.reconcile.poll_policy(),
    );
    let outcome = engine.redeem(&request).await.map_err(flow_error)?;

    emit_redeem_events(state, &request.wallet, &outcome);
    serde_json::to_value(&outcome).map_err(|e| RpcError::internal_error(&e.to_string()))
}

/// Get the off-chain customer row, or `null` if the wallet never purchased.
pub async fn get_customer(state: &Arc<DaemonState>, params: &Value) -> Result {
    let wallet = parse_wallet(params)?;

    let conn = state.db.lock().await;
    let row = customers::get_opt(&conn, &wallet)
        .map_err(|e| RpcError::internal_error(&e.to_string()))?;

    match row {
        Some(row) => {
            serde_json::to_value(row).map_err(|e| RpcError::internal_error(&e.to_string()))
        }
        None => Ok(Value::Null),
    }
}

/// Combined dashboard view: off-chain row, live on-chain counters, drift.
pub async fn get_loyalty_status(state: &Arc<DaemonState>, params: &Value) -> Result {
    let wallet = parse_wallet(params)?;

    let customer = {
        let conn = state.db.lock().await;
        customers::get_opt(&conn, &wallet)
            .map_err(|e| RpcError::internal_error(&e.to_string()))?
    };

    // Best-effort live reads; the dashboard tolerates missing values.
    let on_chain_stamps = state.chain.stamp_count(&wallet).await.ok();
    let on_chain_rewards = state.chain.pending_rewards(&wallet).await.ok();

    let drift = customer
        .as_ref()
        .and_then(|row| check_drift(&wallet, on_chain_stamps, on_chain_rewards, row));

    Ok(serde_json::json!({
        "customer": customer,
        "on_chain": {
            "stamp_count": on_chain_stamps,
            "pending_rewards": on_chain_rewards,
        },
        "drift": drift,
    }))
}

/// Recent purchases, optionally filtered by wallet.
pub async fn get_purchase_history(state: &Arc<DaemonState>, params: &Value) -> Result {
    let limit = history_limit(params);
    let conn = state.db.lock().await;

    let history = match params.get("wallet").and_then(|v| v.as_str()) {
        Some(raw) => {
            let wallet = WalletAddress::parse(raw)
                .map_err(|e| RpcError::validation_error(&e.to_string()))?;
            purchases::for_wallet(&conn, &wallet, limit)
        }
        None => purchases::recent(&conn, limit),
    }
    .map_err(|e| RpcError::internal_error(&e.to_string()))?;

    serde_json::to_value(history).map_err(|e| RpcError::internal_error(&e.to_string()))
}

/// Recent redemptions, optionally filtered by wallet.
pub async fn get_reward_history(state: &Arc<DaemonState>, params: &Value) -> Result {
    let limit = history_limit(params);
    let conn = state.db.lock().await;

    let history = match params.get("wallet").and_then(|v| v.as_str()) {
        Some(raw) => {
            let wallet = WalletAddress::parse(raw)
                .map_err(|e| RpcError::validation_error(&e.to_string()))?;
            rewards::for_wallet(&conn, &wallet, limit)
        }
        None => rewards::recent(&conn, limit),
    }
    .map_err(|e| RpcError::internal_error(&e.to_string()))?;

    serde_json::to_value(history).map_err(|e| RpcError::internal_error(&e.to_string()))
}

/// Update the operational loyalty settings.
pub async fn set_loyalty_settings(state: &Arc<DaemonState>, params: &Value) -> Result {
    let threshold = params
        .get("reward_threshold")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| RpcError::invalid_params("reward_threshold required"))?;
    if threshold == 0 || threshold > u64::from(u32::MAX) {
        return Err(RpcError::validation_error(
            "reward threshold must be a positive 32-bit count",
        ));
    }

    let conn = state.db.lock().await;
    settings::set(&conn, "reward_threshold", &threshold.to_string())
        .map_err(|e| RpcError::internal_error(&e.to_string()))?;

    Ok(serde_json::json!({ "reward_threshold": threshold }))
}

/// Effective reward threshold: settings table, falling back to config.
async fn reward_threshold(state: &Arc<DaemonState>) -> std::result::Result<u32, RpcError> {
    let conn = state.db.lock().await;
    settings::get_u32(
        &conn,
        "reward_threshold",
        state.config.loyalty.reward_threshold,
    )
    .map_err(|e| RpcError::internal_error(&e.to_string()))
}

fn parse_wallet(params: &Value) -> std::result::Result<WalletAddress, RpcError> {
    let raw = params
        .get("wallet")
        .and_then(|v| v.as_str())
        .ok_or_else(|| RpcError::invalid_params("wallet required"))?;
    WalletAddress::parse(raw).map_err(|e| RpcError::validation_error(&e.to_string()))
}

fn history_limit(params: &Value) -> u32 {
    params
        .get("limit")
        .and_then(|v| v.as_u64())
        .map(|limit| limit.min(500) as u32)
        .unwrap_or(50)
}

fn flow_error(e: FlowError) -> RpcError {
    match e {
        FlowError::Validation(detail) => RpcError::validation_error(&detail),
        FlowError::Chain(chain) => {
            RpcError::chain_error(&chain.to_string(), chain.is_user_rejection())
        }
        FlowError::Ledger(LedgerError::InsufficientRewards(_)) => {
            RpcError::insufficient_rewards()
        }
        FlowError::Ledger(other) => RpcError::internal_error(&other.to_string()),
    }
}

fn emit_purchase_events(state: &Arc<DaemonState>, wallet: &WalletAddress, outcome: &PurchaseOutcome) {
    let timestamp = super::unix_now();
    state.event_bus.emit(Event {
        kind: LoyaltyEventKind::PurchaseRecorded,
        timestamp,
        payload: serde_json::json!({
            "wallet": wallet.as_str(),
            "tx_hash": outcome.tx_hash,
            "status": outcome.status,
        }),
    });
    if outcome.reward_earned {
        state.event_bus.emit(Event {
            kind: LoyaltyEventKind::RewardEarned,
            timestamp,
            payload: serde_json::json!({ "wallet": wallet.as_str() }),
        });
    }
    emit_reconcile_events(state, outcome.status, &outcome.drift, timestamp);
}

fn emit_redeem_events(state: &Arc<DaemonState>, wallet: &WalletAddress, outcome: &RedeemOutcome) {
    let timestamp = super::unix_now();
    state.event_bus.emit(Event {
        kind: LoyaltyEventKind::RewardRedeemed,
        timestamp,
        payload: serde_json::json!({
            "wallet": wallet.as_str(),
            "tx_hash": outcome.tx_hash,
            "status": outcome.status,
        }),
    });
    emit_reconcile_events(state, outcome.status, &outcome.drift, timestamp);
}

fn emit_reconcile_events(
    state: &Arc<DaemonState>,
    status: ReconcileStatus,
    drift: &Option<cortado_reconcile::DriftWarning>,
    timestamp: u64,
) {
    if let Some(drift) = drift {
        state.event_bus.emit(Event {
            kind: LoyaltyEventKind::DriftDetected,
            timestamp,
            payload: serde_json::json!(drift),
        });
    }
    if status == ReconcileStatus::SyncPending {
        state.event_bus.emit(Event {
            kind: LoyaltyEventKind::SyncPending,
            timestamp,
            payload: serde_json::json!({}),
        });
    }
}
