//! Purchase accrual.
//!
//! Converts a mined purchase transaction into a customer-row mutation:
//! stamp delta, threshold crossings into rewards, and volume accumulation.
//! Idempotent on the transaction hash — replaying a purchase is a no-op.

use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, info};

use cortado_db::queries::customers::{self, CustomerRow};
use cortado_db::queries::purchases::{self, NewPurchase};
use cortado_types::{Product, TxHash, WalletAddress};

use crate::{LedgerError, Result};

/// A confirmed purchase to record.
#[derive(Debug, Clone)]
pub struct RecordPurchase<'a> {
    pub wallet: &'a WalletAddress,
    pub tx_hash: &'a TxHash,
    pub block_number: Option<u64>,
    /// Price paid in micro-tokens. Zero for stamp-only transactions.
    pub price: u64,
    /// Stamps awarded by this transaction. May exceed the threshold.
    pub stamps_awarded: u32,
    /// Stamps required per free-drink reward.
    pub reward_threshold: u32,
    /// Absent for stamp-only transactions.
    pub product: Option<&'a Product>,
    /// Unix timestamp for `last_purchase_at` / `updated_at`.
    pub now: u64,
}

/// Outcome of a recorded purchase.
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseAccrual {
    /// The post-mutation customer row.
    pub customer: CustomerRow,
    /// Rewards granted by this purchase's threshold crossings.
    pub rewards_granted: u32,
    /// True iff `pending_rewards` increased.
    pub reward_earned: bool,
    /// True when the transaction hash was already recorded and nothing changed.
    pub duplicate: bool,
}

/// Fold a raw stamp total into `(residual_stamps, rewards_granted)`.
///
/// A loop rather than a single modulo: one bulk purchase can award several
/// times the threshold, and each crossing grants one reward.
pub fn apply_threshold(stamp_total: u64, reward_threshold: u32) -> (u32, u32) {
    let threshold = u64::from(reward_threshold);
    if threshold == 0 {
        // Nothing to convert against; callers validate this away.
        return (stamp_total as u32, 0);
    }
    let mut stamps = stamp_total;
    let mut rewards = 0u32;
    while stamps >= threshold {
        stamps -= threshold;
        rewards += 1;
    }
    (stamps as u32, rewards)
}

/// Record a confirmed purchase in the off-chain ledger.
///
/// Runs in one IMMEDIATE transaction: idempotency check, row load,
/// threshold arithmetic, upsert and history append commit or roll back
/// together.
///
/// # Errors
///
/// - [`LedgerError::Validation`] for a zero threshold or volume overflow
/// - [`LedgerError::Db`] if the store fails (the caller treats this as
///   non-fatal: the on-chain transaction already settled)
pub fn record_purchase(
    conn: &mut Connection,
    purchase: &RecordPurchase<'_>,
) -> Result<PurchaseAccrual> {
    if purchase.reward_threshold == 0 {
        return Err(LedgerError::Validation(
            "reward threshold must be positive".to_string(),
        ));
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let inserted = purchases::insert_ignore(
        &tx,
        &NewPurchase {
            wallet: purchase.wallet,
            tx_hash: purchase.tx_hash,
            block_number: purchase.block_number,
            price: purchase.price,
            product: purchase.product,
            created_at: purchase.now,
        },
    )?;

    if !inserted {
        // Already recorded: return the current row untouched.
        let customer = customers::get_opt(&tx, purchase.wallet)?
            .unwrap_or_else(|| empty_row(purchase.wallet, purchase.now));
        tx.commit()?;
        debug!(wallet = %purchase.wallet, tx_hash = %purchase.tx_hash, "duplicate purchase ignored");
        return Ok(PurchaseAccrual {
            customer,
            rewards_granted: 0,
            reward_earned: false,
            duplicate: true,
        });
    }

    let existing = customers::get_opt(&tx, purchase.wallet)?;
    let (prev_stamps, prev_rewards, prev_volume, created_at) = match &existing {
        Some(row) => (
            row.stamp_count,
            row.pending_rewards,
            row.total_volume,
            row.created_at,
        ),
        None => (0, 0, 0, purchase.now),
    };

    let stamp_total = u64::from(prev_stamps) + u64::from(purchase.stamps_awarded);
    let (stamp_count, rewards_granted) = apply_threshold(stamp_total, purchase.reward_threshold);

    let pending_rewards = prev_rewards.checked_add(rewards_granted).ok_or_else(|| {
        LedgerError::Validation("pending rewards counter overflow".to_string())
    })?;
    let total_volume = prev_volume
        .checked_add(purchase.price)
        .ok_or_else(|| LedgerError::Validation("total volume overflow".to_string()))?;

    let customer = CustomerRow {
        wallet_address: purchase.wallet.as_str().to_string(),
        stamp_count,
        pending_rewards,
        total_volume,
        last_purchase_at: purchase.now,
        created_at,
        updated_at: purchase.now,
    };
    customers::upsert(&tx, &customer)?;
    tx.commit()?;

    info!(
        wallet = %purchase.wallet,
        tx_hash = %purchase.tx_hash,
        stamps_awarded = purchase.stamps_awarded,
        rewards_granted,
        "purchase recorded"
    );

    Ok(PurchaseAccrual {
        customer,
        rewards_granted,
        reward_earned: rewards_granted > 0,
        duplicate: false,
    })
}

fn empty_row(wallet: &WalletAddress, now: u64) -> CustomerRow {
    CustomerRow {
        wallet_address: wallet.as_str().to_string(),
        stamp_count: 0,
        pending_rewards: 0,
        total_volume: 0,
        last_purchase_at: now,
        created_at: now,
        updated_at: now,
    }
}
