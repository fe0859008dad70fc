//! Reward redemption.
//!
//! Consumes one pending reward and appends the redemption record as a
//! single transaction. The decrement is a conditional update, so two
//! concurrent redemptions with one pending reward cannot both succeed.

use rusqlite::{Connection, TransactionBehavior};
use tracing::info;

use cortado_db::queries::customers::{self, CustomerRow};
use cortado_db::queries::rewards::{self, NewRedemption};
use cortado_types::{TxHash, WalletAddress};

use crate::{LedgerError, Result};

/// A confirmed redemption to record.
#[derive(Debug, Clone)]
pub struct RecordRedemption<'a> {
    pub wallet: &'a WalletAddress,
    pub tx_hash: &'a TxHash,
    pub block_number: Option<u64>,
    /// Free drinks granted by this redemption.
    pub reward_amount: u32,
    /// Unix timestamp for `updated_at` / `created_at`.
    pub now: u64,
}

/// Consume one pending reward and append the redemption record.
///
/// # Errors
///
/// - [`LedgerError::InsufficientRewards`] if no reward was pending at the
///   time of the decrement; nothing is mutated
/// - [`LedgerError::Db`] if the store fails
pub fn redeem(conn: &mut Connection, redemption: &RecordRedemption<'_>) -> Result<CustomerRow> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let consumed = customers::decrement_pending_reward(&tx, redemption.wallet, redemption.now)?;
    if !consumed {
        // Dropping the transaction rolls back; nothing was written.
        return Err(LedgerError::InsufficientRewards(
            redemption.wallet.to_string(),
        ));
    }

    rewards::insert_ignore(
        &tx,
        &NewRedemption {
            wallet: redemption.wallet,
            tx_hash: redemption.tx_hash,
            block_number: redemption.block_number,
            reward_amount: redemption.reward_amount,
            created_at: redemption.now,
        },
    )?;

    let customer = customers::get(&tx, redemption.wallet)?;
    tx.commit()?;

    info!(
        wallet = %redemption.wallet,
        tx_hash = %redemption.tx_hash,
        pending_rewards = customer.pending_rewards,
        "reward redeemed"
    );

    Ok(customer)
}
