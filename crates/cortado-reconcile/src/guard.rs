//! Post-write drift detection.
//!
//! After every ledger write the on-chain and off-chain counters are
//! compared. A mismatch is surfaced for operator attention and never
//! auto-corrected: depending on propagation timing either side could be
//! the stale one, and guessing silently is how mirrors rot.

use serde::Serialize;
use tracing::warn;

use cortado_db::queries::customers::CustomerRow;
use cortado_types::WalletAddress;

/// On-chain and off-chain counters that disagree after reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftWarning {
    pub wallet: String,
    /// `None` when the stamp read failed; stamps were not compared.
    pub on_chain_stamps: Option<u64>,
    /// `None` when the reward read failed; rewards were not compared.
    pub on_chain_rewards: Option<u64>,
    pub off_chain_stamps: u32,
    pub off_chain_rewards: u32,
}

/// Compare freshly observed on-chain counters against a just-written row.
///
/// Returns a logged [`DriftWarning`] on mismatch. Counters whose read
/// failed are skipped. The caller must only pass counters from a fresh
/// read — a stale read disagreeing with the ledger is expected, not
/// drift.
pub fn check_drift(
    wallet: &WalletAddress,
    on_chain_stamps: Option<u64>,
    on_chain_rewards: Option<u64>,
    customer: &CustomerRow,
) -> Option<DriftWarning> {
    let stamps_differ = match on_chain_stamps {
        Some(stamps) => stamps != u64::from(customer.stamp_count),
        None => false,
    };
    let rewards_differ = match on_chain_rewards {
        Some(rewards) => rewards != u64::from(customer.pending_rewards),
        None => false,
    };

    if !stamps_differ && !rewards_differ {
        return None;
    }

    let drift = DriftWarning {
        wallet: wallet.as_str().to_string(),
        on_chain_stamps,
        on_chain_rewards,
        off_chain_stamps: customer.stamp_count,
        off_chain_rewards: customer.pending_rewards,
    };
    warn!(
        wallet = %wallet,
        on_chain_stamps = ?drift.on_chain_stamps,
        on_chain_rewards = ?drift.on_chain_rewards,
        off_chain_stamps = drift.off_chain_stamps,
        off_chain_rewards = drift.off_chain_rewards,
        "counter drift detected between chain and ledger"
    );
    Some(drift)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet() -> WalletAddress {
        WalletAddress::parse(&format!("0x{:040x}", 1)).expect("test wallet")
    }

    fn row(stamps: u32, rewards: u32) -> CustomerRow {
        CustomerRow {
            wallet_address: wallet().as_str().to_string(),
            stamp_count: stamps,
            pending_rewards: rewards,
            total_volume: 0,
            last_purchase_at: 1000,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    #[test]
    fn test_matching_counters_no_drift() {
        assert!(check_drift(&wallet(), Some(3), Some(1), &row(3, 1)).is_none());
    }

    #[test]
    fn test_stamp_mismatch_flagged() {
        let drift = check_drift(&wallet(), Some(4), Some(1), &row(3, 1)).expect("drift");
        assert_eq!(drift.on_chain_stamps, Some(4));
        assert_eq!(drift.off_chain_stamps, 3);
    }

    #[test]
    fn test_reward_mismatch_flagged() {
        let drift = check_drift(&wallet(), Some(3), Some(2), &row(3, 1)).expect("drift");
        assert_eq!(drift.on_chain_rewards, Some(2));
        assert_eq!(drift.off_chain_rewards, 1);
    }

    #[test]
    fn test_unknown_rewards_not_compared() {
        // The reward read failed; only stamps are compared.
        assert!(check_drift(&wallet(), Some(3), None, &row(3, 9)).is_none());
        assert!(check_drift(&wallet(), Some(4), None, &row(3, 9)).is_some());
    }

    #[test]
    fn test_nothing_known_no_drift() {
        assert!(check_drift(&wallet(), None, None, &row(3, 9)).is_none());
    }
}
