//! Reconciliation status tags returned to callers.

use serde::{Deserialize, Serialize};

/// How a mined transaction ended up reflected in the off-chain ledger.
///
/// There is no failure variant: once a transaction is mined, some ledger
/// progress is always recorded or explicitly reported as pending.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileStatus {
    /// Fresh on-chain counters were observed and the off-chain write matches.
    Reconciled,
    /// On-chain reads stayed stale through the retry budget; the off-chain
    /// ledger advanced by the known stamp delta instead.
    Degraded,
    /// The off-chain write failed after the transaction was mined. On-chain
    /// state stands; the caller should retry the sync.
    SyncPending,
}

impl ReconcileStatus {
    /// Whether the off-chain ledger reflects this transaction yet.
    pub fn is_recorded(self) -> bool {
        !matches!(self, ReconcileStatus::SyncPending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&ReconcileStatus::SyncPending).expect("serialize");
        assert_eq!(json, "\"sync_pending\"");
    }

    #[test]
    fn test_is_recorded() {
        assert!(ReconcileStatus::Reconciled.is_recorded());
        assert!(ReconcileStatus::Degraded.is_recorded());
        assert!(!ReconcileStatus::SyncPending.is_recorded());
    }
}
