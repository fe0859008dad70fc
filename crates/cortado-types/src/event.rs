//! Event kinds for daemon-to-UI notification.
//!
//! Emitted via the JSON-RPC event subscription channel; payloads are
//! type-specific JSON objects.

use serde::{Deserialize, Serialize};

/// All event kinds the daemon emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum LoyaltyEventKind {
    // Loyalty events
    PurchaseRecorded,
    RewardEarned,
    RewardRedeemed,

    // Reconciliation events
    DriftDetected,
    SyncPending,

    // System events
    DaemonStarted,
    ErrorOccurred,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&LoyaltyEventKind::RewardEarned).expect("serialize");
        assert_eq!(json, "\"reward_earned\"");
    }
}
