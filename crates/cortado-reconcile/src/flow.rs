//! Purchase, stamp and redemption flows.
//!
//! Each flow is one bounded unit of work: validate, settle on-chain, poll
//! for fresh counters, mutate the off-chain ledger, check for drift. Chain
//! failures abort before anything is written off-chain. Once a transaction
//! is mined there is no failure path: the outcome is tagged `reconciled`,
//! `degraded` (stale reads, ledger advanced by the known delta) or
//! `sync_pending` (ledger write failed, on-chain state stands).

use rusqlite::Connection;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use cortado_chain::{ChainLedger, TxReceipt};
use cortado_db::queries::customers::{self, CustomerRow};
use cortado_ledger::{LedgerError, RecordPurchase, RecordRedemption};
use cortado_types::{Product, ReconcileStatus, TxHash, WalletAddress};

use crate::guard::{check_drift, DriftWarning};
use crate::poller::{poll_after_tx, PollPolicy, Sleep};
use crate::{FlowError, Result};

/// Lifecycle of one purchase through the engine.
///
/// Terminal stages are `Reconciled` and `DegradedReconciled`; a mined
/// transaction never ends in failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseStage {
    Submitted,
    Mined,
    Polling(u32),
    Reconciled,
    DegradedReconciled,
}

/// A coffee purchase to run end to end.
#[derive(Debug, Clone)]
pub struct PurchaseRequest {
    pub wallet: WalletAddress,
    /// Price in micro-tokens; must be positive.
    pub price: u64,
    pub product: Product,
    pub stamps_awarded: u32,
    pub reward_threshold: u32,
    /// Unix timestamp recorded on the ledger mutation.
    pub now: u64,
}

/// A stamp-only transaction (no payment) to run end to end.
#[derive(Debug, Clone)]
pub struct StampRequest {
    pub wallet: WalletAddress,
    pub stamps_awarded: u32,
    pub reward_threshold: u32,
    pub now: u64,
}

/// A reward redemption to run end to end.
#[derive(Debug, Clone)]
pub struct RedeemRequest {
    pub wallet: WalletAddress,
    /// Free drinks granted by this redemption.
    pub reward_amount: u32,
    pub now: u64,
}

/// Result of a purchase or stamp flow.
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseOutcome {
    /// The post-mutation customer row; `None` when the sync is pending.
    pub customer: Option<CustomerRow>,
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub reward_earned: bool,
    pub status: ReconcileStatus,
    pub drift: Option<DriftWarning>,
}

/// Result of a redemption flow.
#[derive(Debug, Clone, Serialize)]
pub struct RedeemOutcome {
    /// The post-mutation customer row; `None` when the sync is pending.
    pub customer: Option<CustomerRow>,
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub status: ReconcileStatus,
    pub drift: Option<DriftWarning>,
}

/// The caller-facing reconciliation engine.
///
/// Holds no per-flow state; every call is an independent unit of work and
/// may run concurrently with others. The database mutex is held only
/// around the ledger mutation itself.
pub struct LoyaltyEngine<'a> {
    chain: &'a dyn ChainLedger,
    db: &'a Mutex<Connection>,
    sleep: &'a dyn Sleep,
    policy: PollPolicy,
}

impl<'a> LoyaltyEngine<'a> {
    /// Create an engine over an explicit chain client, store and sleep.
    pub fn new(
        chain: &'a dyn ChainLedger,
        db: &'a Mutex<Connection>,
        sleep: &'a dyn Sleep,
        policy: PollPolicy,
    ) -> Self {
        Self {
            chain,
            db,
            sleep,
            policy,
        }
    }

    /// Run a coffee purchase: pay on-chain, then accrue stamps off-chain.
    ///
    /// # Errors
    ///
    /// - [`FlowError::Validation`] before any chain or store interaction
    /// - [`FlowError::Chain`] if submission fails or the transaction
    ///   reverts; nothing is recorded off-chain
    pub async fn purchase(&self, request: &PurchaseRequest) -> Result<PurchaseOutcome> {
        if request.price == 0 {
            return Err(FlowError::Validation("price must be positive".to_string()));
        }
        validate_accrual(request.stamps_awarded, request.reward_threshold)?;

        self.settle_and_accrue(
            &request.wallet,
            Submission::Purchase(request.price),
            Some(&request.product),
            request.stamps_awarded,
            request.reward_threshold,
            request.now,
        )
        .await
    }

    /// Run a stamp-only transaction (e.g. an off-line purchase honored at
    /// the counter).
    ///
    /// # Errors
    ///
    /// Same semantics as [`purchase`](Self::purchase), minus the price check.
    pub async fn stamp(&self, request: &StampRequest) -> Result<PurchaseOutcome> {
        validate_accrual(request.stamps_awarded, request.reward_threshold)?;

        self.settle_and_accrue(
            &request.wallet,
            Submission::Stamp,
            None,
            request.stamps_awarded,
            request.reward_threshold,
            request.now,
        )
        .await
    }

    /// Redeem one pending reward.
    ///
    /// # Errors
    ///
    /// - [`FlowError::Ledger`] with
    ///   [`LedgerError::InsufficientRewards`] when nothing is pending;
    ///   checked before any chain interaction
    /// - [`FlowError::Chain`] if the redeem transaction fails or reverts
    pub async fn redeem(&self, request: &RedeemRequest) -> Result<RedeemOutcome> {
        // Pre-check so a zero-reward redeem never submits a transaction.
        {
            let conn = self.db.lock().await;
            let pending = customers::get_opt(&conn, &request.wallet)
                .map_err(LedgerError::from)?
                .map(|row| row.pending_rewards)
                .unwrap_or(0);
            if pending == 0 {
                return Err(FlowError::Ledger(LedgerError::InsufficientRewards(
                    request.wallet.to_string(),
                )));
            }
        }

        let baseline_rewards = self.chain.pending_rewards(&request.wallet).await.ok();
        let receipt = self.chain.submit_redeem(&request.wallet).await?;
        debug!(wallet = %request.wallet, block = receipt.block_number, "redeem mined");

        let ledger_result = {
            let mut conn = self.db.lock().await;
            cortado_ledger::redeem(
                &mut conn,
                &RecordRedemption {
                    wallet: &request.wallet,
                    tx_hash: &receipt.tx_hash,
                    block_number: Some(receipt.block_number),
                    reward_amount: request.reward_amount,
                    now: request.now,
                },
            )
        };

        let customer = match ledger_result {
            Ok(customer) => customer,
            Err(e) => {
                // The on-chain redeem already settled; the mirror needs a
                // retry, so this is reported rather than raised.
                warn!(
                    wallet = %request.wallet,
                    tx_hash = %receipt.tx_hash,
                    error = %e,
                    "ledger decrement failed after mined redeem; sync pending"
                );
                return Ok(RedeemOutcome {
                    customer: None,
                    tx_hash: receipt.tx_hash,
                    block_number: receipt.block_number,
                    status: ReconcileStatus::SyncPending,
                    drift: None,
                });
            }
        };

        // Best-effort post-write read for the drift guard. The read is
        // fresh when the reward count moved below the pre-redeem value.
        let (status, drift) = match self.chain.pending_rewards(&request.wallet).await {
            Ok(rewards) => {
                let fresh = baseline_rewards.map_or(true, |baseline| rewards < baseline);
                if fresh {
                    let stamps = self.chain.stamp_count(&request.wallet).await.ok();
                    (
                        ReconcileStatus::Reconciled,
                        check_drift(&request.wallet, stamps, Some(rewards), &customer),
                    )
                } else {
                    (ReconcileStatus::Degraded, None)
                }
            }
            Err(e) => {
                warn!(wallet = %request.wallet, error = %e, "reward read failed after redeem");
                (ReconcileStatus::Degraded, None)
            }
        };

        Ok(RedeemOutcome {
            customer: Some(customer),
            tx_hash: receipt.tx_hash,
            block_number: receipt.block_number,
            status,
            drift,
        })
    }

    /// Shared purchase/stamp path: settle on-chain, poll, accrue, guard.
    async fn settle_and_accrue(
        &self,
        wallet: &WalletAddress,
        submission: Submission,
        product: Option<&Product>,
        stamps_awarded: u32,
        reward_threshold: u32,
        now: u64,
    ) -> Result<PurchaseOutcome> {
        // Snapshot the pre-transaction count so the poller can tell "still
        // stale" from "converged". Falls back to the off-chain mirror when
        // the read fails.
        let baseline = match self.chain.stamp_count(wallet).await {
            Ok(count) => count,
            Err(e) => {
                warn!(%wallet, error = %e, "baseline read failed; falling back to ledger");
                let conn = self.db.lock().await;
                customers::get_opt(&conn, wallet)
                    .map_err(LedgerError::from)?
                    .map(|row| u64::from(row.stamp_count))
                    .unwrap_or(0)
            }
        };

        debug!(%wallet, stage = ?PurchaseStage::Submitted, "submitting transaction");
        let receipt: TxReceipt = match submission {
            Submission::Purchase(price) => self.chain.submit_purchase(wallet, price).await?,
            Submission::Stamp => self.chain.submit_stamp(wallet).await?,
        };
        debug!(%wallet, stage = ?PurchaseStage::Mined, block = receipt.block_number, "transaction mined");

        debug!(%wallet, stage = ?PurchaseStage::Polling(1), "polling for fresh counters");
        let polled = poll_after_tx(self.chain, self.sleep, &self.policy, wallet, baseline).await;

        let price = match submission {
            Submission::Purchase(price) => price,
            Submission::Stamp => 0,
        };
        let accrual_result = {
            let mut conn = self.db.lock().await;
            cortado_ledger::record_purchase(
                &mut conn,
                &RecordPurchase {
                    wallet,
                    tx_hash: &receipt.tx_hash,
                    block_number: Some(receipt.block_number),
                    price,
                    stamps_awarded,
                    reward_threshold,
                    product,
                    now,
                },
            )
        };

        let accrual = match accrual_result {
            Ok(accrual) => accrual,
            Err(e) => {
                // Payment already settled on-chain; never report failure.
                warn!(
                    %wallet,
                    tx_hash = %receipt.tx_hash,
                    error = %e,
                    "ledger write failed after mined transaction; sync pending"
                );
                return Ok(PurchaseOutcome {
                    customer: None,
                    tx_hash: receipt.tx_hash,
                    block_number: receipt.block_number,
                    reward_earned: false,
                    status: ReconcileStatus::SyncPending,
                    drift: None,
                });
            }
        };

        let (status, drift, stage) = if polled.fresh {
            (
                ReconcileStatus::Reconciled,
                check_drift(
                    wallet,
                    Some(polled.stamp_count),
                    polled.pending_rewards,
                    &accrual.customer,
                ),
                PurchaseStage::Reconciled,
            )
        } else {
            // On-chain reads never caught up; the ledger advanced by the
            // known stamp delta instead.
            (
                ReconcileStatus::Degraded,
                None,
                PurchaseStage::DegradedReconciled,
            )
        };
        debug!(%wallet, stage = ?stage, attempts = polled.attempts, "purchase flow settled");

        Ok(PurchaseOutcome {
            customer: Some(accrual.customer),
            tx_hash: receipt.tx_hash,
            block_number: receipt.block_number,
            reward_earned: accrual.reward_earned,
            status,
            drift,
        })
    }
}

#[derive(Clone, Copy)]
enum Submission {
    Purchase(u64),
    Stamp,
}

fn validate_accrual(stamps_awarded: u32, reward_threshold: u32) -> Result<()> {
    if stamps_awarded == 0 {
        return Err(FlowError::Validation(
            "stamps awarded must be positive".to_string(),
        ));
    }
    if reward_threshold == 0 {
        return Err(FlowError::Validation(
            "reward threshold must be positive".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortado_chain::{ChainError, StubChain};
    use std::time::Duration;

    struct NoopSleep;

    #[async_trait::async_trait]
    impl Sleep for NoopSleep {
        async fn sleep(&self, _duration: Duration) {}
    }

    fn wallet(n: u8) -> WalletAddress {
        WalletAddress::parse(&format!("0x{:040x}", n)).expect("test wallet")
    }

    fn purchase_request(n: u8) -> PurchaseRequest {
        PurchaseRequest {
            wallet: wallet(n),
            price: 2_000_000,
            product: Product::new("espresso", "Espresso"),
            stamps_awarded: 1,
            reward_threshold: 8,
            now: 1_700_000_000,
        }
    }

    fn engine_db() -> Mutex<Connection> {
        Mutex::new(cortado_db::open_memory().expect("open db"))
    }

    #[tokio::test]
    async fn test_purchase_reconciled() {
        let chain = StubChain::new(8);
        let db = engine_db();
        let engine = LoyaltyEngine::new(&chain, &db, &NoopSleep, PollPolicy::default());

        let outcome = engine.purchase(&purchase_request(1)).await.expect("purchase");
        assert_eq!(outcome.status, ReconcileStatus::Reconciled);
        assert!(outcome.drift.is_none());
        assert!(!outcome.reward_earned);

        let customer = outcome.customer.expect("customer row");
        assert_eq!(customer.stamp_count, 1);
        assert_eq!(customer.total_volume, 2_000_000);
    }

    #[tokio::test]
    async fn test_purchase_converges_through_lag() {
        let chain = StubChain::with_read_lag(8, 1);
        let db = engine_db();
        let engine = LoyaltyEngine::new(&chain, &db, &NoopSleep, PollPolicy::default());

        let outcome = engine.purchase(&purchase_request(1)).await.expect("purchase");
        assert_eq!(outcome.status, ReconcileStatus::Reconciled);
        assert_eq!(outcome.customer.expect("customer row").stamp_count, 1);
    }

    #[tokio::test]
    async fn test_purchase_degraded_when_reads_stay_stale() {
        let chain = StubChain::with_read_lag(8, 1000);
        let db = engine_db();
        let engine = LoyaltyEngine::new(&chain, &db, &NoopSleep, PollPolicy::default());

        let outcome = engine.purchase(&purchase_request(1)).await.expect("purchase");
        assert_eq!(outcome.status, ReconcileStatus::Degraded);
        assert!(outcome.drift.is_none(), "stale reads are not drift");

        // The ledger still advanced by the known stamp delta.
        let customer = outcome.customer.expect("customer row");
        assert_eq!(customer.stamp_count, 1);
    }

    #[tokio::test]
    async fn test_zero_price_rejected_before_chain() {
        let chain = StubChain::new(8);
        let db = engine_db();
        let engine = LoyaltyEngine::new(&chain, &db, &NoopSleep, PollPolicy::default());

        let mut request = purchase_request(1);
        request.price = 0;
        let result = engine.purchase(&request).await;
        assert!(matches!(result, Err(FlowError::Validation(_))));

        // Nothing settled on-chain.
        assert_eq!(chain.settled_counters(&request.wallet).await, (0, 0));
    }

    #[tokio::test]
    async fn test_reverted_purchase_records_nothing() {
        let chain = StubChain::new(8);
        let db = engine_db();
        let engine = LoyaltyEngine::new(&chain, &db, &NoopSleep, PollPolicy::default());

        chain.revert_next_submit().await;
        let result = engine.purchase(&purchase_request(1)).await;
        assert!(matches!(
            result,
            Err(FlowError::Chain(ChainError::Reverted { .. }))
        ));

        let conn = db.lock().await;
        assert!(customers::get_opt(&conn, &wallet(1)).expect("query").is_none());
        assert!(cortado_db::queries::purchases::recent(&conn, 10)
            .expect("history")
            .is_empty());
    }

    #[tokio::test]
    async fn test_user_rejection_surfaces() {
        let chain = StubChain::new(8);
        let db = engine_db();
        let engine = LoyaltyEngine::new(&chain, &db, &NoopSleep, PollPolicy::default());

        chain.reject_next_submit().await;
        let err = engine
            .purchase(&purchase_request(1))
            .await
            .expect_err("rejected");
        match err {
            FlowError::Chain(chain_err) => assert!(chain_err.is_user_rejection()),
            other => panic!("expected chain error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ledger_failure_reports_sync_pending() {
        let chain = StubChain::new(8);
        let db = engine_db();
        {
            let conn = db.lock().await;
            conn.execute_batch("DROP TABLE purchase_history")
                .expect("drop table");
        }
        let engine = LoyaltyEngine::new(&chain, &db, &NoopSleep, PollPolicy::default());

        let outcome = engine.purchase(&purchase_request(1)).await.expect("outcome");
        assert_eq!(outcome.status, ReconcileStatus::SyncPending);
        assert!(outcome.customer.is_none());

        // The payment itself settled.
        assert_eq!(chain.settled_counters(&wallet(1)).await, (1, 0));
    }

    #[tokio::test]
    async fn test_stamp_flow_records_zero_price() {
        let chain = StubChain::new(8);
        let db = engine_db();
        let engine = LoyaltyEngine::new(&chain, &db, &NoopSleep, PollPolicy::default());

        let outcome = engine
            .stamp(&StampRequest {
                wallet: wallet(1),
                stamps_awarded: 1,
                reward_threshold: 8,
                now: 1_700_000_000,
            })
            .await
            .expect("stamp");

        let customer = outcome.customer.expect("customer row");
        assert_eq!(customer.stamp_count, 1);
        assert_eq!(customer.total_volume, 0);

        let conn = db.lock().await;
        let history = cortado_db::queries::purchases::recent(&conn, 10).expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].price, 0);
        assert_eq!(history[0].product_id, None);
    }

    #[tokio::test]
    async fn test_redeem_happy_path() {
        let chain = StubChain::new(8);
        let db = engine_db();
        let w = wallet(1);

        chain.credit_rewards(&w, 1).await;
        {
            let conn = db.lock().await;
            customers::upsert(
                &conn,
                &CustomerRow {
                    wallet_address: w.as_str().to_string(),
                    stamp_count: 0,
                    pending_rewards: 1,
                    total_volume: 16,
                    last_purchase_at: 1000,
                    created_at: 1000,
                    updated_at: 1000,
                },
            )
            .expect("seed");
        }

        let engine = LoyaltyEngine::new(&chain, &db, &NoopSleep, PollPolicy::default());
        let outcome = engine
            .redeem(&RedeemRequest {
                wallet: w.clone(),
                reward_amount: 1,
                now: 2000,
            })
            .await
            .expect("redeem");

        assert_eq!(outcome.status, ReconcileStatus::Reconciled);
        assert!(outcome.drift.is_none());
        assert_eq!(outcome.customer.expect("customer row").pending_rewards, 0);

        let conn = db.lock().await;
        let history = cortado_db::queries::rewards::for_wallet(&conn, &w, 10).expect("history");
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_redeem_without_pending_never_submits() {
        let chain = StubChain::new(8);
        let db = engine_db();
        let engine = LoyaltyEngine::new(&chain, &db, &NoopSleep, PollPolicy::default());

        let result = engine
            .redeem(&RedeemRequest {
                wallet: wallet(1),
                reward_amount: 1,
                now: 2000,
            })
            .await;
        assert!(matches!(
            result,
            Err(FlowError::Ledger(LedgerError::InsufficientRewards(_)))
        ));
    }
}
