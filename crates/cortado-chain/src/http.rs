//! HTTP client for the chain gateway service.
//!
//! The gateway holds the operator key, talks to the node, and exposes a
//! small JSON surface: `POST /tx/{purchase,stamp,redeem}` (blocking until
//! the transaction is mined) and `GET /{stamps,rewards}/{wallet}`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use cortado_types::{TxHash, WalletAddress};

use crate::{ChainError, ChainLedger, Result, TxReceipt};

/// Gateway error code for a signing rejection.
const CODE_USER_REJECTED: &str = "user-rejected";

/// Production [`ChainLedger`] over the deployment's chain gateway.
pub struct HttpChainLedger {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct SubmitBody<'a> {
    wallet: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    amount: Option<u64>,
}

/// Mined-transaction receipt as returned by the gateway.
#[derive(Debug, Deserialize)]
struct TxResponse {
    tx_hash: String,
    block_number: u64,
    /// Receipt status: 1 success, 0 revert.
    status: u8,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    value: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    #[serde(default)]
    message: String,
}

impl HttpChainLedger {
    /// Create a client for the gateway at `base_url`.
    ///
    /// `timeout_secs` bounds each request including the gateway's wait for
    /// mining; an elapsed timeout surfaces as [`ChainError::Timeout`].
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ChainError::Gateway(e.to_string()))?;
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Ok(Self { base_url, client })
    }

    async fn submit(
        &self,
        endpoint: &str,
        wallet: &WalletAddress,
        amount: Option<u64>,
    ) -> Result<TxReceipt> {
        let url = format!("{}/tx/{endpoint}", self.base_url);
        debug!(%wallet, endpoint, "submitting transaction via gateway");

        let response = self
            .client
            .post(&url)
            .json(&SubmitBody {
                wallet: wallet.as_str(),
                amount,
            })
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_from_body(&body));
        }

        let body: TxResponse = response
            .json()
            .await
            .map_err(|e| ChainError::InvalidResponse(e.to_string()))?;
        receipt_from_response(body)
    }

    async fn read_count(&self, endpoint: &str, wallet: &WalletAddress) -> Result<u64> {
        let url = format!("{}/{endpoint}/{}", self.base_url, wallet);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_from_body(&body));
        }

        let body: CountResponse = response
            .json()
            .await
            .map_err(|e| ChainError::InvalidResponse(e.to_string()))?;
        Ok(body.value)
    }
}

/// Map a transport-level failure to the error taxonomy.
fn transport_error(e: reqwest::Error) -> ChainError {
    if e.is_timeout() {
        ChainError::Timeout
    } else {
        ChainError::Gateway(e.to_string())
    }
}

/// Map a non-2xx gateway body to the error taxonomy.
fn error_from_body(body: &str) -> ChainError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(err) if err.code == CODE_USER_REJECTED => ChainError::UserRejected,
        Ok(err) => ChainError::Gateway(format!("{}: {}", err.code, err.message)),
        Err(_) => ChainError::Gateway(body.to_string()),
    }
}

/// Convert a mined receipt into a [`TxReceipt`], surfacing reverts as errors.
fn receipt_from_response(body: TxResponse) -> Result<TxReceipt> {
    let tx_hash =
        TxHash::parse(&body.tx_hash).map_err(|e| ChainError::InvalidResponse(e.to_string()))?;
    if body.status == 0 {
        return Err(ChainError::Reverted { tx_hash });
    }
    Ok(TxReceipt {
        tx_hash,
        block_number: body.block_number,
    })
}

#[async_trait]
impl ChainLedger for HttpChainLedger {
    async fn submit_purchase(&self, wallet: &WalletAddress, amount: u64) -> Result<TxReceipt> {
        self.submit("purchase", wallet, Some(amount)).await
    }

    async fn submit_stamp(&self, wallet: &WalletAddress) -> Result<TxReceipt> {
        self.submit("stamp", wallet, None).await
    }

    async fn submit_redeem(&self, wallet: &WalletAddress) -> Result<TxReceipt> {
        self.submit("redeem", wallet, None).await
    }

    async fn stamp_count(&self, wallet: &WalletAddress) -> Result<u64> {
        self.read_count("stamps", wallet).await
    }

    async fn pending_rewards(&self, wallet: &WalletAddress) -> Result<u64> {
        self.read_count("rewards", wallet).await
    }
}
