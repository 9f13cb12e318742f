//! Chain Access Module
//!
//! Trait seam between the disbursement engine and the underlying chain.
//! The production implementation speaks raw JSON-RPC; tests substitute an
//! in-process fake. Errors carry a transient/permanent classification that
//! drives the engine's retry policy.

mod evm;

pub use evm::EvmRpcClient;

use async_trait::async_trait;
use ethers::types::U256;
use serde::Deserialize;
use thiserror::Error;

/// Errors from chain access, classified for retry purposes.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Worth retrying: connectivity, nonce contention, gas pricing
    #[error("transient chain error: {0}")]
    Transient(String),
    /// Not worth retrying: invalid recipient, insufficient funding balance
    #[error("permanent chain error: {0}")]
    Permanent(String),
}

impl ChainError {
    /// Whether the engine should retry after this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Transient(_))
    }
}

/// Minimal transaction receipt as returned by `eth_getTransactionReceipt`.
#[derive(Debug, Clone, Deserialize)]
pub struct TxReceipt {
    /// Hash of the mined transaction
    #[serde(rename = "transactionHash")]
    pub transaction_hash: String,
    /// Execution status: `0x1` success, `0x0` revert
    pub status: Option<String>,
    /// Block the transaction was included in
    #[serde(rename = "blockNumber")]
    pub block_number: Option<String>,
}

impl TxReceipt {
    /// Whether the transaction executed successfully.
    pub fn succeeded(&self) -> bool {
        matches!(self.status.as_deref(), Some("0x1"))
    }
}

/// Client for the chain holding the funding account.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Address of the custodial funding account.
    fn funding_address(&self) -> String;

    /// Balance of `address` in wei.
    async fn balance(&self, address: &str) -> Result<U256, ChainError>;

    /// Next nonce for the funding account, including pending transactions.
    async fn pending_nonce(&self) -> Result<U256, ChainError>;

    /// Signs and submits a gas-token transfer from the funding account.
    ///
    /// # Arguments
    ///
    /// * `to` - Recipient address
    /// * `amount_wei` - Transfer value in wei
    /// * `nonce` - Funding-account nonce to use
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - Transaction hash
    /// * `Err(ChainError)` - Classified submission failure
    async fn submit_transfer(
        &self,
        to: &str,
        amount_wei: U256,
        nonce: U256,
    ) -> Result<String, ChainError>;

    /// Receipt for `tx_hash`, or `None` while the transaction is unmined.
    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>, ChainError>;
}
