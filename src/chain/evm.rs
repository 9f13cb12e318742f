//! EVM JSON-RPC Chain Client
//!
//! Talks directly to the chain's JSON-RPC endpoint for reads and submits
//! locally signed legacy transfers via `eth_sendRawTransaction`. The
//! funding account's key never leaves the process.

use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, TransactionRequest, U256};
use ethers::utils::to_checksum;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{ChainClient, ChainError, TxReceipt};
use crate::config::ChainSettings;

/// JSON-RPC request wrapper
#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Vec<serde_json::Value>,
    id: u64,
}

/// JSON-RPC response wrapper
#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Client for the chain holding the funding account.
pub struct EvmRpcClient {
    /// HTTP client for JSON-RPC calls
    http: Client,
    /// RPC endpoint URL
    rpc_url: String,
    /// Funding-account signing key, bound to the configured chain id
    wallet: LocalWallet,
    /// Chain id for replay protection
    chain_id: u64,
    /// Gas limit for a plain transfer
    gas_limit: u64,
}

impl EvmRpcClient {
    /// Creates a client from chain settings.
    ///
    /// # Arguments
    ///
    /// * `settings` - Chain section of the service configuration
    ///
    /// # Returns
    ///
    /// * `Ok(EvmRpcClient)` - Ready client
    /// * `Err(anyhow::Error)` - Malformed funding key or HTTP client failure
    pub fn new(settings: &ChainSettings) -> Result<Self> {
        let wallet: LocalWallet = settings
            .funding_private_key
            .parse()
            .context("Invalid funding account private key")?;
        let wallet = wallet.with_chain_id(settings.chain_id);

        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            rpc_url: settings.rpc_url.clone(),
            wallet,
            chain_id: settings.chain_id,
            gas_limit: settings.gas_limit,
        })
    }

    /// Performs one JSON-RPC call.
    ///
    /// Transport failures are transient; RPC-level errors are classified by
    /// message.
    async fn rpc_call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<T, ChainError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: 1,
        };

        let response = self
            .http
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChainError::Transient(format!("{} request failed: {}", method, e)))?;

        let rpc_response: JsonRpcResponse<T> = response
            .json()
            .await
            .map_err(|e| ChainError::Transient(format!("{} response unreadable: {}", method, e)))?;

        if let Some(error) = rpc_response.error {
            return Err(classify_rpc_error(method, error.code, &error.message));
        }

        rpc_response
            .result
            .ok_or_else(|| ChainError::Transient(format!("{} returned no result", method)))
    }

    /// Current gas price from the node.
    async fn gas_price(&self) -> Result<U256, ChainError> {
        let hex_price: String = self.rpc_call("eth_gasPrice", vec![]).await?;
        parse_hex_quantity(&hex_price)
    }
}

#[async_trait]
impl ChainClient for EvmRpcClient {
    fn funding_address(&self) -> String {
        to_checksum(&self.wallet.address(), None)
    }

    async fn balance(&self, address: &str) -> Result<U256, ChainError> {
        let hex_balance: String = self
            .rpc_call(
                "eth_getBalance",
                vec![serde_json::json!(address), serde_json::json!("latest")],
            )
            .await?;
        parse_hex_quantity(&hex_balance)
    }

    async fn pending_nonce(&self) -> Result<U256, ChainError> {
        let hex_nonce: String = self
            .rpc_call(
                "eth_getTransactionCount",
                vec![
                    serde_json::json!(self.funding_address()),
                    serde_json::json!("pending"),
                ],
            )
            .await?;
        parse_hex_quantity(&hex_nonce)
    }

    async fn submit_transfer(
        &self,
        to: &str,
        amount_wei: U256,
        nonce: U256,
    ) -> Result<String, ChainError> {
        let recipient: Address = to
            .parse()
            .map_err(|_| ChainError::Permanent(format!("invalid recipient address: {}", to)))?;

        let gas_price = self.gas_price().await?;

        let tx: TypedTransaction = TransactionRequest::new()
            .to(recipient)
            .value(amount_wei)
            .nonce(nonce)
            .gas(self.gas_limit)
            .gas_price(gas_price)
            .chain_id(self.chain_id)
            .into();

        let signature = self
            .wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| ChainError::Permanent(format!("signing failed: {}", e)))?;
        let raw = tx.rlp_signed(&signature);

        debug!(to = %to, nonce = %nonce, "Submitting signed transfer");

        let tx_hash: String = self
            .rpc_call(
                "eth_sendRawTransaction",
                vec![serde_json::json!(format!("0x{}", hex::encode(&raw)))],
            )
            .await?;

        Ok(tx_hash)
    }

    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>, ChainError> {
        // The node answers `result: null` while the transaction is unmined.
        let value: serde_json::Value = self
            .rpc_call(
                "eth_getTransactionReceipt",
                vec![serde_json::json!(tx_hash)],
            )
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| ChainError::Transient(format!("unreadable receipt: {}", e)))
    }
}

/// Parses a `0x`-prefixed hex quantity into a `U256`.
fn parse_hex_quantity(value: &str) -> Result<U256, ChainError> {
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    U256::from_str_radix(stripped, 16)
        .map_err(|e| ChainError::Transient(format!("invalid hex quantity {}: {}", value, e)))
}

/// Classifies an RPC-level error by its message.
///
/// Balance and recipient problems require operator intervention; everything
/// else (nonce races, gas spikes, node hiccups) is retried under the
/// engine's bounded backoff.
fn classify_rpc_error(method: &str, code: i64, message: &str) -> ChainError {
    let lower = message.to_ascii_lowercase();
    let detail = format!("{} rejected ({}): {}", method, code, message);
    if lower.contains("insufficient funds") || lower.contains("invalid address") {
        ChainError::Permanent(detail)
    } else {
        ChainError::Transient(detail)
    }
}
