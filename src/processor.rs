//! Payment Processor Client
//!
//! HTTP client for the external card payment processor. Creation of the
//! processor-side payment object happens here; everything after that
//! (capture, retries, disputes) is the processor's business and reaches
//! this service only through the webhook gateway.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::config::ProcessorSettings;
use crate::store::Network;

/// Errors from processor API access.
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// Request never completed (connectivity, timeout)
    #[error("processor request failed: {0}")]
    Request(String),
    /// Processor answered with an error status
    #[error("processor returned error: {0}")]
    Api(String),
}

/// Processor-side payment object returned at creation.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorPayment {
    /// Processor-issued payment reference; becomes the intent id
    pub id: String,
    /// Secret the browser uses to complete the card flow
    pub client_secret: String,
    /// Processor-side status at creation time
    pub status: String,
}

/// Payment status snapshot used for staleness cross-checks.
#[derive(Debug, Clone, Deserialize)]
struct ProcessorPaymentStatus {
    status: String,
}

/// Client for the external card payment processor.
#[async_trait]
pub trait ProcessorClient: Send + Sync {
    /// Creates a processor-side payment for a quoted charge.
    ///
    /// # Arguments
    ///
    /// * `amount_usd` - Quoted charge in USD
    /// * `wallet_address` - Recipient wallet, attached as metadata
    /// * `amount_matic` - Quoted token amount, attached as metadata
    /// * `network` - Target network, attached as metadata
    ///
    /// # Returns
    ///
    /// * `Ok(ProcessorPayment)` - Payment reference and client secret
    /// * `Err(ProcessorError)` - Upstream failure; no intent is recorded
    async fn create_payment(
        &self,
        amount_usd: f64,
        wallet_address: &str,
        amount_matic: f64,
        network: Network,
    ) -> Result<ProcessorPayment, ProcessorError>;

    /// Fetches the processor's current status for a payment.
    ///
    /// Read-only; used by the status endpoint to flag stale local state.
    async fn payment_status(&self, payment_id: &str) -> Result<String, ProcessorError>;
}

/// Production processor client over the processor's REST API.
pub struct HttpProcessorClient {
    http: Client,
    api_url: String,
    secret_key: String,
}

impl HttpProcessorClient {
    /// Creates a client from processor settings.
    pub fn new(settings: &ProcessorSettings) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            http,
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            secret_key: settings.secret_key.clone(),
        }
    }
}

#[async_trait]
impl ProcessorClient for HttpProcessorClient {
    async fn create_payment(
        &self,
        amount_usd: f64,
        wallet_address: &str,
        amount_matic: f64,
        network: Network,
    ) -> Result<ProcessorPayment, ProcessorError> {
        // Processors charge in minor units.
        let amount_cents = (amount_usd * 100.0).round() as u64;

        let params = [
            ("amount", amount_cents.to_string()),
            ("currency", "usd".to_string()),
            ("metadata[wallet_address]", wallet_address.to_string()),
            ("metadata[amount_matic]", amount_matic.to_string()),
            ("metadata[network]", network.to_string()),
        ];

        // A fresh idempotency key per logical create; the processor dedupes
        // its own side if this request is retried.
        let response = self
            .http
            .post(format!("{}/v1/payment_intents", self.api_url))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", uuid::Uuid::new_v4().to_string())
            .form(&params)
            .send()
            .await
            .map_err(|e| ProcessorError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProcessorError::Api(format!("{}: {}", status, body)));
        }

        response
            .json()
            .await
            .map_err(|e| ProcessorError::Api(format!("unreadable payment object: {}", e)))
    }

    async fn payment_status(&self, payment_id: &str) -> Result<String, ProcessorError> {
        let response = self
            .http
            .get(format!("{}/v1/payment_intents/{}", self.api_url, payment_id))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| ProcessorError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProcessorError::Api(format!("{}: {}", status, body)));
        }

        let payment: ProcessorPaymentStatus = response
            .json()
            .await
            .map_err(|e| ProcessorError::Api(format!("unreadable payment object: {}", e)))?;
        Ok(payment.status)
    }
}
