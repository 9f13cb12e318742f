//! REST API Server
//!
//! HTTP surface of the onramp service: intent creation, processor webhook
//! delivery, status polling, balance reads, and liveness. Handlers never
//! mutate records directly - every mutation goes through the intent store's
//! transition API, and the webhook path hands disbursement work to the
//! engine's queue so the acknowledgment never waits on chain latency.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use warp::http::{Method, StatusCode};
use warp::hyper::body::Bytes;
use warp::{Filter, Rejection, Reply};

use crate::address::is_valid_address;
use crate::api::ratelimit::{with_rate_limit, RateLimited, RateLimiter};
use crate::api::webhook::{self, WebhookError, SIGNATURE_HEADER};
use crate::chain::ChainClient;
use crate::config::Config;
use crate::disburse::DisbursementHandle;
use crate::processor::ProcessorClient;
use crate::store::{
    IntentEvent, IntentState, IntentStore, Network, PaymentIntentRecord, StoreError,
};

// ============================================================================
// SHARED REQUEST/RESPONSE STRUCTURES
// ============================================================================

/// Standardized response structure for all API endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request was successful
    pub success: bool,
    /// Response data (if successful)
    pub data: Option<T>,
    /// Error message (if failed)
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> warp::reply::Json {
        warp::reply::json(&ApiResponse {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

/// Request body for intent creation.
#[derive(Debug, Deserialize)]
pub struct CreateIntentRequest {
    #[serde(rename = "walletAddress")]
    pub wallet_address: String,
    #[serde(rename = "amountMatic")]
    pub amount_matic: f64,
    pub network: Network,
}

/// Response body for intent creation.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateIntentResponse {
    #[serde(rename = "intentId")]
    pub intent_id: String,
    #[serde(rename = "clientSecret")]
    pub client_secret: String,
    #[serde(rename = "amountUSD")]
    pub amount_usd: f64,
    #[serde(rename = "amountMatic")]
    pub amount_matic: f64,
}

/// Response body for status polling.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub state: IntentState,
    #[serde(rename = "amountMatic")]
    pub amount_matic: f64,
    #[serde(rename = "txHash", skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(rename = "walletAddress")]
    pub wallet_address: String,
    #[serde(rename = "failureReason", skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Processor-side view, included for not-yet-final intents when the
    /// cross-check succeeds
    #[serde(rename = "processorStatus", skip_serializing_if = "Option::is_none")]
    pub processor_status: Option<String>,
}

/// Response body for balance reads.
#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub address: String,
    /// Balance in whole tokens, formatted
    pub balance: String,
    #[serde(rename = "balanceWei")]
    pub balance_wei: String,
}

/// Response body for the health endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub network: Network,
}

// ============================================================================
// CUSTOM REJECTION TYPES
// ============================================================================

/// Client-correctable input error (bad address, out-of-bounds amount)
#[derive(Debug)]
pub struct ValidationRejection(pub String);

/// No record for the requested intent id
#[derive(Debug)]
pub struct NotFoundRejection(pub String);

/// Upstream (processor or chain) failure
#[derive(Debug)]
pub struct UpstreamRejection(pub String);

/// Webhook delivery rejected before any state was touched
#[derive(Debug)]
pub struct WebhookRejection(pub WebhookError);

/// Store persistence failure
#[derive(Debug)]
pub struct StoreRejection(pub String);

impl warp::reject::Reject for ValidationRejection {}
impl warp::reject::Reject for NotFoundRejection {}
impl warp::reject::Reject for UpstreamRejection {}
impl warp::reject::Reject for WebhookRejection {}
impl warp::reject::Reject for StoreRejection {}

fn store_reject(e: StoreError) -> Rejection {
    match e {
        StoreError::UnknownIntent(id) => warp::reject::custom(NotFoundRejection(id)),
        other => warp::reject::custom(StoreRejection(other.to_string())),
    }
}

// ============================================================================
// API HANDLERS
// ============================================================================

/// Handler for intent creation.
///
/// Validates the recipient address and amount bounds, creates the
/// processor-side payment, then records the intent keyed by the
/// processor's payment reference. Create-if-absent in the store keeps a
/// duplicate reference from ever allocating a second record.
async fn create_intent_handler(
    request: CreateIntentRequest,
    config: Arc<Config>,
    store: Arc<dyn IntentStore>,
    processor: Arc<dyn ProcessorClient>,
) -> Result<impl Reply, Rejection> {
    if !is_valid_address(&request.wallet_address) {
        return Err(warp::reject::custom(ValidationRejection(format!(
            "Invalid wallet address: {}",
            request.wallet_address
        ))));
    }

    let pricing = &config.pricing;
    if !request.amount_matic.is_finite()
        || request.amount_matic < pricing.min_amount_matic
        || request.amount_matic > pricing.max_amount_matic
    {
        return Err(warp::reject::custom(ValidationRejection(format!(
            "Amount {} outside allowed range [{}, {}]",
            request.amount_matic, pricing.min_amount_matic, pricing.max_amount_matic
        ))));
    }

    if request.network != config.chain.network {
        return Err(warp::reject::custom(ValidationRejection(format!(
            "This deployment serves {}, not {}",
            config.chain.network, request.network
        ))));
    }

    let amount_usd =
        (request.amount_matic * pricing.usd_per_matic * 100.0).round() / 100.0;

    let payment = processor
        .create_payment(
            amount_usd,
            &request.wallet_address,
            request.amount_matic,
            request.network,
        )
        .await
        .map_err(|e| {
            error!("Processor payment creation failed: {}", e);
            warp::reject::custom(UpstreamRejection(
                "Payment processor unavailable".to_string(),
            ))
        })?;

    let record = PaymentIntentRecord::new(
        payment.id.clone(),
        request.wallet_address.clone(),
        request.amount_matic,
        amount_usd,
        request.network,
    );
    let stored = store.create(record).await.map_err(store_reject)?;

    info!(
        intent_id = %stored.intent_id,
        wallet = %stored.wallet_address,
        amount_matic = stored.amount_matic,
        "Payment intent created"
    );

    Ok(ApiResponse::ok(CreateIntentResponse {
        intent_id: stored.intent_id,
        client_secret: payment.client_secret,
        amount_usd: stored.amount_usd,
        amount_matic: stored.amount_matic,
    }))
}

/// Handler for processor webhook deliveries.
///
/// Verification runs first; nothing is mutated on a bad signature. A
/// recognized success event confirms the intent and enqueues the
/// disbursement; the acknowledgment returns without waiting for either
/// chain submission or confirmation.
async fn webhook_handler(
    signature: Option<String>,
    body: Bytes,
    config: Arc<Config>,
    store: Arc<dyn IntentStore>,
    disburser: DisbursementHandle,
) -> Result<impl Reply, Rejection> {
    let header = signature.ok_or_else(|| {
        warn!("Webhook delivery without signature header");
        warp::reject::custom(WebhookRejection(WebhookError::BadSignature(
            "missing signature header".to_string(),
        )))
    })?;

    webhook::verify_signature(
        &config.processor.webhook_secret,
        &header,
        &body,
        config.processor.webhook_tolerance_secs,
    )
    .map_err(|e| {
        warn!("Webhook signature rejected: {}", e);
        warp::reject::custom(WebhookRejection(e))
    })?;

    let event = webhook::parse_event(&body).map_err(|e| {
        warn!("Webhook event unreadable: {}", e);
        warp::reject::custom(WebhookRejection(e))
    })?;

    let intent_id = event.data.object.id.as_str();
    match event.event_type.as_str() {
        "payment_intent.succeeded" => {
            match store
                .transition(intent_id, IntentEvent::PaymentConfirmed)
                .await
            {
                Ok(outcome) => {
                    if outcome.applied {
                        info!(intent_id = %intent_id, "Payment confirmed");
                    } else {
                        debug!(intent_id = %intent_id, "Replayed confirmation, no-op");
                    }
                    // Enqueue regardless: if a prior trigger was lost, the
                    // idempotent guard makes a duplicate harmless.
                    disburser.disburse(intent_id);
                }
                Err(StoreError::UnknownIntent(_)) => {
                    // Acknowledge so the processor stops redelivering an
                    // event this service can never apply.
                    warn!(intent_id = %intent_id, "Confirmation for unknown intent");
                }
                Err(e) => return Err(store_reject(e)),
            }
        }
        "payment_intent.payment_failed" => {
            let reason = event
                .data
                .object
                .last_payment_error
                .and_then(|detail| detail.message)
                .unwrap_or_else(|| "card payment failed".to_string());
            match store
                .transition(intent_id, IntentEvent::PaymentFailed(reason))
                .await
            {
                Ok(_) => info!(intent_id = %intent_id, "Payment failed"),
                Err(StoreError::UnknownIntent(_)) => {
                    warn!(intent_id = %intent_id, "Failure event for unknown intent");
                }
                Err(e) => return Err(store_reject(e)),
            }
        }
        other => {
            debug!(event_type = %other, "Ignoring unrecognized webhook event");
        }
    }

    Ok(warp::reply::json(&serde_json::json!({ "received": true })))
}

/// Handler for status polling.
///
/// Read-only projection of the record. For intents the processor still
/// owns (`Pending`/`Confirmed`), the processor's own view is attached when
/// the cross-check succeeds; the check never mutates local state.
async fn status_handler(
    intent_id: String,
    store: Arc<dyn IntentStore>,
    processor: Arc<dyn ProcessorClient>,
) -> Result<impl Reply, Rejection> {
    let record = store
        .get(&intent_id)
        .await
        .map_err(store_reject)?
        .ok_or_else(|| warp::reject::custom(NotFoundRejection(intent_id.clone())))?;

    let processor_status = match record.state {
        IntentState::Pending | IntentState::Confirmed => {
            match processor.payment_status(&intent_id).await {
                Ok(status) => Some(status),
                Err(e) => {
                    debug!(intent_id = %intent_id, "Processor cross-check failed: {}", e);
                    None
                }
            }
        }
        _ => None,
    };

    Ok(ApiResponse::ok(StatusResponse {
        state: record.state,
        amount_matic: record.amount_matic,
        tx_hash: record.tx_hash,
        wallet_address: record.wallet_address,
        failure_reason: record.failure_reason,
        processor_status,
    }))
}

/// Handler for balance reads.
async fn balance_handler(
    address: String,
    chain: Arc<dyn ChainClient>,
) -> Result<impl Reply, Rejection> {
    if !is_valid_address(&address) {
        return Err(warp::reject::custom(ValidationRejection(format!(
            "Invalid address: {}",
            address
        ))));
    }

    let balance_wei = chain.balance(&address).await.map_err(|e| {
        error!(address = %address, "Balance query failed: {}", e);
        warp::reject::custom(UpstreamRejection("Chain RPC unavailable".to_string()))
    })?;

    Ok(ApiResponse::ok(BalanceResponse {
        address,
        balance: ethers::utils::format_ether(balance_wei),
        balance_wei: balance_wei.to_string(),
    }))
}

// ============================================================================
// WARP FILTER HELPERS
// ============================================================================

fn with_config(
    config: Arc<Config>,
) -> impl Filter<Extract = (Arc<Config>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || config.clone())
}

fn with_store(
    store: Arc<dyn IntentStore>,
) -> impl Filter<Extract = (Arc<dyn IntentStore>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || store.clone())
}

fn with_processor(
    processor: Arc<dyn ProcessorClient>,
) -> impl Filter<Extract = (Arc<dyn ProcessorClient>,), Error = std::convert::Infallible> + Clone
{
    warp::any().map(move || processor.clone())
}

fn with_chain(
    chain: Arc<dyn ChainClient>,
) -> impl Filter<Extract = (Arc<dyn ChainClient>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || chain.clone())
}

// ============================================================================
// CORS CONFIGURATION
// ============================================================================

/// Creates a CORS filter based on the configured allowed origins.
fn create_cors_filter(allowed_origins: &[String]) -> warp::cors::Builder {
    let methods = vec![Method::GET, Method::POST, Method::OPTIONS];

    if allowed_origins.contains(&"*".to_string()) {
        warp::cors()
            .allow_any_origin()
            .allow_methods(methods)
            .allow_headers(vec!["content-type"])
    } else {
        let origins: Vec<&str> = allowed_origins.iter().map(|s| s.as_str()).collect();
        warp::cors()
            .allow_origins(origins)
            .allow_methods(methods)
            .allow_headers(vec!["content-type"])
    }
}

// ============================================================================
// REJECTION HANDLER
// ============================================================================

/// Global rejection handler for all API routes.
///
/// Converts rejections into the standardized envelope with the status code
/// the error taxonomy assigns.
pub async fn handle_rejection(rej: Rejection) -> Result<impl Reply, std::convert::Infallible> {
    let (status, message) = if let Some(err) = rej.find::<ValidationRejection>() {
        (StatusCode::BAD_REQUEST, err.0.clone())
    } else if let Some(err) = rej.find::<NotFoundRejection>() {
        (
            StatusCode::NOT_FOUND,
            format!("Unknown intent: {}", err.0),
        )
    } else if let Some(err) = rej.find::<WebhookRejection>() {
        // Deliberately terse: the processor's retry loop is the audience.
        let label = match &err.0 {
            WebhookError::BadSignature(_) => "Signature verification failed",
            WebhookError::MalformedEvent(_) => "Unreadable event payload",
        };
        (StatusCode::BAD_REQUEST, label.to_string())
    } else if rej.find::<RateLimited>().is_some() {
        (
            StatusCode::TOO_MANY_REQUESTS,
            "Too many requests, slow down".to_string(),
        )
    } else if let Some(err) = rej.find::<UpstreamRejection>() {
        (StatusCode::BAD_GATEWAY, err.0.clone())
    } else if let Some(err) = rej.find::<StoreRejection>() {
        error!("Store failure surfaced to client: {}", err.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        )
    } else if let Some(err) = rej.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("Invalid JSON: {}", err))
    } else if rej.is_not_found() {
        (StatusCode::NOT_FOUND, "Endpoint not found".to_string())
    } else if rej.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed".to_string(),
        )
    } else {
        error!("Unhandled rejection: {:?}", rej);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        )
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(message),
        }),
        status,
    ))
}

// ============================================================================
// API SERVER IMPLEMENTATION
// ============================================================================

/// REST API server for the onramp service.
pub struct ApiServer {
    /// Service configuration
    config: Arc<Config>,
    /// Intent store (shared with the disbursement engine)
    store: Arc<dyn IntentStore>,
    /// Payment processor client
    processor: Arc<dyn ProcessorClient>,
    /// Chain client for balance reads
    chain: Arc<dyn ChainClient>,
    /// Disbursement enqueue handle
    disburser: DisbursementHandle,
}

impl ApiServer {
    /// Creates a new API server with the given components.
    pub fn new(
        config: Config,
        store: Arc<dyn IntentStore>,
        processor: Arc<dyn ProcessorClient>,
        chain: Arc<dyn ChainClient>,
        disburser: DisbursementHandle,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            processor,
            chain,
            disburser,
        }
    }

    /// Starts the API server and begins handling HTTP requests.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Server ran until shutdown
    /// * `Err(anyhow::Error)` - Bind address unparseable
    pub async fn run(&self) -> Result<()> {
        info!(
            "Starting API server on {}:{}",
            self.config.api.host, self.config.api.port
        );

        let routes = self.create_routes();

        let addr: std::net::SocketAddr =
            format!("{}:{}", self.config.api.host, self.config.api.port)
                .parse()
                .context("Failed to parse API server address")?;

        warp::serve(routes).run(addr).await;

        Ok(())
    }

    /// Creates all API routes for the server.
    pub(crate) fn create_routes(
        &self,
    ) -> impl Filter<Extract = impl warp::Reply, Error = std::convert::Infallible> + Clone {
        let config = self.config.clone();
        let store = self.store.clone();
        let processor = self.processor.clone();
        let chain = self.chain.clone();
        let disburser = self.disburser.clone();

        let create_limiter = RateLimiter::new(&config.limits.create);
        let read_limiter = RateLimiter::new(&config.limits.read);

        // Health check endpoint - returns service status
        let health_network = config.chain.network;
        let health = warp::path("health").and(warp::get()).map(move || {
            ApiResponse::ok(HealthResponse {
                status: "ok".to_string(),
                timestamp: chrono::Utc::now().to_rfc3339(),
                network: health_network,
            })
        });

        // POST /api/payment/create-intent - create a pending disbursement intent
        let create_intent = warp::path!("api" / "payment" / "create-intent")
            .and(warp::post())
            .and(with_rate_limit(create_limiter))
            .and(warp::body::bytes())
            .and(with_config(config.clone()))
            .and(with_store(store.clone()))
            .and(with_processor(processor.clone()))
            .and_then(
                |body: Bytes,
                 config: Arc<Config>,
                 store: Arc<dyn IntentStore>,
                 processor: Arc<dyn ProcessorClient>| async move {
                    debug!(
                        "POST /api/payment/create-intent - body: {}",
                        String::from_utf8_lossy(&body)
                    );
                    match serde_json::from_slice::<CreateIntentRequest>(&body) {
                        Ok(request) => {
                            create_intent_handler(request, config, store, processor).await
                        }
                        Err(e) => Err(warp::reject::custom(ValidationRejection(format!(
                            "Invalid JSON: {}",
                            e
                        )))),
                    }
                },
            );

        // POST /api/webhook/provider - processor event delivery. Rejected
        // deliveries re-enter the processor's retry loop, so the general
        // limiter is safe here.
        let webhook = warp::path!("api" / "webhook" / "provider")
            .and(warp::post())
            .and(with_rate_limit(read_limiter.clone()))
            .and(warp::header::optional::<String>(SIGNATURE_HEADER))
            .and(warp::body::bytes())
            .and(with_config(config.clone()))
            .and(with_store(store.clone()))
            .and(warp::any().map(move || disburser.clone()))
            .and_then(webhook_handler);

        // GET /api/payment/status/:intentId - poll intent state
        let status = warp::path!("api" / "payment" / "status" / String)
            .and(warp::get())
            .and(with_rate_limit(read_limiter.clone()))
            .and(with_store(store.clone()))
            .and(with_processor(processor.clone()))
            .and_then(status_handler);

        // GET /api/wallet/balance/:address - funding/user balance read
        let balance = warp::path!("api" / "wallet" / "balance" / String)
            .and(warp::get())
            .and(with_rate_limit(read_limiter))
            .and(with_chain(chain))
            .and_then(balance_handler);

        health
            .or(create_intent)
            .or(webhook)
            .or(status)
            .or(balance)
            .with(create_cors_filter(&self.config.api.cors_origins))
            .recover(handle_rejection)
    }

    /// Public method for testing - exposes routes for integration tests
    pub fn test_routes(
        &self,
    ) -> impl Filter<Extract = impl warp::Reply, Error = std::convert::Infallible> + Clone {
        self.create_routes()
    }
}
