//! Shared test helpers for onramp service tests
//!
//! Provides constants, configuration builders, in-process fakes for the
//! chain and processor seams, and a harness that wires the pipeline the
//! same way `main` does.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::types::U256;
use tokio::sync::Mutex;

use onramp::chain::{ChainClient, ChainError, TxReceipt};
use onramp::config::{
    ApiSettings, ChainSettings, Config, DisbursementSettings, LimitSettings, PricingSettings,
    ProcessorSettings, RateLimitSettings, StoreSettings,
};
use onramp::disburse::{DisbursementEngine, DisbursementHandle};
use onramp::processor::{ProcessorClient, ProcessorError, ProcessorPayment};
use onramp::store::{
    IntentEvent, IntentState, IntentStore, MemoryIntentStore, Network, PaymentIntentRecord,
};
use onramp::ApiServer;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Dummy intent id in the processor's reference format
pub const DUMMY_INTENT_ID: &str = "pi_3OaQbX2eZvKYlo2C0xyz1234";

/// Valid recipient address, all lowercase (no checksum encoded)
pub const DUMMY_WALLET_LOWER: &str = "0xa11ce00000000000000000000000000000000a11";

/// Valid recipient address with EIP-55 checksum casing
pub const DUMMY_WALLET_CHECKSUMMED: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

/// A second distinct valid recipient address
pub const DUMMY_WALLET_SECOND: &str = "0xb0b0000000000000000000000000000000000b0b";

/// Webhook signing secret used across tests
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Funding key with a well-known address (key 0x...01)
pub const TEST_FUNDING_KEY: &str =
    "0x0000000000000000000000000000000000000000000000000000000000000001";

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Builds a config tuned for fast tests: tight poll intervals, short
/// backoffs, generous rate limits, and an inert reconciler.
pub fn build_test_config() -> Config {
    Config {
        api: ApiSettings {
            host: "127.0.0.1".to_string(),
            port: 0,
            cors_origins: vec!["*".to_string()],
        },
        chain: ChainSettings {
            name: "Test Chain".to_string(),
            rpc_url: "http://127.0.0.1:8545".to_string(),
            chain_id: 80002,
            network: Network::Testnet,
            funding_private_key: TEST_FUNDING_KEY.to_string(),
            gas_limit: 21_000,
            confirmation_timeout_ms: 500,
            receipt_poll_interval_ms: 10,
        },
        processor: ProcessorSettings {
            api_url: "http://127.0.0.1:9999".to_string(),
            secret_key: "sk_test_key".to_string(),
            webhook_secret: TEST_WEBHOOK_SECRET.to_string(),
            webhook_tolerance_secs: 300,
        },
        pricing: PricingSettings {
            usd_per_matic: 0.85,
            min_amount_matic: 0.01,
            max_amount_matic: 10.0,
        },
        disbursement: DisbursementSettings {
            max_attempts: 3,
            backoff_base_ms: 10,
            backoff_max_ms: 50,
            reconcile_interval_ms: 3_600_000,
            queue_capacity: 64,
        },
        limits: LimitSettings {
            create: RateLimitSettings {
                window_ms: 60_000,
                max_requests: 1_000,
            },
            read: RateLimitSettings {
                window_ms: 60_000,
                max_requests: 1_000,
            },
        },
        store: StoreSettings { path: None },
    }
}

// ============================================================================
// FAKE CHAIN CLIENT
// ============================================================================

/// One recorded submission from the fake chain.
#[derive(Debug, Clone)]
pub struct Submission {
    pub to: String,
    pub amount_wei: U256,
    pub nonce: U256,
}

/// In-process chain fake. Assigns strictly increasing nonces, records
/// every submission, and (by default) mines a success receipt immediately.
pub struct FakeChainClient {
    nonce: Mutex<u64>,
    submissions: Mutex<Vec<Submission>>,
    receipts: Mutex<HashMap<String, TxReceipt>>,
    balances: Mutex<HashMap<String, U256>>,
    scripted_failures: Mutex<VecDeque<ChainError>>,
    auto_receipt: bool,
}

impl FakeChainClient {
    /// Fake that mines every submission immediately.
    pub fn new() -> Self {
        Self::with_auto_receipt(true)
    }

    /// Fake with explicit control over receipt availability.
    pub fn with_auto_receipt(auto_receipt: bool) -> Self {
        Self {
            nonce: Mutex::new(0),
            submissions: Mutex::new(Vec::new()),
            receipts: Mutex::new(HashMap::new()),
            balances: Mutex::new(HashMap::new()),
            scripted_failures: Mutex::new(VecDeque::new()),
            auto_receipt,
        }
    }

    /// Queues an error for the next submission attempt(s), in order.
    pub async fn script_failure(&self, error: ChainError) {
        self.scripted_failures.lock().await.push_back(error);
    }

    /// Makes a receipt available for a submitted hash.
    pub async fn set_receipt(&self, tx_hash: &str, succeeded: bool) {
        self.receipts.lock().await.insert(
            tx_hash.to_string(),
            TxReceipt {
                transaction_hash: tx_hash.to_string(),
                status: Some(if succeeded { "0x1" } else { "0x0" }.to_string()),
                block_number: Some("0x10".to_string()),
            },
        );
    }

    /// Sets the balance returned for an address.
    pub async fn set_balance(&self, address: &str, wei: U256) {
        self.balances
            .lock()
            .await
            .insert(address.to_lowercase(), wei);
    }

    /// Snapshot of everything submitted so far.
    pub async fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().await.clone()
    }
}

#[async_trait]
impl ChainClient for FakeChainClient {
    fn funding_address(&self) -> String {
        "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf".to_string()
    }

    async fn balance(&self, address: &str) -> Result<U256, ChainError> {
        Ok(self
            .balances
            .lock()
            .await
            .get(&address.to_lowercase())
            .copied()
            .unwrap_or_else(U256::zero))
    }

    async fn pending_nonce(&self) -> Result<U256, ChainError> {
        Ok(U256::from(*self.nonce.lock().await))
    }

    async fn submit_transfer(
        &self,
        to: &str,
        amount_wei: U256,
        nonce: U256,
    ) -> Result<String, ChainError> {
        if let Some(error) = self.scripted_failures.lock().await.pop_front() {
            return Err(error);
        }

        let mut next_nonce = self.nonce.lock().await;
        assert_eq!(
            U256::from(*next_nonce),
            nonce,
            "out-of-order nonce would corrupt the account's transaction stream"
        );
        *next_nonce += 1;

        let tx_hash = format!("0xfaketx{:058x}", nonce);
        self.submissions.lock().await.push(Submission {
            to: to.to_string(),
            amount_wei,
            nonce,
        });

        if self.auto_receipt {
            drop(next_nonce);
            self.set_receipt(&tx_hash, true).await;
        }

        Ok(tx_hash)
    }

    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>, ChainError> {
        Ok(self.receipts.lock().await.get(tx_hash).cloned())
    }
}

// ============================================================================
// FAKE PROCESSOR CLIENT
// ============================================================================

/// In-process processor fake. Issues deterministic payment references and
/// serves status lookups from a map.
pub struct FakeProcessorClient {
    next_id: Mutex<u64>,
    fixed_id: Option<String>,
    statuses: Mutex<HashMap<String, String>>,
    fail_create: Mutex<bool>,
}

impl FakeProcessorClient {
    pub fn new() -> Self {
        Self {
            next_id: Mutex::new(0),
            fixed_id: None,
            statuses: Mutex::new(HashMap::new()),
            fail_create: Mutex::new(false),
        }
    }

    /// Always issues the same payment reference, for duplicate-create tests.
    pub fn with_fixed_id(id: &str) -> Self {
        Self {
            next_id: Mutex::new(0),
            fixed_id: Some(id.to_string()),
            statuses: Mutex::new(HashMap::new()),
            fail_create: Mutex::new(false),
        }
    }

    /// Makes the next create calls fail upstream.
    pub async fn fail_creates(&self, fail: bool) {
        *self.fail_create.lock().await = fail;
    }

    /// Overrides the processor-side status for a payment.
    pub async fn set_status(&self, id: &str, status: &str) {
        self.statuses
            .lock()
            .await
            .insert(id.to_string(), status.to_string());
    }
}

#[async_trait]
impl ProcessorClient for FakeProcessorClient {
    async fn create_payment(
        &self,
        _amount_usd: f64,
        _wallet_address: &str,
        _amount_matic: f64,
        _network: Network,
    ) -> Result<ProcessorPayment, ProcessorError> {
        if *self.fail_create.lock().await {
            return Err(ProcessorError::Api("503: processor down".to_string()));
        }

        let id = match &self.fixed_id {
            Some(id) => id.clone(),
            None => {
                let mut next = self.next_id.lock().await;
                *next += 1;
                format!("pi_test_{:06}", *next)
            }
        };
        self.statuses
            .lock()
            .await
            .insert(id.clone(), "requires_payment_method".to_string());

        Ok(ProcessorPayment {
            client_secret: format!("{}_secret_abc", id),
            status: "requires_payment_method".to_string(),
            id,
        })
    }

    async fn payment_status(&self, payment_id: &str) -> Result<String, ProcessorError> {
        self.statuses
            .lock()
            .await
            .get(payment_id)
            .cloned()
            .ok_or_else(|| ProcessorError::Api(format!("404: no such payment {}", payment_id)))
    }
}

// ============================================================================
// HARNESS
// ============================================================================

/// Fully wired service with fakes at the chain and processor seams.
pub struct TestHarness {
    pub config: Config,
    pub store: Arc<MemoryIntentStore>,
    pub chain: Arc<FakeChainClient>,
    pub processor: Arc<FakeProcessorClient>,
    pub disburser: DisbursementHandle,
    pub server: ApiServer,
}

/// Wires the pipeline with the default test config.
pub fn build_harness() -> TestHarness {
    build_harness_with_config(build_test_config())
}

/// Wires the pipeline the same way `main` does, with fakes substituted at
/// the trait seams.
pub fn build_harness_with_config(config: Config) -> TestHarness {
    let store = Arc::new(MemoryIntentStore::new());
    let chain = Arc::new(FakeChainClient::new());
    let processor = Arc::new(FakeProcessorClient::new());

    let disburser = DisbursementEngine::start(
        store.clone() as Arc<dyn IntentStore>,
        chain.clone() as Arc<dyn ChainClient>,
        &config,
    );
    let server = ApiServer::new(
        config.clone(),
        store.clone() as Arc<dyn IntentStore>,
        processor.clone() as Arc<dyn ProcessorClient>,
        chain.clone() as Arc<dyn ChainClient>,
        disburser.clone(),
    );

    TestHarness {
        config,
        store,
        chain,
        processor,
        disburser,
        server,
    }
}

// ============================================================================
// UTILITIES
// ============================================================================

/// Builds a signed webhook body + header pair for an event payload.
pub fn signed_event_body(event: &serde_json::Value) -> (String, String) {
    let body = event.to_string();
    let header = onramp::api::webhook::sign_payload(
        TEST_WEBHOOK_SECRET,
        chrono::Utc::now().timestamp(),
        body.as_bytes(),
    );
    (body, header)
}

/// Seeds a record already confirmed by the processor.
pub async fn seed_confirmed_intent(
    store: &Arc<MemoryIntentStore>,
    intent_id: &str,
    wallet: &str,
    amount_matic: f64,
) -> PaymentIntentRecord {
    let record = PaymentIntentRecord::new(
        intent_id,
        wallet,
        amount_matic,
        amount_matic * 0.85,
        Network::Testnet,
    );
    store.create(record).await.unwrap();
    store
        .transition(intent_id, IntentEvent::PaymentConfirmed)
        .await
        .unwrap()
        .record
}

/// Polls the store until the record reaches `state` or a 2 s deadline.
pub async fn wait_for_state(
    store: &Arc<MemoryIntentStore>,
    intent_id: &str,
    state: IntentState,
) -> PaymentIntentRecord {
    for _ in 0..200 {
        if let Some(record) = store.get(intent_id).await.unwrap() {
            if record.state == state {
                return record;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("intent {} never reached {:?}", intent_id, state);
}
