//! Intent Store Module
//!
//! Durable store for payment intent records, keyed by the externally issued
//! payment reference. The store owns every state transition: the webhook
//! gateway and the disbursement engine mutate records only through
//! [`IntentStore::transition`], never directly.
//!
//! ## State machine
//!
//! ```text
//! Pending -> Confirmed -> Disbursing -> Disbursed
//!    |                        |
//!    +-------> Failed <-------+
//! ```
//!
//! Transitions only move forward. An event that targets a state the record
//! is already in or past is a no-op returning the current record - this is
//! the idempotency anchor for replayed webhooks and retried disbursement
//! attempts. [`TransitionOutcome::applied`] tells the caller whether this
//! particular call performed the edge, which is how exactly one task wins
//! the `Confirmed -> Disbursing` claim under concurrent delivery.

mod file;
mod memory;

pub use file::FileIntentStore;
pub use memory::MemoryIntentStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

// ============================================================================
// RECORD TYPES
// ============================================================================

/// Target network for a disbursement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Test network (faucet-grade funds)
    Testnet,
    /// Production network
    Mainnet,
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Testnet => write!(f, "testnet"),
            Network::Mainnet => write!(f, "mainnet"),
        }
    }
}

/// Lifecycle state of a payment intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentState {
    /// Created, waiting for the processor to confirm the card payment
    Pending,
    /// Card payment confirmed, disbursement not yet claimed
    Confirmed,
    /// Disbursement claimed; an on-chain transfer is in flight
    Disbursing,
    /// On-chain transfer confirmed (terminal)
    Disbursed,
    /// Payment or disbursement failed permanently (terminal)
    Failed,
}

impl IntentState {
    /// Position in the forward-only ordering. Both terminal states share
    /// the final rank: neither is "past" the other.
    fn rank(self) -> u8 {
        match self {
            IntentState::Pending => 0,
            IntentState::Confirmed => 1,
            IntentState::Disbursing => 2,
            IntentState::Disbursed | IntentState::Failed => 3,
        }
    }

    /// Whether the record can never transition again.
    pub fn is_terminal(self) -> bool {
        self.rank() == 3
    }
}

impl std::fmt::Display for IntentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IntentState::Pending => "pending",
            IntentState::Confirmed => "confirmed",
            IntentState::Disbursing => "disbursing",
            IntentState::Disbursed => "disbursed",
            IntentState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// One payment intent: a client's request to receive `amount_matic` gas
/// tokens at `wallet_address`, keyed by the processor's payment reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntentRecord {
    /// Externally issued payment reference, globally unique, immutable
    pub intent_id: String,
    /// Validated recipient address, immutable
    pub wallet_address: String,
    /// Requested token amount, immutable, bounds-checked at creation
    pub amount_matic: f64,
    /// Quoted card charge in USD, immutable
    pub amount_usd: f64,
    /// Target network, immutable
    pub network: Network,
    /// Current lifecycle state
    pub state: IntentState,
    /// On-chain transaction hash; set at most once, never reset
    pub tx_hash: Option<String>,
    /// Reason the record reached `Failed`
    pub failure_reason: Option<String>,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// When the card payment was confirmed
    pub confirmed_at: Option<DateTime<Utc>>,
    /// When the record reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,
}

impl PaymentIntentRecord {
    /// Creates a new record in `Pending` state.
    pub fn new(
        intent_id: impl Into<String>,
        wallet_address: impl Into<String>,
        amount_matic: f64,
        amount_usd: f64,
        network: Network,
    ) -> Self {
        Self {
            intent_id: intent_id.into(),
            wallet_address: wallet_address.into(),
            amount_matic,
            amount_usd,
            network,
            state: IntentState::Pending,
            tx_hash: None,
            failure_reason: None,
            created_at: Utc::now(),
            confirmed_at: None,
            completed_at: None,
        }
    }
}

// ============================================================================
// TRANSITION EVENTS
// ============================================================================

/// Events that drive a record through its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentEvent {
    /// Processor confirmed the card payment
    PaymentConfirmed,
    /// Processor reported the card payment as failed
    PaymentFailed(String),
    /// Disbursement worker claimed the record for submission
    DisbursementStarted,
    /// Transfer submitted; hash recorded while confirmation is awaited
    DisbursementSubmitted(String),
    /// Transfer confirmed on-chain
    DisbursementConfirmed(String),
    /// Transfer failed permanently or retries were exhausted
    DisbursementFailed(String),
}

/// Result of a transition call.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    /// The record after the call (unchanged if the event was a no-op)
    pub record: PaymentIntentRecord,
    /// Whether this call performed the transition (false on replay)
    pub applied: bool,
}

/// Errors surfaced by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record exists for the given intent id
    #[error("unknown intent: {0}")]
    UnknownIntent(String),
    /// The backing persistence layer failed
    #[error("store persistence error: {0}")]
    Persistence(String),
}

/// Applies an event to a record in place.
///
/// Returns `true` if the record changed. Events whose source state does not
/// match are no-ops: replays and out-of-order deliveries both land here, and
/// the record never moves backwards.
///
/// # Arguments
///
/// * `record` - Record to mutate
/// * `event` - Event to apply
pub(crate) fn apply_event(record: &mut PaymentIntentRecord, event: &IntentEvent) -> bool {
    match event {
        IntentEvent::PaymentConfirmed => {
            if record.state != IntentState::Pending {
                return false;
            }
            record.state = IntentState::Confirmed;
            record.confirmed_at = Some(Utc::now());
            true
        }
        IntentEvent::PaymentFailed(reason) => {
            if record.state != IntentState::Pending {
                if !record.state.is_terminal() {
                    warn!(
                        intent_id = %record.intent_id,
                        state = %record.state,
                        "Ignoring payment-failed event for a confirmed intent"
                    );
                }
                return false;
            }
            record.state = IntentState::Failed;
            record.failure_reason = Some(reason.clone());
            record.completed_at = Some(Utc::now());
            true
        }
        IntentEvent::DisbursementStarted => {
            if record.state != IntentState::Confirmed {
                return false;
            }
            record.state = IntentState::Disbursing;
            true
        }
        IntentEvent::DisbursementSubmitted(tx_hash) => {
            if record.state != IntentState::Disbursing || record.tx_hash.is_some() {
                return false;
            }
            record.tx_hash = Some(tx_hash.clone());
            true
        }
        IntentEvent::DisbursementConfirmed(tx_hash) => {
            if record.state != IntentState::Disbursing {
                return false;
            }
            record.state = IntentState::Disbursed;
            if record.tx_hash.is_none() {
                record.tx_hash = Some(tx_hash.clone());
            }
            record.completed_at = Some(Utc::now());
            true
        }
        IntentEvent::DisbursementFailed(reason) => {
            if record.state.is_terminal() {
                return false;
            }
            if record.state == IntentState::Pending {
                // A disbursement cannot fail before the payment confirmed.
                warn!(
                    intent_id = %record.intent_id,
                    "Ignoring disbursement-failed event for a pending intent"
                );
                return false;
            }
            record.state = IntentState::Failed;
            record.failure_reason = Some(reason.clone());
            record.completed_at = Some(Utc::now());
            true
        }
    }
}

// ============================================================================
// STORE TRAIT
// ============================================================================

/// Store abstraction the rest of the service depends on.
///
/// All mutating operations on one record are mutually exclusive, and `get`
/// returns a complete snapshot - readers never observe a record
/// mid-transition.
#[async_trait]
pub trait IntentStore: Send + Sync {
    /// Creates a record if no record exists for its `intent_id`.
    ///
    /// A duplicate create returns the existing record unchanged - never a
    /// second allocation.
    ///
    /// # Arguments
    ///
    /// * `record` - Record to insert (normally freshly `Pending`)
    ///
    /// # Returns
    ///
    /// * `Ok(PaymentIntentRecord)` - The stored record (new or pre-existing)
    /// * `Err(StoreError)` - Persistence failure
    async fn create(
        &self,
        record: PaymentIntentRecord,
    ) -> Result<PaymentIntentRecord, StoreError>;

    /// Applies an event to the record for `intent_id`.
    ///
    /// No-op (with `applied = false`) when the record is already in or past
    /// the event's target state.
    ///
    /// # Arguments
    ///
    /// * `intent_id` - External payment reference
    /// * `event` - Event to apply
    ///
    /// # Returns
    ///
    /// * `Ok(TransitionOutcome)` - Record after the call plus whether this
    ///   call performed the edge
    /// * `Err(StoreError::UnknownIntent)` - No record for `intent_id`
    async fn transition(
        &self,
        intent_id: &str,
        event: IntentEvent,
    ) -> Result<TransitionOutcome, StoreError>;

    /// Returns a snapshot of the record for `intent_id`, if any.
    async fn get(&self, intent_id: &str) -> Result<Option<PaymentIntentRecord>, StoreError>;

    /// Returns snapshots of all records currently in `state`.
    ///
    /// Used by the reconciliation pass to find in-flight disbursements and
    /// stranded confirmations.
    async fn records_in_state(
        &self,
        state: IntentState,
    ) -> Result<Vec<PaymentIntentRecord>, StoreError>;
}
