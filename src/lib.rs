//! Onramp Service Library
//!
//! This crate bridges an off-chain card payment to an on-chain gas token
//! transfer: a client requests a quoted amount for a wallet address, pays
//! by card through an external processor, and once the processor confirms
//! the payment the service disburses the tokens from a custodial funding
//! account. The core is the confirmation-to-disbursement pipeline - the
//! intent state machine, the idempotency guarantee under replayed
//! webhooks, and the serialized submission discipline for the shared
//! funding key.

pub mod address;
pub mod api;
pub mod chain;
pub mod config;
pub mod disburse;
pub mod processor;
pub mod store;

// Re-export commonly used types
pub use api::{ApiResponse, ApiServer};
pub use chain::{ChainClient, ChainError, EvmRpcClient, TxReceipt};
pub use config::Config;
pub use disburse::{DisbursementEngine, DisbursementHandle};
pub use processor::{HttpProcessorClient, ProcessorClient, ProcessorError, ProcessorPayment};
pub use store::{
    FileIntentStore, IntentEvent, IntentState, IntentStore, MemoryIntentStore, Network,
    PaymentIntentRecord, StoreError, TransitionOutcome,
};
