//! Disbursement Engine
//!
//! Executes the on-chain transfer that fulfills a confirmed intent. Every
//! submission from the funding account flows through one queue drained by a
//! single worker task: the chain requires strictly increasing per-account
//! nonces, so concurrent unordered submission would corrupt or stall the
//! account's transaction stream.
//!
//! Flow per job:
//! 1. Idempotent guard - only `Confirmed` records proceed, and only the
//!    caller whose `Confirmed -> Disbursing` transition is applied keeps
//!    going (replays and double-triggers stop here).
//! 2. Submit a signed transfer, recording the hash as soon as the node
//!    accepts it.
//! 3. Poll for the receipt up to a bounded timeout. Confirmation completes
//!    the record; a timeout leaves it `Disbursing` for the reconciliation
//!    pass - the transaction may still land, so it is never resubmitted.
//!
//! Transient submission errors retry with capped exponential backoff up to
//! a configured attempt ceiling; permanent errors and exhausted retries
//! fail the record with a reason and raise an operator alert.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ethers::types::U256;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::chain::{ChainClient, ChainError, TxReceipt};
use crate::config::Config;
use crate::store::{IntentEvent, IntentState, IntentStore, PaymentIntentRecord};

/// Handle used to enqueue disbursements; cheap to clone.
#[derive(Clone)]
pub struct DisbursementHandle {
    tx: mpsc::Sender<String>,
}

impl DisbursementHandle {
    /// Enqueues a disbursement for `intent_id` and returns immediately.
    ///
    /// The result is observable through the status endpoint, never through
    /// this call. A full queue is logged; the reconciliation pass
    /// re-enqueues any `Confirmed` record that never made it in.
    pub fn disburse(&self, intent_id: &str) {
        if let Err(e) = self.tx.try_send(intent_id.to_string()) {
            warn!(intent_id = %intent_id, "Disbursement queue rejected job: {}", e);
        }
    }
}

/// Engine that serializes and executes funding-account transfers.
pub struct DisbursementEngine {
    /// Intent store (shared with the API server)
    store: Arc<dyn IntentStore>,
    /// Chain client holding the funding key
    chain: Arc<dyn ChainClient>,
    /// Submission attempt ceiling
    max_attempts: u32,
    /// First backoff delay; doubles per attempt
    backoff_base: Duration,
    /// Backoff cap
    backoff_max: Duration,
    /// Bounded confirmation wait
    confirmation_timeout: Duration,
    /// Interval between receipt polls
    receipt_poll_interval: Duration,
}

impl DisbursementEngine {
    /// Starts the engine: spawns the submission worker and the
    /// reconciliation loop, returning the enqueue handle.
    ///
    /// # Arguments
    ///
    /// * `store` - Shared intent store
    /// * `chain` - Chain client for the funding account
    /// * `config` - Service configuration
    ///
    /// # Returns
    ///
    /// Handle for enqueueing disbursements
    pub fn start(
        store: Arc<dyn IntentStore>,
        chain: Arc<dyn ChainClient>,
        config: &Config,
    ) -> DisbursementHandle {
        let (tx, rx) = mpsc::channel(config.disbursement.queue_capacity);
        let handle = DisbursementHandle { tx };

        let engine = Self {
            store: store.clone(),
            chain: chain.clone(),
            max_attempts: config.disbursement.max_attempts,
            backoff_base: Duration::from_millis(config.disbursement.backoff_base_ms),
            backoff_max: Duration::from_millis(config.disbursement.backoff_max_ms),
            confirmation_timeout: Duration::from_millis(config.chain.confirmation_timeout_ms),
            receipt_poll_interval: Duration::from_millis(config.chain.receipt_poll_interval_ms),
        };

        tokio::spawn(engine.run_worker(rx));

        let reconcile_interval =
            Duration::from_millis(config.disbursement.reconcile_interval_ms);
        tokio::spawn(run_reconciler(
            store,
            chain,
            handle.clone(),
            reconcile_interval,
        ));

        handle
    }

    /// Drains the submission queue. One job at a time - this loop is the
    /// funding account's exclusive-submission discipline.
    async fn run_worker(self, mut rx: mpsc::Receiver<String>) {
        info!("Disbursement worker started");

        while let Some(intent_id) = rx.recv().await {
            if let Err(e) = self.process(&intent_id).await {
                error!(intent_id = %intent_id, "Disbursement processing error: {}", e);
            }
        }
    }

    /// Processes one queued disbursement end to end.
    async fn process(&self, intent_id: &str) -> Result<()> {
        let record = match self.store.get(intent_id).await? {
            Some(record) => record,
            None => {
                warn!(intent_id = %intent_id, "Queued disbursement for unknown intent");
                return Ok(());
            }
        };

        if record.state != IntentState::Confirmed {
            debug!(
                intent_id = %intent_id,
                state = %record.state,
                "Skipping disbursement, intent not awaiting one"
            );
            return Ok(());
        }

        // Claim the record. The transition commits before any chain I/O so
        // a crash mid-submission leaves recoverable state, and only the
        // caller whose transition applied proceeds.
        let outcome = self
            .store
            .transition(intent_id, IntentEvent::DisbursementStarted)
            .await?;
        if !outcome.applied {
            debug!(intent_id = %intent_id, "Lost the disbursement claim, skipping");
            return Ok(());
        }
        let record = outcome.record;

        let amount_wei = match matic_to_wei(record.amount_matic) {
            Ok(wei) => wei,
            Err(e) => {
                self.fail(intent_id, format!("unconvertible amount: {}", e))
                    .await?;
                return Ok(());
            }
        };

        self.submit_with_retries(&record, amount_wei).await
    }

    /// Attempt loop: submit, then wait for confirmation.
    async fn submit_with_retries(
        &self,
        record: &PaymentIntentRecord,
        amount_wei: U256,
    ) -> Result<()> {
        let intent_id = record.intent_id.as_str();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            match self.submit_once(record, amount_wei).await {
                Ok(tx_hash) => {
                    self.store
                        .transition(
                            intent_id,
                            IntentEvent::DisbursementSubmitted(tx_hash.clone()),
                        )
                        .await?;
                    info!(intent_id = %intent_id, tx_hash = %tx_hash, "Transfer submitted");

                    match self.await_receipt(&tx_hash).await {
                        Some(receipt) if receipt.succeeded() => {
                            self.store
                                .transition(
                                    intent_id,
                                    IntentEvent::DisbursementConfirmed(tx_hash.clone()),
                                )
                                .await?;
                            info!(intent_id = %intent_id, tx_hash = %tx_hash, "Disbursement confirmed");
                        }
                        Some(_) => {
                            self.fail(intent_id, "transaction reverted on-chain".to_string())
                                .await?;
                        }
                        None => {
                            // The transaction may still land; never resubmit
                            // after a timed-out wait.
                            warn!(
                                intent_id = %intent_id,
                                tx_hash = %tx_hash,
                                "Confirmation wait timed out, leaving record for reconciliation"
                            );
                        }
                    }
                    return Ok(());
                }
                Err(ChainError::Permanent(reason)) => {
                    self.fail(intent_id, reason).await?;
                    return Ok(());
                }
                Err(ChainError::Transient(reason)) => {
                    if attempt >= self.max_attempts {
                        self.fail(
                            intent_id,
                            format!("retries exhausted after {} attempts: {}", attempt, reason),
                        )
                        .await?;
                        return Ok(());
                    }
                    let backoff = self
                        .backoff_base
                        .saturating_mul(1 << (attempt - 1).min(16))
                        .min(self.backoff_max);
                    warn!(
                        intent_id = %intent_id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "Transient submission error, retrying: {}",
                        reason
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// One nonce fetch + signed submission.
    async fn submit_once(
        &self,
        record: &PaymentIntentRecord,
        amount_wei: U256,
    ) -> Result<String, ChainError> {
        let nonce = self.chain.pending_nonce().await?;
        self.chain
            .submit_transfer(&record.wallet_address, amount_wei, nonce)
            .await
    }

    /// Polls for the receipt until found or the bounded wait expires.
    async fn await_receipt(&self, tx_hash: &str) -> Option<TxReceipt> {
        let deadline = Instant::now() + self.confirmation_timeout;

        loop {
            match self.chain.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => return Some(receipt),
                Ok(None) => {}
                Err(e) => {
                    debug!(tx_hash = %tx_hash, "Receipt poll failed: {}", e);
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(self.receipt_poll_interval).await;
        }
    }

    /// Records a permanent failure and raises the operator alert.
    async fn fail(&self, intent_id: &str, reason: String) -> Result<()> {
        error!(
            intent_id = %intent_id,
            reason = %reason,
            "OPERATOR ALERT: disbursement failed permanently"
        );
        self.store
            .transition(intent_id, IntentEvent::DisbursementFailed(reason))
            .await
            .context("Failed to record disbursement failure")?;
        Ok(())
    }
}

/// Background reconciliation pass.
///
/// Completes `Disbursing` records whose confirmation wait timed out (their
/// hash is already recorded) and re-enqueues `Confirmed` records that never
/// reached the queue - which is also the restart recovery path for the
/// durable store. `Disbursing` records without a hash are only logged:
/// their submission outcome is unknown and needs an operator.
async fn run_reconciler(
    store: Arc<dyn IntentStore>,
    chain: Arc<dyn ChainClient>,
    handle: DisbursementHandle,
    interval: Duration,
) {
    info!("Disbursement reconciler started");
    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately and doubles as restart recovery.
    loop {
        ticker.tick().await;

        match store.records_in_state(IntentState::Disbursing).await {
            Ok(records) => {
                for record in records {
                    let tx_hash = match &record.tx_hash {
                        Some(hash) => hash.clone(),
                        None => {
                            warn!(
                                intent_id = %record.intent_id,
                                "Disbursing record without a transaction hash, needs operator review"
                            );
                            continue;
                        }
                    };
                    match chain.transaction_receipt(&tx_hash).await {
                        Ok(Some(receipt)) if receipt.succeeded() => {
                            info!(intent_id = %record.intent_id, tx_hash = %tx_hash, "Reconciled confirmed transfer");
                            if let Err(e) = store
                                .transition(
                                    &record.intent_id,
                                    IntentEvent::DisbursementConfirmed(tx_hash),
                                )
                                .await
                            {
                                error!(intent_id = %record.intent_id, "Reconcile transition failed: {}", e);
                            }
                        }
                        Ok(Some(_)) => {
                            error!(
                                intent_id = %record.intent_id,
                                tx_hash = %tx_hash,
                                "OPERATOR ALERT: reconciled transfer reverted on-chain"
                            );
                            if let Err(e) = store
                                .transition(
                                    &record.intent_id,
                                    IntentEvent::DisbursementFailed(
                                        "transaction reverted on-chain".to_string(),
                                    ),
                                )
                                .await
                            {
                                error!(intent_id = %record.intent_id, "Reconcile transition failed: {}", e);
                            }
                        }
                        Ok(None) => {
                            debug!(intent_id = %record.intent_id, tx_hash = %tx_hash, "Transfer still unmined");
                        }
                        Err(e) => {
                            debug!(intent_id = %record.intent_id, "Reconcile receipt poll failed: {}", e);
                        }
                    }
                }
            }
            Err(e) => error!("Reconciler failed to scan disbursing records: {}", e),
        }

        match store.records_in_state(IntentState::Confirmed).await {
            Ok(records) => {
                for record in records {
                    debug!(intent_id = %record.intent_id, "Re-enqueueing confirmed intent");
                    handle.disburse(&record.intent_id);
                }
            }
            Err(e) => error!("Reconciler failed to scan confirmed records: {}", e),
        }
    }
}

/// Converts a token amount to wei.
fn matic_to_wei(amount_matic: f64) -> Result<U256> {
    ethers::utils::parse_ether(amount_matic)
        .map_err(|e| anyhow::anyhow!("cannot convert {} to wei: {}", amount_matic, e))
}
