//! In-memory intent store.
//!
//! Default store for development and tests. Records live in a map behind a
//! single `RwLock`; the write lock is the per-record critical section, so
//! two concurrent deliveries of the same event cannot both observe the
//! pre-transition state.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    apply_event, IntentEvent, IntentState, IntentStore, PaymentIntentRecord, StoreError,
    TransitionOutcome,
};

/// Volatile store backed by a `HashMap`.
#[derive(Default)]
pub struct MemoryIntentStore {
    records: RwLock<HashMap<String, PaymentIntentRecord>>,
}

impl MemoryIntentStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IntentStore for MemoryIntentStore {
    async fn create(
        &self,
        record: PaymentIntentRecord,
    ) -> Result<PaymentIntentRecord, StoreError> {
        let mut records = self.records.write().await;
        let stored = records
            .entry(record.intent_id.clone())
            .or_insert(record);
        Ok(stored.clone())
    }

    async fn transition(
        &self,
        intent_id: &str,
        event: IntentEvent,
    ) -> Result<TransitionOutcome, StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(intent_id)
            .ok_or_else(|| StoreError::UnknownIntent(intent_id.to_string()))?;
        let applied = apply_event(record, &event);
        Ok(TransitionOutcome {
            record: record.clone(),
            applied,
        })
    }

    async fn get(&self, intent_id: &str) -> Result<Option<PaymentIntentRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records.get(intent_id).cloned())
    }

    async fn records_in_state(
        &self,
        state: IntentState,
    ) -> Result<Vec<PaymentIntentRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.state == state)
            .cloned()
            .collect())
    }
}
