//! JSON-file-backed intent store.
//!
//! Same semantics as the in-memory store, with the whole map snapshotted to
//! a JSON file after every mutation and reloaded at startup. Confirmed but
//! not-yet-disbursed intents therefore survive a restart; the reconciliation
//! pass picks them back up. The snapshot is written to a sibling temp file
//! and renamed into place so a crash mid-write cannot truncate the store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use super::{
    apply_event, IntentEvent, IntentState, IntentStore, PaymentIntentRecord, StoreError,
    TransitionOutcome,
};

/// Durable store snapshotting records to a JSON file.
pub struct FileIntentStore {
    path: PathBuf,
    records: RwLock<HashMap<String, PaymentIntentRecord>>,
}

impl FileIntentStore {
    /// Opens the store at `path`, loading any existing snapshot.
    ///
    /// # Arguments
    ///
    /// * `path` - Snapshot file location; parent directories are created
    ///
    /// # Returns
    ///
    /// * `Ok(FileIntentStore)` - Store ready for use
    /// * `Err(StoreError)` - Snapshot unreadable or unparseable
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Persistence(e.to_string()))?;
            }
        }

        let records = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| StoreError::Persistence(e.to_string()))?;
            let map: HashMap<String, PaymentIntentRecord> = serde_json::from_str(&content)
                .map_err(|e| StoreError::Persistence(format!("corrupt snapshot: {}", e)))?;
            info!(path = %path.display(), records = map.len(), "Loaded intent store snapshot");
            map
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    /// Writes the current map to disk. Called with the write lock held so
    /// snapshots are ordered the same way as the mutations they record.
    fn persist(&self, records: &HashMap<String, PaymentIntentRecord>) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(records)
            .map_err(|e| StoreError::Persistence(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(|e| StoreError::Persistence(e.to_string()))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| StoreError::Persistence(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl IntentStore for FileIntentStore {
    async fn create(
        &self,
        record: PaymentIntentRecord,
    ) -> Result<PaymentIntentRecord, StoreError> {
        let mut records = self.records.write().await;
        if let Some(existing) = records.get(&record.intent_id) {
            return Ok(existing.clone());
        }
        let stored = record.clone();
        records.insert(record.intent_id.clone(), record);
        self.persist(&records)?;
        Ok(stored)
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
        let snapshot = record.clone();
        if applied {
            self.persist(&records)?;
        }
        Ok(TransitionOutcome {
            record: snapshot,
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
