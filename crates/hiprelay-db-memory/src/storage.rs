use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use hiprelay_storage::{FlowFields, FlowRecord, FlowStore, StorageError};

/// In-memory flow record store.
///
/// Each write holds the shard lock for its key while merging, so concurrent
/// writes to the same health id are applied one after another and never lose
/// each other's unrelated fields.
#[derive(Debug, Default)]
pub struct InMemoryFlowStore {
    records: DashMap<String, FlowRecord>,
}

impl InMemoryFlowStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true when no record has been written yet.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl FlowStore for InMemoryFlowStore {
    async fn upsert(
        &self,
        health_id: &str,
        fields: FlowFields,
    ) -> Result<FlowRecord, StorageError> {
        if health_id.is_empty() {
            return Err(StorageError::invalid_record("health id must not be empty"));
        }

        let record = match self.records.entry(health_id.to_string()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().apply(fields);
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                tracing::debug!(health_id, "Creating flow record");
                entry.insert(FlowRecord::new(health_id, fields)).clone()
            }
        };

        Ok(record)
    }

    async fn merge_by_transaction(
        &self,
        transaction_id: &str,
        fields: FlowFields,
    ) -> Result<Option<FlowRecord>, StorageError> {
        // Most recently written match wins, as in the PostgreSQL backend.
        let health_id = self
            .records
            .iter()
            .filter(|entry| entry.transaction_id() == Some(transaction_id))
            .max_by_key(|entry| entry.updated_at)
            .map(|entry| entry.key().clone());

        let Some(health_id) = health_id else {
            return Ok(None);
        };

        Ok(self.records.get_mut(&health_id).map(|mut record| {
            record.apply(fields);
            record.clone()
        }))
    }

    async fn get(&self, health_id: &str) -> Result<Option<FlowRecord>, StorageError> {
        Ok(self.records.get(health_id).map(|r| r.clone()))
    }

    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
