//! The storage trait every flow record backend implements.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::types::{FlowFields, FlowRecord};

/// Persistence contract for flow records.
///
/// Implementations must be thread-safe (`Send + Sync`); one instance is
/// shared by every request task for the lifetime of the process.
///
/// Every write is a field-scoped merge: top-level keys in `fields` overwrite
/// the same keys on the stored document and leave all other keys untouched.
/// Records are never deleted.
#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Inserts the record for `health_id` if absent, otherwise merges
    /// `fields` into it. Returns the record as stored after the write.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidRecord` if `health_id` is empty.
    /// Returns `StorageError::ConnectionError` if the store is unreachable.
    /// Returns `StorageError::OperationFailed` if the write itself fails.
    async fn upsert(&self, health_id: &str, fields: FlowFields)
    -> Result<FlowRecord, StorageError>;

    /// Merges `fields` into the record whose `transactionId` equals
    /// `transaction_id`.
    ///
    /// Returns `None` when no record carries that transaction id; nothing is
    /// created in that case.
    async fn merge_by_transaction(
        &self,
        transaction_id: &str,
        fields: FlowFields,
    ) -> Result<Option<FlowRecord>, StorageError>;

    /// Reads the record for `health_id`.
    async fn get(&self, health_id: &str) -> Result<Option<FlowRecord>, StorageError>;

    /// Checks that the store is reachable.
    async fn ping(&self) -> Result<(), StorageError>;

    /// Releases any pooled resources. Called once during shutdown.
    async fn close(&self) {}
}
