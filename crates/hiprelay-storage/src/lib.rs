//! # hiprelay-storage
//!
//! Storage abstraction for HIP relay flow records.
//!
//! A flow record is a single JSON document per health identifier. Each step of
//! a KYC/linking flow merges its own top-level fields into that document, so
//! a record grows as the caller walks through mode discovery, link-token
//! generation, authentication and care-context linking.
//!
//! This crate only defines the contract. Backends live in
//! `hiprelay-db-postgres` and `hiprelay-db-memory`.
//!
//! ## Example
//!
//! ```ignore
//! use hiprelay_storage::{FlowFields, FlowStore, StorageError};
//!
//! async fn remember_request(store: &dyn FlowStore, health_id: &str) -> Result<(), StorageError> {
//!     let mut fields = FlowFields::new();
//!     fields.insert("fetch_requestId".into(), "3f1c...".into());
//!     store.upsert(health_id, fields).await?;
//!     Ok(())
//! }
//! ```

mod error;
mod traits;
mod types;

pub use error::{ErrorCategory, StorageError};
pub use traits::FlowStore;
pub use types::{FlowFields, FlowRecord, HEALTH_ID_FIELD, TRANSACTION_ID_FIELD, merge_fields};

/// Type alias for a shared flow store trait object.
pub type DynFlowStore = std::sync::Arc<dyn FlowStore>;
