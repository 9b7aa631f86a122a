//! In-memory flow record store for the HIP relay.
//!
//! This crate provides an in-memory implementation of the `FlowStore` trait
//! from `hiprelay-storage`, backed by a `DashMap` keyed by health identifier.
//! It is used for `storage.backend = "memory"` deployments and in tests.
//!
//! # Example
//!
//! ```ignore
//! use hiprelay_db_memory::InMemoryFlowStore;
//! use hiprelay_storage::FlowStore;
//!
//! let store = InMemoryFlowStore::new();
//! store.upsert("user@sbx", fields).await?;
//! ```

mod storage;

pub use hiprelay_storage::{FlowFields, FlowRecord, FlowStore, StorageError};
pub use storage::InMemoryFlowStore;

/// Creates a new in-memory store behind the shared trait object type.
pub fn create_flow_store() -> hiprelay_storage::DynFlowStore {
    std::sync::Arc::new(InMemoryFlowStore::new())
}
