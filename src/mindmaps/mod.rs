//! Local mindmap documents: data model, persistence and the in-memory store.

pub mod storage;
pub mod store;
pub mod types;

pub use storage::{SnapshotStore, StorageError, LEGACY_STORAGE_KEY, STORAGE_KEY};
pub use store::{ChangeSender, DocumentStore};
pub use types::*;
