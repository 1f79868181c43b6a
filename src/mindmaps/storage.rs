use thiserror::Error;

use crate::database::{Database, DbError};
use crate::errors::{Classify, ErrorKind};
use crate::mindmaps::types::{DocumentCollection, LegacyScene};

/// Key holding the serialized document collection
pub const STORAGE_KEY: &str = "workflow_mindmaps_v1";
/// Key written by the single-scene releases
pub const LEGACY_STORAGE_KEY: &str = "workflow_mindmap_v1";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(#[from] DbError),
    #[error("Stored snapshot is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl Classify for StorageError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Storage
    }
}

/// Durable home of the document collection
pub trait SnapshotStore: Send + Sync {
    /// The last saved collection, if any
    fn load(&self) -> Result<Option<DocumentCollection>, StorageError>;

    fn save(&self, snapshot: &DocumentCollection) -> Result<(), StorageError>;

    /// Read and remove the legacy single scene.
    ///
    /// Values that are not JSON objects are left in place and yield `None`.
    fn take_legacy(&self) -> Result<Option<LegacyScene>, StorageError>;
}

impl SnapshotStore for Database {
    fn load(&self) -> Result<Option<DocumentCollection>, StorageError> {
        match self.get_item(STORAGE_KEY)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn save(&self, snapshot: &DocumentCollection) -> Result<(), StorageError> {
        let raw = serde_json::to_string(snapshot)?;
        self.set_item(STORAGE_KEY, &raw)?;
        Ok(())
    }

    fn take_legacy(&self) -> Result<Option<LegacyScene>, StorageError> {
        let Some(raw) = self.get_item(LEGACY_STORAGE_KEY)? else {
            return Ok(None);
        };

        let value: serde_json::Value = serde_json::from_str(&raw)?;
        if !value.is_object() {
            return Ok(None);
        }

        let scene: LegacyScene = serde_json::from_value(value)?;
        self.remove_item(LEGACY_STORAGE_KEY)?;
        Ok(Some(scene))
    }
}
