use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::ErrorReporter;
use crate::mindmaps::storage::{SnapshotStore, STORAGE_KEY};
use crate::mindmaps::types::{
    display_name, Document, DocumentCollection, DocumentContent, SyncStatus, UNTITLED_DOCUMENT_NAME,
};

/// Sender notified with a document id after each content edit
pub type ChangeSender = mpsc::UnboundedSender<String>;

/// Authoritative in-memory document collection, persisted after every change.
///
/// Every mutation is applied under one lock and then written through to the
/// [`SnapshotStore`]. Persistence failures are recorded as `storage` errors
/// and never reach the caller; the in-memory state stays authoritative.
pub struct DocumentStore {
    state: Mutex<DocumentCollection>,
    persistence: Arc<dyn SnapshotStore>,
    reporter: Arc<ErrorReporter>,
    changes: Mutex<Option<ChangeSender>>,
}

impl DocumentStore {
    /// Load the persisted collection.
    ///
    /// Any stored collection wins, even an empty one. Only when nothing is
    /// stored does this migrate the legacy single scene, then fall back to a
    /// single default document.
    pub fn load(persistence: Arc<dyn SnapshotStore>, reporter: Arc<ErrorReporter>) -> Self {
        let stored = match persistence.load() {
            Ok(stored) => stored,
            Err(e) => {
                reporter.report("Failed to read stored mindmaps", &e, Some(json!({ "key": STORAGE_KEY })));
                None
            }
        };

        let (mut collection, needs_save) = match stored {
            Some(collection) => {
                debug!(count = collection.len(), "Loaded stored mindmaps");
                (collection, false)
            }
            _ => match persistence.take_legacy() {
                Ok(Some(scene)) => {
                    info!("Migrated legacy mindmap scene");
                    (DocumentCollection::with_document(scene.into_document()), true)
                }
                Ok(None) => (DocumentCollection::with_document(Document::new("")), true),
                Err(e) => {
                    reporter.report("Failed to migrate legacy mindmap", &e, None);
                    (DocumentCollection::with_document(Document::new("")), true)
                }
            },
        };

        let repaired = collection.repair_active();

        let store = Self::with_collection(collection, persistence, reporter);
        if needs_save || repaired {
            let snapshot = store.snapshot();
            store.persist(&snapshot);
        }
        store
    }

    /// Wrap an existing collection without touching persistence
    pub fn with_collection(
        collection: DocumentCollection,
        persistence: Arc<dyn SnapshotStore>,
        reporter: Arc<ErrorReporter>,
    ) -> Self {
        Self {
            state: Mutex::new(collection),
            persistence,
            reporter,
            changes: Mutex::new(None),
        }
    }

    /// Route content-change notifications to `sender`
    pub fn set_change_sender(&self, sender: ChangeSender) {
        *lock(&self.changes) = Some(sender);
    }

    /// Create a new document, make it active and return its id
    pub fn create(&self, name: &str) -> String {
        let doc = Document::new(name);
        let id = doc.id.clone();

        self.mutate(|collection| {
            collection.documents.push(doc);
            collection.active_document_id = Some(id.clone());
            true
        });

        info!(document_id = %id, "Created mindmap");
        id
    }

    /// Remove a document. Unknown ids are a no-op.
    pub fn delete(&self, id: &str) -> Option<Document> {
        let mut removed = None;
        self.mutate(|collection| {
            removed = collection.remove(id);
            removed.is_some()
        });

        if removed.is_some() {
            info!(document_id = %id, "Deleted mindmap");
        }
        removed
    }

    /// Rename a document. Blank names become "Untitled".
    pub fn rename(&self, id: &str, name: &str) -> bool {
        let name = display_name(name, UNTITLED_DOCUMENT_NAME);
        self.mutate(|collection| match collection.get_mut(id) {
            Some(doc) => {
                doc.name = name;
                doc.touch();
                true
            }
            None => false,
        })
    }

    pub fn set_active(&self, id: &str) -> bool {
        self.mutate(|collection| collection.set_active(id))
    }

    /// Replace a document's content and mark it dirty.
    ///
    /// Collaborator presence is stripped before storing. Each successful
    /// call notifies the change sender, if one is attached.
    pub fn update_content(&self, id: &str, content: DocumentContent) -> bool {
        let content = content.without_collaborators();
        let updated = self.mutate(|collection| match collection.get_mut(id) {
            Some(doc) => {
                doc.content = content;
                doc.sync_status = SyncStatus::Dirty;
                doc.touch();
                true
            }
            None => false,
        });

        if updated {
            self.notify_change(id);
        }
        updated
    }

    pub fn set_sync_status(&self, id: &str, status: SyncStatus) -> bool {
        self.mutate(|collection| match collection.get_mut(id) {
            Some(doc) if doc.sync_status != status => {
                doc.sync_status = status;
                true
            }
            _ => false,
        })
    }

    /// Flag a document for the next sync pass without touching its content
    pub fn mark_dirty(&self, id: &str) -> bool {
        self.set_sync_status(id, SyncStatus::Dirty)
    }

    pub fn active_or_fallback(&self) -> Option<Document> {
        self.read(|collection| collection.active_or_fallback().cloned())
    }

    pub fn get(&self, id: &str) -> Option<Document> {
        self.read(|collection| collection.get(id).cloned())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read(|collection| collection.contains(id))
    }

    pub fn documents(&self) -> Vec<Document> {
        self.read(|collection| collection.documents.clone())
    }

    pub fn active_id(&self) -> Option<String> {
        self.read(|collection| collection.active_document_id.clone())
    }

    pub fn snapshot(&self) -> DocumentCollection {
        self.read(|collection| collection.clone())
    }

    /// Ids of documents in `status`
    pub fn ids_with_status(&self, status: SyncStatus) -> Vec<String> {
        self.read(|collection| collection.ids_with_status(status))
    }

    pub fn has_dirty(&self) -> bool {
        self.read(|collection| {
            collection
                .documents
                .iter()
                .any(|doc| doc.sync_status == SyncStatus::Dirty)
        })
    }

    /// Apply `f` atomically; persist once if it reports a change
    pub(crate) fn mutate<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut DocumentCollection) -> bool,
    {
        let mut collection = lock(&self.state);
        let changed = f(&mut collection);
        if changed {
            self.persist(&collection);
        }
        changed
    }

    pub(crate) fn read<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&DocumentCollection) -> R,
    {
        f(&lock(&self.state))
    }

    fn persist(&self, collection: &DocumentCollection) {
        if let Err(e) = self.persistence.save(collection) {
            self.reporter.report(
                "Failed to save mindmaps",
                &e,
                Some(json!({ "key": STORAGE_KEY, "documents": collection.len() })),
            );
        }
    }

    fn notify_change(&self, id: &str) {
        let changes = lock(&self.changes);
        if let Some(sender) = changes.as_ref() {
            if sender.send(id.to_string()).is_err() {
                warn!(document_id = %id, "Sync scheduler is gone, change not scheduled");
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
