use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// Name given to documents created with a blank name
pub const DEFAULT_DOCUMENT_NAME: &str = "New Mindmap";
/// Name used when a document is renamed to a blank string
pub const UNTITLED_DOCUMENT_NAME: &str = "Untitled";
/// Name given to the document migrated from legacy storage
pub const MIGRATED_DOCUMENT_NAME: &str = "Migrated Mindmap";

/// Live-collaborator presence inside the drawing surface's app state.
/// Ephemeral: never persisted, never sent.
const COLLABORATORS_KEY: &str = "collaborators";

/// Current time in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Reconciliation state of a document
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Synced,
    Syncing,
    Dirty,
    Conflict,
    /// Never reconciled with the server
    #[default]
    Offline,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Dirty => "dirty",
            SyncStatus::Conflict => "conflict",
            SyncStatus::Offline => "offline",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "synced" => SyncStatus::Synced,
            "syncing" => SyncStatus::Syncing,
            "dirty" => SyncStatus::Dirty,
            "conflict" => SyncStatus::Conflict,
            _ => SyncStatus::Offline,
        }
    }

    /// Anything other than `synced` may hold changes the server has not seen
    pub fn has_local_changes(&self) -> bool {
        !matches!(self, SyncStatus::Synced)
    }
}

/// Opaque drawing-surface payload. `elements` and `appState` are named;
/// every other top-level key (`files`, ...) is carried through untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentContent {
    #[serde(default = "empty_elements")]
    pub elements: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_state: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn empty_elements() -> Value {
    Value::Array(Vec::new())
}

impl Default for DocumentContent {
    fn default() -> Self {
        Self {
            elements: empty_elements(),
            app_state: None,
            extra: Map::new(),
        }
    }
}

impl DocumentContent {
    pub fn new(elements: Value, app_state: Option<Map<String, Value>>) -> Self {
        Self {
            elements,
            app_state,
            extra: Map::new(),
        }
        .without_collaborators()
    }

    /// Remove collaborator presence from the app state
    pub fn strip_collaborators(&mut self) {
        if let Some(app_state) = self.app_state.as_mut() {
            app_state.remove(COLLABORATORS_KEY);
        }
    }

    pub fn without_collaborators(mut self) -> Self {
        self.strip_collaborators();
        self
    }
}

fn initial_version() -> u64 {
    1
}

/// A mindmap document as held by the client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub name: String,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, alias = "data")]
    pub content: DocumentContent,
    #[serde(default)]
    pub sync_status: SyncStatus,
    /// Server-owned optimistic concurrency token
    #[serde(default = "initial_version")]
    pub version: u64,
    #[serde(default)]
    pub last_sync_time: i64,
}

impl Document {
    /// A fresh, never-synced document. Blank names get the default label.
    pub fn new(name: &str) -> Self {
        let now = now_millis();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: display_name(name, DEFAULT_DOCUMENT_NAME),
            created_at: now,
            updated_at: now,
            content: DocumentContent::default(),
            sync_status: SyncStatus::Offline,
            version: initial_version(),
            last_sync_time: 0,
        }
    }

    /// Advance `updated_at`, strictly increasing even within one millisecond
    pub fn touch(&mut self) {
        self.updated_at = now_millis().max(self.updated_at + 1);
    }

    /// Whether the server has ever acknowledged this document
    pub fn was_synced(&self) -> bool {
        self.last_sync_time > 0
    }
}

/// `name` unless it is blank, then `fallback`
pub fn display_name(name: &str, fallback: &str) -> String {
    if name.trim().is_empty() {
        fallback.to_string()
    } else {
        name.to_string()
    }
}

/// Single-scene format written by older releases
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyScene {
    #[serde(default)]
    pub elements: Option<Value>,
    #[serde(default)]
    pub app_state: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LegacyScene {
    pub fn into_document(self) -> Document {
        let elements = match self.elements {
            Some(Value::Array(items)) => Value::Array(items),
            _ => empty_elements(),
        };

        let mut doc = Document::new(MIGRATED_DOCUMENT_NAME);
        doc.content = DocumentContent::new(elements, self.app_state);
        doc.content.extra = self.extra;
        doc
    }
}

/// All documents plus the active selection; the persisted unit
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentCollection {
    #[serde(default)]
    pub documents: Vec<Document>,
    /// Reference, not ownership: may briefly point at a removed id
    #[serde(default)]
    pub active_document_id: Option<String>,
}

impl DocumentCollection {
    pub fn with_document(doc: Document) -> Self {
        let active = Some(doc.id.clone());
        Self {
            documents: vec![doc],
            active_document_id: active,
        }
    }

    pub fn get(&self, id: &str) -> Option<&Document> {
        self.documents.iter().find(|doc| doc.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Document> {
        self.documents.iter_mut().find(|doc| doc.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Replace the document with the same id, or append it
    pub fn upsert(&mut self, doc: Document) {
        match self.get_mut(&doc.id) {
            Some(existing) => *existing = doc,
            None => self.documents.push(doc),
        }
    }

    /// Remove a document, moving the active selection off it if needed
    pub fn remove(&mut self, id: &str) -> Option<Document> {
        let index = self.documents.iter().position(|doc| doc.id == id)?;
        let removed = self.documents.remove(index);

        if self.active_document_id.as_deref() == Some(id) {
            self.active_document_id = self.documents.first().map(|doc| doc.id.clone());
        }

        Some(removed)
    }

    /// Select `id` if it exists. Returns false when it does not.
    pub fn set_active(&mut self, id: &str) -> bool {
        if !self.contains(id) {
            return false;
        }
        self.active_document_id = Some(id.to_string());
        true
    }

    /// The active document if it still exists, else the first one
    pub fn active_or_fallback(&self) -> Option<&Document> {
        self.active_document_id
            .as_deref()
            .and_then(|id| self.get(id))
            .or_else(|| self.documents.first())
    }

    /// Point a dangling active id at a real document. Returns true if changed.
    pub fn repair_active(&mut self) -> bool {
        let valid = self
            .active_document_id
            .as_deref()
            .map(|id| self.contains(id))
            .unwrap_or(false);

        if valid || (self.active_document_id.is_none() && self.documents.is_empty()) {
            return false;
        }

        self.active_document_id = self.documents.first().map(|doc| doc.id.clone());
        true
    }

    pub fn ids_with_status(&self, status: SyncStatus) -> Vec<String> {
        self.documents
            .iter()
            .filter(|doc| doc.sync_status == status)
            .map(|doc| doc.id.clone())
            .collect()
    }

    /// Fold a full server listing into the local collection.
    ///
    /// Server copies replace local documents that hold no local changes;
    /// documents with local changes are kept as they are. Synced documents
    /// the server no longer lists were deleted remotely and are dropped.
    pub fn merge_server_documents(&mut self, server_docs: Vec<Document>) {
        let server_ids: HashSet<&str> = server_docs.iter().map(|doc| doc.id.as_str()).collect();
        self.documents
            .retain(|doc| server_ids.contains(doc.id.as_str()) || doc.sync_status.has_local_changes());

        for server_doc in server_docs {
            match self.get_mut(&server_doc.id) {
                Some(local) if local.sync_status.has_local_changes() => {}
                Some(local) => *local = server_doc,
                None => self.documents.push(server_doc),
            }
        }

        self.repair_active();
    }
}
