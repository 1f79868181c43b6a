use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mindmaps::{now_millis, Document, DocumentContent, SyncStatus};
use crate::sync::error::looks_like_conflict;

/// A document as the server stores it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerDocument {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub content_json: DocumentContent,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl ServerDocument {
    /// Client form of a server document: synced, stamped with the current time
    pub fn into_document(self) -> Document {
        Document {
            id: self.id,
            name: self.name,
            created_at: self.created_at.timestamp_millis(),
            updated_at: self.updated_at.timestamp_millis(),
            content: self.content_json.without_collaborators(),
            sync_status: SyncStatus::Synced,
            version: self.version,
            last_sync_time: now_millis(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateRequest {
    pub name: String,
    pub content_json: DocumentContent,
}

impl CreateRequest {
    pub fn from_document(doc: &Document) -> Self {
        Self {
            name: doc.name.clone(),
            content_json: doc.content.clone().without_collaborators(),
        }
    }
}

/// Update payload. `version` is the version the client last saw.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateRequest {
    pub name: String,
    pub content_json: DocumentContent,
    pub version: u64,
}

impl UpdateRequest {
    pub fn from_document(doc: &Document) -> Self {
        Self {
            name: doc.name.clone(),
            content_json: doc.content.clone().without_collaborators(),
            version: doc.version,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncOperation {
    #[serde(rename = "type")]
    pub op_type: OperationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<UpdateRequest>,
}

impl SyncOperation {
    pub fn update(doc: &Document) -> Self {
        Self {
            op_type: OperationType::Update,
            id: Some(doc.id.clone()),
            temp_id: None,
            data: Some(UpdateRequest::from_document(doc)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchSyncRequest {
    pub operations: Vec<SyncOperation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchSyncResponse {
    #[serde(default)]
    pub results: Vec<BatchResult>,
}

/// Outcome of one batch operation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchResult {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub op_type: Option<OperationType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<String>,
    pub id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine-readable failure code; a number or a string depending on server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ServerDocument>,
}

impl BatchResult {
    /// Whether a failed result is a version conflict.
    ///
    /// The code decides when present; the error text is a fallback.
    pub fn is_conflict(&self) -> bool {
        if self.success {
            return false;
        }

        match &self.code {
            Some(Value::Number(n)) => n.as_u64() == Some(409),
            Some(Value::String(s)) => s == "409" || looks_like_conflict(s),
            _ => self.error.as_deref().map(looks_like_conflict).unwrap_or(false),
        }
    }

    pub fn reason(&self) -> &str {
        self.error.as_deref().unwrap_or("Unknown error")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConflictChoice {
    Local,
    Server,
}

/// Why a sync pass did nothing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Offline,
    NothingDirty,
    AllInFlight,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailedItem {
    pub id: String,
    pub reason: String,
    pub conflict: bool,
}

/// Outcome of one sync pass
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncReport {
    pub synced: Vec<String>,
    pub failed: Vec<FailedItem>,
    /// Documents edited while their batch was in flight; rescheduled
    pub resubmitted: Vec<String>,
    pub skipped: Option<SkipReason>,
}

impl SyncReport {
    pub fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Default::default()
        }
    }

    pub fn conflicts(&self) -> impl Iterator<Item = &str> {
        self.failed
            .iter()
            .filter(|item| item.conflict)
            .map(|item| item.id.as_str())
    }

    pub fn fail(&mut self, id: &str, reason: impl Into<String>, conflict: bool) {
        self.failed.push(FailedItem {
            id: id.to_string(),
            reason: reason.into(),
            conflict,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn server_json() -> Value {
        json!({
            "id": "doc-1",
            "name": "Roadmap",
            "content_json": {
                "elements": [{ "id": "n1" }],
                "appState": { "zoom": 2, "collaborators": { "peer": {} } }
            },
            "created_at": "2024-03-01T10:00:00Z",
            "updated_at": "2024-03-02T10:00:00.500Z",
            "version": 4
        })
    }

    #[test]
    fn test_server_document_conversion() {
        let server: ServerDocument = serde_json::from_value(server_json()).unwrap();
        let doc = server.into_document();

        assert_eq!(doc.id, "doc-1");
        assert_eq!(doc.version, 4);
        assert_eq!(doc.sync_status, SyncStatus::Synced);
        assert_eq!(doc.created_at, 1_709_287_200_000);
        assert_eq!(doc.updated_at, 1_709_373_600_500);
        assert!(doc.last_sync_time > 0);
        assert!(!doc.content.app_state.as_ref().unwrap().contains_key("collaborators"));

        let request = UpdateRequest::from_document(&doc);
        assert_eq!(request.name, "Roadmap");
        assert_eq!(request.version, 4);
        assert_eq!(request.content_json, doc.content);
    }

    #[test]
    fn test_client_document_survives_server_round_trip() {
        let mut doc = Document::new("Quarterly plan");
        doc.version = 7;
        doc.content = serde_json::from_value(json!({
            "elements": [{ "id": "n1", "text": "Goals" }, { "id": "n2" }],
            "appState": { "zoom": 1.5, "collaborators": { "peer": {} } },
            "files": { "img1": { "mimeType": "image/png", "dataURL": "data:image/png;base64,AA" } }
        }))
        .unwrap();

        let request = UpdateRequest::from_document(&doc);
        let stored = ServerDocument {
            id: doc.id.clone(),
            name: request.name.clone(),
            content_json: serde_json::from_value(serde_json::to_value(&request.content_json).unwrap()).unwrap(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            version: request.version,
        };
        let back = stored.into_document();

        assert_eq!(back.name, "Quarterly plan");
        assert_eq!(back.version, 7);
        assert_eq!(back.content, doc.content.clone().without_collaborators());
        assert_eq!(back.content.extra["files"]["img1"]["mimeType"], "image/png");
        assert_eq!(back.content.app_state.as_ref().unwrap()["zoom"], 1.5);
    }

    #[test]
    fn test_update_request_strips_collaborators() {
        let mut doc = Document::new("Draft");
        doc.content.app_state = json!({ "collaborators": { "x": 1 }, "grid": 10 }).as_object().cloned();

        let body = serde_json::to_value(SyncOperation::update(&doc)).unwrap();
        assert_eq!(body["type"], "update");
        assert_eq!(body["id"], doc.id.as_str());
        assert_eq!(body["data"]["version"], 1);
        assert!(body["data"]["content_json"]["appState"].get("collaborators").is_none());
        assert!(body.get("temp_id").is_none());
    }

    #[test]
    fn test_batch_result_conflict_detection() {
        let result = |code: Option<Value>, error: Option<&str>| BatchResult {
            op_type: Some(OperationType::Update),
            temp_id: None,
            id: "a".to_string(),
            success: false,
            error: error.map(str::to_string),
            code,
            data: None,
        };

        assert!(result(Some(json!(409)), None).is_conflict());
        assert!(result(Some(json!("VERSION_CONFLICT")), None).is_conflict());
        assert!(!result(Some(json!(422)), Some("Conflict")).is_conflict());
        assert!(result(None, Some("Version conflict: server has 5")).is_conflict());
        assert!(!result(None, Some("Validation failed")).is_conflict());
        assert!(!result(None, None).is_conflict());

        let mut ok = result(Some(json!(409)), None);
        ok.success = true;
        assert!(!ok.is_conflict());
    }

    #[test]
    fn test_batch_response_tolerates_missing_fields() {
        let response: BatchSyncResponse = serde_json::from_value(json!({
            "results": [{ "id": "a", "success": false, "error": "boom" }]
        }))
        .unwrap();

        assert_eq!(response.results[0].reason(), "boom");
        assert!(response.results[0].data.is_none());

        let empty: BatchSyncResponse = serde_json::from_value(json!({})).unwrap();
        assert!(empty.results.is_empty());
    }
}
