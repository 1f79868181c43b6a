use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use crate::errors::ErrorReporter;
use crate::mindmaps::Document;
use crate::retry::RetryPolicy;
use crate::sync::error::SyncError;
use crate::sync::transport::Transport;
use crate::sync::types::{BatchSyncRequest, BatchSyncResponse, CreateRequest, ServerDocument, UpdateRequest};

const MINDMAPS_PATH: &str = "mindmaps";
const BATCH_SYNC_PATH: &str = "mindmaps/batch-sync";

/// Typed client for the mindmap REST endpoints.
///
/// Reads, updates and batch sync go through the retry policy; creation and
/// deletion are attempted once. Final failures are recorded with the
/// reporter before being returned.
pub struct MindmapApi {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    reporter: Arc<ErrorReporter>,
}

impl MindmapApi {
    pub fn new(transport: Arc<dyn Transport>, retry: RetryPolicy, reporter: Arc<ErrorReporter>) -> Self {
        Self {
            transport,
            retry,
            reporter,
        }
    }

    pub async fn list_documents(&self) -> Result<Vec<Document>, SyncError> {
        debug!("Listing mindmaps");

        self.retry
            .run_classified(&self.reporter, json!({ "operation": "list" }), || async {
                let value = self.transport.request(Method::GET, MINDMAPS_PATH, None).await?;
                if !value.is_array() {
                    return Err(SyncError::Malformed(format!(
                        "Expected a mindmap list, got {}",
                        json_type(&value)
                    )));
                }
                let docs: Vec<ServerDocument> = decode(value)?;
                Ok(docs.into_iter().map(ServerDocument::into_document).collect())
            })
            .await
    }

    pub async fn get_document(&self, id: &str) -> Result<Document, SyncError> {
        debug!(document_id = %id, "Fetching mindmap");
        let path = document_path(id);

        self.retry
            .run_classified(&self.reporter, json!({ "operation": "get", "documentId": id }), || async {
                let value = self.transport.request(Method::GET, &path, None).await?;
                let doc: ServerDocument = decode(value)?;
                Ok(doc.into_document())
            })
            .await
    }

    pub async fn create_document(&self, request: &CreateRequest) -> Result<Document, SyncError> {
        let result: Result<Document, SyncError> = async {
            let body = serde_json::to_value(request).map_err(|e| SyncError::Malformed(e.to_string()))?;
            let value = self.transport.request(Method::POST, MINDMAPS_PATH, Some(body)).await?;
            let doc: ServerDocument = decode(value)?;
            Ok(doc.into_document())
        }
        .await;

        if let Err(e) = &result {
            self.reporter
                .report("Failed to create mindmap", e, Some(json!({ "operation": "create" })));
        }
        result
    }

    /// Update with optimistic concurrency; a 409 becomes [`SyncError::VersionConflict`]
    pub async fn update_document(&self, id: &str, request: &UpdateRequest) -> Result<Document, SyncError> {
        let path = document_path(id);
        let body = serde_json::to_value(request).map_err(|e| SyncError::Malformed(e.to_string()))?;

        self.retry
            .run_classified(&self.reporter, json!({ "operation": "update", "documentId": id }), || async {
                let value = match self.transport.request(Method::PUT, &path, Some(body.clone())).await {
                    Ok(value) => value,
                    Err(e) if e.is_conflict() => return Err(SyncError::VersionConflict { id: id.to_string() }),
                    Err(e) => return Err(e.into()),
                };
                let doc: ServerDocument = decode(value)?;
                Ok(doc.into_document())
            })
            .await
    }

    pub async fn delete_document(&self, id: &str) -> Result<(), SyncError> {
        let path = document_path(id);
        let result = self.transport.request(Method::DELETE, &path, None).await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                let err = SyncError::from(e);
                self.reporter.report(
                    "Failed to delete mindmap",
                    &err,
                    Some(json!({ "operation": "delete", "documentId": id })),
                );
                Err(err)
            }
        }
    }

    /// Submit several operations in one request
    pub async fn batch_sync(&self, request: &BatchSyncRequest) -> Result<BatchSyncResponse, SyncError> {
        let body = serde_json::to_value(request).map_err(|e| SyncError::Malformed(e.to_string()))?;
        let context = json!({ "operation": "batch_sync", "operations": request.operations.len() });

        self.retry
            .run_classified(&self.reporter, context, || async {
                let value = self.transport.request(Method::POST, BATCH_SYNC_PATH, Some(body.clone())).await?;
                decode(value)
            })
            .await
    }
}

fn document_path(id: &str) -> String {
    format!("{}/{}", MINDMAPS_PATH, id)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, SyncError> {
    serde_json::from_value(value).map_err(|e| SyncError::Malformed(e.to_string()))
}
