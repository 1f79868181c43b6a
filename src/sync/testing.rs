//! Scripted transport and fixtures shared by the sync tests.

use futures::future::BoxFuture;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::database::Database;
use crate::errors::ErrorReporter;
use crate::mindmaps::{DocumentContent, DocumentStore};
use crate::retry::RetryPolicy;
use crate::sync::api::MindmapApi;
use crate::sync::coordinator::SyncCoordinator;
use crate::sync::error::TransportError;
use crate::sync::network::NetworkMonitor;
use crate::sync::transport::Transport;

type Handler = dyn Fn(&Method, &str, Option<&Value>) -> Result<Value, TransportError> + Send + Sync;

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

/// Transport that answers from a closure and records every request
pub(crate) struct ScriptedTransport {
    handler: Mutex<Box<Handler>>,
    requests: Mutex<Vec<RecordedRequest>>,
    latency: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Method, &str, Option<&Value>) -> Result<Value, TransportError> + Send + Sync + 'static,
    {
        Self {
            handler: Mutex::new(Box::new(handler)),
            requests: Mutex::new(Vec::new()),
            latency: None,
        }
    }

    /// Delay every response by `latency` (virtual time in paused tests)
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn failing(err: TransportError) -> Self {
        Self::new(move |_, _, _| Err(err.clone()))
    }

    /// Echo every batch operation back as a success at `version + 1`
    pub fn accepting() -> Self {
        Self::new(|method, path, body| respond_ok(method, path, body))
    }

    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn(&Method, &str, Option<&Value>) -> Result<Value, TransportError> + Send + Sync + 'static,
    {
        *self.handler.lock().unwrap() = Box::new(handler);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|request| request.path == path)
            .count()
    }

    pub fn batch_bodies(&self) -> Vec<Value> {
        self.requests()
            .into_iter()
            .filter(|request| request.path == "mindmaps/batch-sync")
            .filter_map(|request| request.body)
            .collect()
    }
}

impl Transport for ScriptedTransport {
    fn request<'a>(
        &'a self,
        method: Method,
        path: &'a str,
        body: Option<Value>,
    ) -> BoxFuture<'a, Result<Value, TransportError>> {
        let result = (self.handler.lock().unwrap())(&method, path, body.as_ref());
        self.requests.lock().unwrap().push(RecordedRequest {
            method,
            path: path.to_string(),
            body,
        });
        let latency = self.latency;
        Box::pin(async move {
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            result
        })
    }
}

pub(crate) fn server_doc_json(id: &str, name: &str, version: u64) -> Value {
    json!({
        "id": id,
        "name": name,
        "content_json": { "elements": [] },
        "created_at": "2024-01-01T00:00:00Z",
        "updated_at": "2024-01-02T00:00:00Z",
        "version": version
    })
}

/// Successful batch result for every operation in `body`
pub(crate) fn accept_all(body: &Value) -> Value {
    let results: Vec<Value> = body["operations"]
        .as_array()
        .map(|ops| ops.iter().map(accept_operation).collect())
        .unwrap_or_default();
    json!({ "results": results })
}

pub(crate) fn accept_operation(op: &Value) -> Value {
    let id = op["id"].as_str().unwrap_or_default();
    let data = &op["data"];
    let version = data["version"].as_u64().unwrap_or(1) + 1;
    json!({
        "type": "update",
        "id": id,
        "success": true,
        "data": {
            "id": id,
            "name": data["name"],
            "content_json": data["content_json"],
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-02T00:00:00Z",
            "version": version
        }
    })
}

fn respond_ok(method: &Method, path: &str, body: Option<&Value>) -> Result<Value, TransportError> {
    if *method == Method::POST && path == "mindmaps/batch-sync" {
        return Ok(accept_all(body.unwrap_or(&Value::Null)));
    }
    if *method == Method::GET && path == "mindmaps" {
        return Ok(json!([]));
    }
    if *method == Method::DELETE {
        return Ok(Value::Null);
    }
    Err(TransportError::status(404, "Not found"))
}

pub(crate) fn elements(label: &str) -> DocumentContent {
    DocumentContent::new(json!([{ "id": label }]), None)
}

/// Fully wired coordinator over an in-memory database
pub(crate) struct Harness {
    pub db: Arc<Database>,
    pub reporter: Arc<ErrorReporter>,
    pub store: Arc<DocumentStore>,
    pub network: Arc<NetworkMonitor>,
    pub transport: Arc<ScriptedTransport>,
    pub coordinator: Arc<SyncCoordinator>,
}

impl Harness {
    pub fn new(transport: ScriptedTransport) -> Self {
        let db = Database::open_in_memory().unwrap();
        db.create_local_storage_table().unwrap();
        let db = Arc::new(db);

        let reporter = Arc::new(ErrorReporter::new());
        let store = Arc::new(DocumentStore::load(db.clone(), reporter.clone()));
        let network = Arc::new(NetworkMonitor::new(true));
        let transport = Arc::new(transport);
        let api = MindmapApi::new(transport.clone(), RetryPolicy::network(), reporter.clone());
        let coordinator = SyncCoordinator::new(
            store.clone(),
            api,
            network.clone(),
            reporter.clone(),
            Duration::from_secs(2),
        );

        Self {
            db,
            reporter,
            store,
            network,
            transport,
            coordinator,
        }
    }

    /// Id of the document created on first start
    pub fn first_id(&self) -> String {
        self.store.documents()[0].id.clone()
    }
}
