use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::{ErrorKind, ErrorReporter};
use crate::mindmaps::{Document, DocumentStore, SyncStatus};
use crate::sync::api::MindmapApi;
use crate::sync::error::SyncError;
use crate::sync::network::NetworkMonitor;
use crate::sync::types::{BatchSyncRequest, BatchSyncResponse, ConflictChoice, SkipReason, SyncOperation, SyncReport};

/// A dirty document taken into a sync pass
struct Claim {
    id: String,
    /// `updated_at` at the moment the batch was built
    updated_at: i64,
}

struct ItemFailure {
    id: String,
    reason: String,
    conflict: bool,
}

/// Reconciles dirty documents with the server.
///
/// Owns the debounce timer and the connectivity subscription as background
/// tasks started by [`SyncCoordinator::start`] and cancelled by
/// [`SyncCoordinator::shutdown`]. A document already in a pass is excluded
/// from any overlapping pass.
pub struct SyncCoordinator {
    store: Arc<DocumentStore>,
    api: MindmapApi,
    network: Arc<NetworkMonitor>,
    reporter: Arc<ErrorReporter>,
    debounce: Duration,
    in_flight: Mutex<HashSet<String>>,
    conflicts: Mutex<HashSet<String>>,
    trigger: mpsc::UnboundedSender<String>,
    trigger_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncCoordinator {
    /// Build the coordinator and attach it to the store's change feed
    pub fn new(
        store: Arc<DocumentStore>,
        api: MindmapApi,
        network: Arc<NetworkMonitor>,
        reporter: Arc<ErrorReporter>,
        debounce: Duration,
    ) -> Arc<Self> {
        let (trigger, trigger_rx) = mpsc::unbounded_channel();
        store.set_change_sender(trigger.clone());

        Arc::new(Self {
            store,
            api,
            network,
            reporter,
            debounce,
            in_flight: Mutex::new(HashSet::new()),
            conflicts: Mutex::new(HashSet::new()),
            trigger,
            trigger_rx: Mutex::new(Some(trigger_rx)),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the debounce and connectivity tasks. Later calls are no-ops.
    pub fn start(self: &Arc<Self>) {
        let Some(changes) = lock(&self.trigger_rx).take() else {
            debug!("Sync coordinator already started");
            return;
        };

        let weak = Arc::downgrade(self);
        let debounce = tokio::spawn(debounce_loop(weak.clone(), changes, self.debounce));
        let connectivity = tokio::spawn(connectivity_loop(weak, self.network.subscribe()));
        lock(&self.tasks).extend([debounce, connectivity]);

        info!(debounce_ms = self.debounce.as_millis() as u64, "Sync coordinator started");
    }

    /// Cancel the background tasks. In-flight passes are not interrupted.
    pub fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = lock(&self.tasks).drain(..).collect();
        if tasks.is_empty() {
            return;
        }
        for task in tasks {
            task.abort();
        }
        info!("Sync coordinator stopped");
    }

    /// Ask for a debounced pass on behalf of `id`
    pub fn schedule_sync(&self, id: &str) {
        if self.trigger.send(id.to_string()).is_err() {
            warn!(document_id = %id, "Debounce task is gone, sync not scheduled");
        }
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    pub fn network(&self) -> &Arc<NetworkMonitor> {
        &self.network
    }

    /// Ids whose last sync attempt hit a version conflict, sorted
    pub fn conflicts(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.conflicts).iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Push every dirty document to the server in one batch
    pub async fn sync_with_server(&self) -> SyncReport {
        if !self.network.is_online() {
            debug!("Offline, skipping sync");
            return SyncReport::skipped(SkipReason::Offline);
        }

        let (claims, operations) = match self.claim_dirty() {
            Ok(batch) => batch,
            Err(reason) => {
                debug!(?reason, "Nothing to sync");
                return SyncReport::skipped(reason);
            }
        };

        info!(count = claims.len(), "Syncing mindmaps");
        let request = BatchSyncRequest { operations };

        let report = match self.api.batch_sync(&request).await {
            Ok(response) => self.apply_results(&claims, response),
            Err(e) => self.revert_batch(&claims, &e),
        };

        {
            let mut in_flight = lock(&self.in_flight);
            for claim in &claims {
                in_flight.remove(&claim.id);
            }
        }

        for id in &report.resubmitted {
            self.schedule_sync(id);
        }

        info!(
            synced = report.synced.len(),
            failed = report.failed.len(),
            resubmitted = report.resubmitted.len(),
            "Sync pass finished"
        );
        report
    }

    /// Mark dirty documents `syncing` and build their operations
    fn claim_dirty(&self) -> Result<(Vec<Claim>, Vec<SyncOperation>), SkipReason> {
        let mut in_flight = lock(&self.in_flight);
        let mut claims = Vec::new();
        let mut operations = Vec::new();
        let mut busy = false;

        self.store.mutate(|collection| {
            for doc in collection.documents.iter_mut() {
                if doc.sync_status != SyncStatus::Dirty {
                    continue;
                }
                if in_flight.contains(&doc.id) {
                    busy = true;
                    continue;
                }
                doc.sync_status = SyncStatus::Syncing;
                operations.push(SyncOperation::update(doc));
                claims.push(Claim {
                    id: doc.id.clone(),
                    updated_at: doc.updated_at,
                });
            }
            !claims.is_empty()
        });

        if claims.is_empty() {
            return Err(if busy { SkipReason::AllInFlight } else { SkipReason::NothingDirty });
        }

        in_flight.extend(claims.iter().map(|claim| claim.id.clone()));
        Ok((claims, operations))
    }

    /// Whole-batch failure: every claimed document goes back to `dirty`.
    /// The retry layer has already recorded the error.
    fn revert_batch(&self, claims: &[Claim], err: &SyncError) -> SyncReport {
        warn!(count = claims.len(), error = %err, "Batch sync failed, documents left dirty");
        let mut report = SyncReport::default();

        self.store.mutate(|collection| {
            for claim in claims {
                if let Some(doc) = collection.get_mut(&claim.id) {
                    doc.sync_status = SyncStatus::Dirty;
                }
                report.fail(&claim.id, err.to_string(), false);
            }
            true
        });

        report
    }

    /// Apply per-item results, matched by id, then persist once
    fn apply_results(&self, claims: &[Claim], response: BatchSyncResponse) -> SyncReport {
        let mut pending: HashMap<&str, i64> = claims
            .iter()
            .map(|claim| (claim.id.as_str(), claim.updated_at))
            .collect();
        let mut report = SyncReport::default();
        let mut failures = Vec::new();

        self.store.mutate(|collection| {
            for result in response.results {
                let Some(sent_at) = pending.remove(result.id.as_str()) else {
                    warn!(document_id = %result.id, "Ignoring result for a document outside this batch");
                    continue;
                };
                let Some(local) = collection.get_mut(&result.id) else {
                    debug!(document_id = %result.id, "Document deleted while syncing");
                    continue;
                };
                let conflict = result.is_conflict();
                let reason = result.reason().to_string();

                match (result.success, result.data) {
                    (true, Some(server)) => {
                        let fresh = server.into_document();
                        if local.updated_at > sent_at {
                            // Edited mid-flight: take the new version, keep the edit
                            local.version = fresh.version;
                            local.created_at = fresh.created_at;
                            local.last_sync_time = fresh.last_sync_time;
                            local.sync_status = SyncStatus::Dirty;
                            report.resubmitted.push(result.id);
                        } else {
                            *local = fresh;
                            report.synced.push(result.id);
                        }
                    }
                    (true, None) => {
                        local.sync_status = SyncStatus::Dirty;
                        failures.push(ItemFailure {
                            id: result.id,
                            reason: "Success result carried no document".to_string(),
                            conflict: false,
                        });
                    }
                    (false, _) => {
                        local.sync_status = SyncStatus::Dirty;
                        failures.push(ItemFailure {
                            id: result.id,
                            reason,
                            conflict,
                        });
                    }
                }
            }

            for (id, _) in pending.drain() {
                if let Some(doc) = collection.get_mut(id) {
                    doc.sync_status = SyncStatus::Dirty;
                    failures.push(ItemFailure {
                        id: id.to_string(),
                        reason: "No result returned for document".to_string(),
                        conflict: false,
                    });
                }
            }
            true
        });

        {
            let mut conflicts = lock(&self.conflicts);
            for id in report.synced.iter().chain(report.resubmitted.iter()) {
                conflicts.remove(id);
            }
            for failure in failures.iter().filter(|failure| failure.conflict) {
                conflicts.insert(failure.id.clone());
            }
        }

        for failure in failures {
            let message = if failure.conflict {
                format!("Version conflict syncing mindmap {}", failure.id)
            } else {
                format!("Failed to sync mindmap {}", failure.id)
            };
            self.reporter.log_error(
                ErrorKind::Sync,
                message,
                Some(&failure.reason),
                Some(json!({
                    "documentId": failure.id,
                    "reason": failure.reason,
                    "conflict": failure.conflict,
                })),
            );
            report.fail(&failure.id, failure.reason, failure.conflict);
        }

        report
    }

    /// Fetch one document and overwrite (or insert) the local copy.
    ///
    /// On failure the document's previous status is restored.
    pub async fn load_from_server(&self, id: &str) -> Result<Document, SyncError> {
        if !self.network.is_online() {
            warn!(document_id = %id, "Offline, cannot load mindmap from server");
            return Err(SyncError::Offline);
        }

        let prior = self.store.get(id).map(|doc| doc.sync_status);
        self.store.set_sync_status(id, SyncStatus::Syncing);

        match self.api.get_document(id).await {
            Ok(doc) => {
                let stored = doc.clone();
                self.store.mutate(|collection| {
                    collection.upsert(stored);
                    true
                });
                lock(&self.conflicts).remove(id);
                debug!(document_id = %id, version = doc.version, "Loaded mindmap from server");
                Ok(doc)
            }
            Err(e) => {
                if let Some(prior) = prior {
                    self.store.mutate(|collection| match collection.get_mut(id) {
                        Some(doc) if doc.sync_status == SyncStatus::Syncing => {
                            doc.sync_status = prior;
                            true
                        }
                        _ => false,
                    });
                }
                Err(e)
            }
        }
    }

    /// Refresh a synced document from the server if nobody touched it meanwhile.
    ///
    /// Returns whether the local copy was replaced. Documents with local
    /// changes are never fetched or overwritten.
    pub async fn refresh_if_unchanged(&self, id: &str) -> Result<bool, SyncError> {
        let Some(before) = self.store.get(id) else {
            return Ok(false);
        };
        if before.sync_status != SyncStatus::Synced || !self.network.is_online() {
            return Ok(false);
        }

        let fresh = self.api.get_document(id).await?;

        let replaced = self.store.mutate(|collection| match collection.get_mut(id) {
            Some(local)
                if local.sync_status == SyncStatus::Synced
                    && local.updated_at == before.updated_at
                    && (local.version != fresh.version || local.name != fresh.name || local.content != fresh.content) =>
            {
                *local = fresh;
                true
            }
            _ => false,
        });

        if replaced {
            debug!(document_id = %id, "Background refresh picked up a newer server copy");
        }
        Ok(replaced)
    }

    /// Fetch the server list and merge it into the local collection
    pub async fn preload_from_server(&self) -> Result<usize, SyncError> {
        if !self.network.is_online() {
            debug!("Offline, skipping mindmap list refresh");
            return Err(SyncError::Offline);
        }

        let docs = self.api.list_documents().await?;
        let count = docs.len();
        self.store.mutate(|collection| {
            collection.merge_server_documents(docs);
            true
        });

        info!(count, "Refreshed mindmap list from server");
        Ok(count)
    }

    /// Settle a version conflict.
    ///
    /// `Server` discards local changes and refetches; `Local` marks the
    /// document dirty and pushes it again right away. Unknown ids are a no-op.
    pub async fn resolve_conflict(&self, id: &str, choice: ConflictChoice) -> Result<(), SyncError> {
        if !self.store.contains(id) {
            debug!(document_id = %id, "Conflict resolution for unknown document ignored");
            return Ok(());
        }

        info!(document_id = %id, ?choice, "Resolving conflict");
        match choice {
            ConflictChoice::Server => self.load_from_server(id).await.map(|_| ()),
            ConflictChoice::Local => {
                lock(&self.conflicts).remove(id);
                self.store.mark_dirty(id);
                let report = self.sync_with_server().await;
                if report.conflicts().any(|conflicted| conflicted == id) {
                    return Err(SyncError::VersionConflict { id: id.to_string() });
                }
                Ok(())
            }
        }
    }

    /// Delete locally, then on the server if it ever saw the document.
    ///
    /// Remote failures are recorded, never raised.
    pub async fn delete_document(&self, id: &str) -> Option<Document> {
        let removed = self.store.delete(id)?;
        lock(&self.conflicts).remove(id);

        if removed.was_synced() && self.network.is_online() {
            if let Err(e) = self.api.delete_document(id).await {
                warn!(document_id = %id, error = %e, "Remote delete failed");
            }
        }
        Some(removed)
    }

    /// Connectivity came back: push what is dirty, then refresh the list
    pub async fn on_reconnect(&self) -> SyncReport {
        info!("Connection restored, reconciling mindmaps");
        let report = self.sync_with_server().await;
        if let Err(e) = self.preload_from_server().await {
            debug!(error = %e, "List refresh after reconnect failed");
        }
        report
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }
}

/// Run one pass after `quiet` has passed with no further changes
async fn debounce_loop(
    coordinator: Weak<SyncCoordinator>,
    mut changes: mpsc::UnboundedReceiver<String>,
    quiet: Duration,
) {
    while let Some(id) = changes.recv().await {
        match coordinator.upgrade() {
            Some(c) if c.network.is_online() => {}
            Some(_) => {
                debug!(document_id = %id, "Offline, change left for reconnect");
                continue;
            }
            None => return,
        }

        debug!(document_id = %id, "Sync scheduled");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(quiet) => break,
                next = changes.recv() => {
                    if next.is_none() {
                        return;
                    }
                }
            }
        }

        let Some(c) = coordinator.upgrade() else {
            return;
        };
        c.sync_with_server().await;
    }
}

async fn connectivity_loop(coordinator: Weak<SyncCoordinator>, mut online: watch::Receiver<bool>) {
    let mut was_online = *online.borrow_and_update();

    while online.changed().await.is_ok() {
        let now_online = *online.borrow_and_update();
        if now_online && !was_online {
            let Some(c) = coordinator.upgrade() else {
                return;
            };
            c.on_reconnect().await;
            // The channel keeps only the latest value, so a drop and recovery
            // during the pass shows up as an unseen change
            if online.has_changed().unwrap_or(false) {
                was_online = false;
                continue;
            }
        }
        was_online = now_online;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mindmaps::SnapshotStore;
    use crate::sync::error::TransportError;
    use crate::sync::http_client::unwrap_envelope;
    use crate::sync::testing::{accept_all, elements, server_doc_json, Harness, ScriptedTransport};
    use reqwest::Method;
    use serde_json::Value;

    fn dirty_first(h: &Harness, label: &str) -> String {
        let id = h.first_id();
        h.store.update_content(&id, elements(label));
        id
    }

    fn reject_all(reason: &'static str) -> impl Fn(&Method, &str, Option<&Value>) -> Result<Value, TransportError> {
        move |_, _, body| {
            let results: Vec<Value> = body
                .and_then(|b| b["operations"].as_array().cloned())
                .unwrap_or_default()
                .iter()
                .map(|op| json!({ "type": "update", "id": op["id"], "success": false, "error": reason }))
                .collect();
            Ok(json!({ "results": results }))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounced_edit_syncs_once() {
        let h = Harness::new(ScriptedTransport::accepting());
        h.coordinator.start();
        let id = dirty_first(&h, "a");

        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert!(h.transport.batch_bodies().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let bodies = h.transport.batch_bodies();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["operations"][0]["id"], id.as_str());

        let doc = h.store.get(&id).unwrap();
        assert_eq!(doc.sync_status, SyncStatus::Synced);
        assert_eq!(doc.version, 2);
        assert!(doc.last_sync_time > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_edits_coalesce() {
        let h = Harness::new(ScriptedTransport::accepting());
        h.coordinator.start();
        let id = dirty_first(&h, "a");

        tokio::time::sleep(Duration::from_millis(500)).await;
        h.store.update_content(&id, elements("b"));

        // The quiet period restarts at the second edit
        tokio::time::sleep(Duration::from_millis(1800)).await;
        assert!(h.transport.batch_bodies().is_empty());

        tokio::time::sleep(Duration::from_secs(3)).await;
        let bodies = h.transport.batch_bodies();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["operations"][0]["data"]["content_json"]["elements"][0]["id"], "b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_reverts_to_dirty() {
        let h = Harness::new(ScriptedTransport::failing(TransportError::network("Failed to fetch")));
        let id = dirty_first(&h, "a");

        let report = h.coordinator.sync_with_server().await;

        assert_eq!(h.store.get(&id).unwrap().sync_status, SyncStatus::Dirty);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(h.transport.batch_bodies().len(), 4);
        assert_eq!(h.reporter.by_kind(ErrorKind::Network).len(), 1);
        assert_eq!(h.reporter.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_item_conflict_then_resolve_with_server() {
        let h = Harness::new(ScriptedTransport::new(reject_all("HTTP 409 Conflict: stale version")));
        let id = dirty_first(&h, "mine");

        let report = h.coordinator.sync_with_server().await;
        assert_eq!(report.conflicts().collect::<Vec<_>>(), vec![id.as_str()]);
        assert_eq!(h.coordinator.conflicts(), vec![id.clone()]);
        assert_eq!(h.store.get(&id).unwrap().sync_status, SyncStatus::Dirty);

        let records = h.reporter.by_kind(ErrorKind::Sync);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].context_str("documentId"), Some(id.as_str()));
        assert_eq!(records[0].context.as_ref().unwrap()["conflict"], true);

        let server_id = id.clone();
        h.transport.set_handler(move |method, path, _| {
            if *method == Method::GET && path == format!("mindmaps/{}", server_id) {
                Ok(server_doc_json(&server_id, "Server copy", 7))
            } else {
                Err(TransportError::status(500, "unexpected"))
            }
        });

        h.coordinator.resolve_conflict(&id, ConflictChoice::Server).await.unwrap();

        let doc = h.store.get(&id).unwrap();
        assert_eq!(doc.name, "Server copy");
        assert_eq!(doc.version, 7);
        assert_eq!(doc.sync_status, SyncStatus::Synced);
        assert!(h.coordinator.conflicts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_with_local_resubmits() {
        let h = Harness::new(ScriptedTransport::new(reject_all("version conflict")));
        let id = dirty_first(&h, "mine");
        h.coordinator.sync_with_server().await;
        assert_eq!(h.coordinator.conflicts().len(), 1);

        h.transport.set_handler(|_, _, body| Ok(accept_all(body.unwrap())));
        h.coordinator.resolve_conflict(&id, ConflictChoice::Local).await.unwrap();

        let doc = h.store.get(&id).unwrap();
        assert_eq!(doc.sync_status, SyncStatus::Synced);
        assert_eq!(doc.content.elements[0]["id"], "mine");
        assert!(h.coordinator.conflicts().is_empty());
        assert_eq!(h.transport.batch_bodies().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_local_reports_repeat_conflict() {
        let h = Harness::new(ScriptedTransport::new(reject_all("409")));
        let id = dirty_first(&h, "mine");

        let err = h
            .coordinator
            .resolve_conflict(&id, ConflictChoice::Local)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(h.coordinator.resolve_conflict("missing", ConflictChoice::Server).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_plain_item_failure_is_not_a_conflict() {
        let h = Harness::new(ScriptedTransport::new(reject_all("Validation failed")));
        let id = dirty_first(&h, "a");

        let report = h.coordinator.sync_with_server().await;
        assert_eq!(report.failed[0].reason, "Validation failed");
        assert!(!report.failed[0].conflict);
        assert!(h.coordinator.conflicts().is_empty());
        assert_eq!(h.store.get(&id).unwrap().sync_status, SyncStatus::Dirty);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_and_foreign_results() {
        let h = Harness::new(ScriptedTransport::new(|_, _, _| {
            Ok(json!({ "results": [{ "id": "someone-else", "success": true, "data": server_doc_json("someone-else", "x", 3) }] }))
        }));
        let id = dirty_first(&h, "a");

        let report = h.coordinator.sync_with_server().await;
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].id, id);
        assert_eq!(h.store.get(&id).unwrap().sync_status, SyncStatus::Dirty);
        assert!(!h.store.contains("someone-else"));
        assert_eq!(h.reporter.by_kind(ErrorKind::Sync).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skips_when_offline_or_clean() {
        let h = Harness::new(ScriptedTransport::accepting());
        assert_eq!(h.coordinator.sync_with_server().await.skipped, Some(SkipReason::NothingDirty));

        dirty_first(&h, "a");
        h.network.set_online(false);
        assert_eq!(h.coordinator.sync_with_server().await.skipped, Some(SkipReason::Offline));
        assert!(h.transport.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_pass_skips_in_flight_documents() {
        let h = Harness::new(ScriptedTransport::accepting().with_latency(Duration::from_secs(1)));
        let id = dirty_first(&h, "a");

        let (first, second) = tokio::join!(h.coordinator.sync_with_server(), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            h.store.mark_dirty(&id);
            h.coordinator.sync_with_server().await
        });

        assert_eq!(second.skipped, Some(SkipReason::AllInFlight));
        assert_eq!(first.synced, vec![id.clone()]);
        assert_eq!(h.transport.batch_bodies().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_during_flight_is_kept() {
        let h = Harness::new(ScriptedTransport::accepting().with_latency(Duration::from_secs(1)));
        let id = dirty_first(&h, "v1");

        let coordinator = h.coordinator.clone();
        let pass = tokio::spawn(async move { coordinator.sync_with_server().await });

        tokio::time::sleep(Duration::from_millis(500)).await;
        h.store.update_content(&id, elements("v2"));

        let report = pass.await.unwrap();
        assert_eq!(report.resubmitted, vec![id.clone()]);

        let doc = h.store.get(&id).unwrap();
        assert_eq!(doc.sync_status, SyncStatus::Dirty);
        assert_eq!(doc.version, 2);
        assert_eq!(doc.content.elements[0]["id"], "v2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_edits_sync_on_reconnect() {
        let h = Harness::new(ScriptedTransport::accepting());
        let listed = h.first_id();
        h.transport.set_handler(move |method, path, body| {
            if *method == Method::GET && path == "mindmaps" {
                Ok(json!([server_doc_json(&listed, "Listed", 2)]))
            } else {
                Ok(accept_all(body.unwrap_or(&Value::Null)))
            }
        });
        h.coordinator.start();
        h.network.set_online(false);

        let id = dirty_first(&h, "offline edit");
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(h.transport.requests().is_empty());

        h.network.set_online(true);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(h.transport.batch_bodies().len(), 1);
        assert_eq!(h.transport.count("mindmaps"), 1);

        let doc = h.store.get(&id).unwrap();
        assert_eq!(doc.sync_status, SyncStatus::Synced);
        assert_eq!(doc.version, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_during_reconnect_pass_runs_again() {
        let h = Harness::new(
            ScriptedTransport::new(|method, path, body| {
                if *method == Method::POST && path == "mindmaps/batch-sync" {
                    Ok(accept_all(body.unwrap_or(&Value::Null)))
                } else {
                    Err(TransportError::status(404, "Not found"))
                }
            })
            .with_latency(Duration::from_millis(100)),
        );
        h.coordinator.start();
        h.network.set_online(false);

        let first = dirty_first(&h, "before");
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.network.set_online(true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.transport.batch_bodies().len(), 1);

        // Drop and recover while the first pass is still waiting on the server
        h.network.set_online(false);
        let second = h.store.create("Second");
        h.store.update_content(&second, elements("during"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.network.set_online(true);

        tokio::time::sleep(Duration::from_millis(1000)).await;

        assert_eq!(h.transport.batch_bodies().len(), 2);
        assert_eq!(h.store.get(&first).unwrap().sync_status, SyncStatus::Synced);
        assert_eq!(h.store.get(&second).unwrap().sync_status, SyncStatus::Synced);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_auto_sync() {
        let h = Harness::new(ScriptedTransport::accepting());
        h.coordinator.start();
        h.coordinator.shutdown();

        dirty_first(&h, "a");
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(h.transport.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_preload_merges_server_list() {
        let h = Harness::new(ScriptedTransport::new(|_, path, _| match path {
            "mindmaps" => Ok(json!([server_doc_json("remote-1", "Remote", 4)])),
            _ => Err(TransportError::status(404, "Not found")),
        }));
        let local = h.first_id();

        assert_eq!(h.coordinator.preload_from_server().await.unwrap(), 1);

        let remote = h.store.get("remote-1").unwrap();
        assert_eq!(remote.version, 4);
        assert_eq!(remote.sync_status, SyncStatus::Synced);
        assert!(h.store.contains(&local));
        assert_eq!(h.store.active_id(), Some(local));
    }

    #[tokio::test(start_paused = true)]
    async fn test_paged_list_keeps_synced_documents() {
        let h = Harness::new(ScriptedTransport::accepting());
        let id = dirty_first(&h, "a");
        h.coordinator.sync_with_server().await;
        assert_eq!(h.store.get(&id).unwrap().sync_status, SyncStatus::Synced);

        let listed = id.clone();
        h.transport.set_handler(move |_, _, _| {
            unwrap_envelope(json!({
                "code": 0,
                "data": { "items": [server_doc_json(&listed, "Listed", 2)], "total": 1 }
            }))
        });
        assert_eq!(h.coordinator.preload_from_server().await.unwrap(), 1);
        assert!(h.store.contains(&id));

        // An unrecognised list shape must not read as an empty server
        h.transport.set_handler(|_, _, _| Ok(json!({ "total": 0 })));
        assert!(h.coordinator.preload_from_server().await.is_err());
        assert!(h.store.contains(&id));
        assert!(h.db.load().unwrap().unwrap().contains(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_from_server_failure_restores_status() {
        let h = Harness::new(ScriptedTransport::failing(TransportError::status(404, "Not found")));
        let id = h.first_id();

        assert!(h.coordinator.load_from_server(&id).await.is_err());
        assert_eq!(h.store.get(&id).unwrap().sync_status, SyncStatus::Offline);

        h.network.set_online(false);
        assert!(matches!(h.coordinator.load_from_server(&id).await, Err(SyncError::Offline)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_document_remote_only_when_synced() {
        let h = Harness::new(ScriptedTransport::accepting());
        let local_only = h.first_id();
        assert!(h.coordinator.delete_document(&local_only).await.is_some());
        assert!(h.transport.requests().is_empty());

        let synced = h.store.create("synced");
        h.store.update_content(&synced, elements("x"));
        h.coordinator.sync_with_server().await;

        h.coordinator.delete_document(&synced).await;
        let requests = h.transport.requests();
        let last = requests.last().unwrap();
        assert_eq!(last.method, Method::DELETE);
        assert_eq!(last.path, format!("mindmaps/{}", synced));
        assert!(h.coordinator.delete_document("missing").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_skips_documents_with_local_changes() {
        let h = Harness::new(ScriptedTransport::accepting());
        let id = dirty_first(&h, "a");

        assert!(!h.coordinator.refresh_if_unchanged(&id).await.unwrap());
        assert!(h.transport.requests().is_empty());
    }
}
