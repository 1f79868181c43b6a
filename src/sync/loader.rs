use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::mindmaps::{Document, SyncStatus};
use crate::sync::coordinator::SyncCoordinator;

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// Served from the local collection without waiting on the network
    Cached(Document),
    /// Not held locally; fetched from the server and inserted
    Fetched(Document),
    /// Not held locally and not obtainable right now
    Unavailable,
}

impl LoadOutcome {
    pub fn document(&self) -> Option<&Document> {
        match self {
            LoadOutcome::Cached(doc) | LoadOutcome::Fetched(doc) => Some(doc),
            LoadOutcome::Unavailable => None,
        }
    }
}

/// Serves documents local-first, refreshing from the server in the background
pub struct CacheLoader {
    coordinator: Arc<SyncCoordinator>,
    refresh_delay: Duration,
}

impl CacheLoader {
    pub fn new(coordinator: Arc<SyncCoordinator>, refresh_delay: Duration) -> Self {
        Self {
            coordinator,
            refresh_delay,
        }
    }

    pub async fn load_with_cache(&self, id: &str) -> LoadOutcome {
        let online = self.coordinator.network().is_online();

        if let Some(doc) = self.coordinator.store().get(id) {
            debug!(document_id = %id, "Serving mindmap from local cache");
            if online && doc.sync_status != SyncStatus::Syncing {
                self.spawn_refresh(id);
            }
            return LoadOutcome::Cached(doc);
        }

        if !online {
            warn!(document_id = %id, "Offline and not cached, mindmap unavailable");
            return LoadOutcome::Unavailable;
        }

        match self.coordinator.load_from_server(id).await {
            Ok(doc) => LoadOutcome::Fetched(doc),
            Err(e) => {
                debug!(document_id = %id, error = %e, "Mindmap could not be fetched");
                LoadOutcome::Unavailable
            }
        }
    }

    // Fire and forget; failures are already recorded by the API layer
    fn spawn_refresh(&self, id: &str) {
        let coordinator = self.coordinator.clone();
        let delay = self.refresh_delay;
        let id = id.to_string();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = coordinator.refresh_if_unchanged(&id).await {
                debug!(document_id = %id, error = %e, "Background refresh failed");
            }
        });
    }
}
