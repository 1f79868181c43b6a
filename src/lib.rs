pub mod config;
pub mod database;
pub mod errors;
pub mod mindmaps;
pub mod retry;
pub mod sync;

use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::SyncConfig;
use database::{Database, DbError};
use errors::ErrorReporter;
use mindmaps::DocumentStore;
use retry::RetryPolicy;
use sync::{CacheLoader, HttpTransport, MindmapApi, NetworkMonitor, SyncCoordinator, Transport, TransportError};

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Everything a consuming view needs, wired together once at startup
pub struct AppState {
    pub db: Arc<Database>,
    pub config: SyncConfig,
    pub reporter: Arc<ErrorReporter>,
    pub store: Arc<DocumentStore>,
    pub network: Arc<NetworkMonitor>,
    pub coordinator: Arc<SyncCoordinator>,
    pub loader: CacheLoader,
}

impl AppState {
    /// Build the state over the HTTP transport. Must run inside a tokio runtime.
    pub fn start(db: Arc<Database>, config: SyncConfig) -> Result<Self, StartupError> {
        let transport = HttpTransport::new(
            &config.api_base_url,
            config.auth_token.clone(),
            config.request_timeout(),
        )?;
        Self::with_transport(db, config, Arc::new(transport), true)
    }

    /// Build the state over any transport and start the background tasks
    pub fn with_transport(
        db: Arc<Database>,
        config: SyncConfig,
        transport: Arc<dyn Transport>,
        online: bool,
    ) -> Result<Self, StartupError> {
        db.create_local_storage_table()?;

        let reporter = Arc::new(ErrorReporter::new());
        let store = Arc::new(DocumentStore::load(db.clone(), reporter.clone()));
        let network = Arc::new(NetworkMonitor::new(online));

        let api = MindmapApi::new(transport, RetryPolicy::from_config(&config.retry), reporter.clone());
        let coordinator = SyncCoordinator::new(
            store.clone(),
            api,
            network.clone(),
            reporter.clone(),
            config.debounce(),
        );
        coordinator.start();

        let loader = CacheLoader::new(coordinator.clone(), config.refresh_delay());

        info!(
            documents = store.documents().len(),
            api = %config.api_base_url,
            "Mindmap sync engine ready"
        );

        Ok(Self {
            db,
            config,
            reporter,
            store,
            network,
            coordinator,
            loader,
        })
    }

    pub fn shutdown(&self) {
        self.coordinator.shutdown();
    }
}

/// Install the global tracing subscriber; `RUST_LOG` overrides the default level
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Headless entry point: sync once, keep syncing until Ctrl-C
pub fn run() -> Result<(), StartupError> {
    init_tracing();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let db = Database::new()?;
        db.create_settings_table()?;
        let config = db.get_sync_config()?.with_env_overrides();

        let state = AppState::start(Arc::new(db), config)?;

        let report = state.coordinator.on_reconnect().await;
        info!(synced = report.synced.len(), failed = report.failed.len(), "Initial sync finished");

        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C, shutting down");
        }

        state.shutdown();
        let final_report = state.coordinator.sync_with_server().await;
        info!(synced = final_report.synced.len(), "Final sync finished");
        Ok::<(), StartupError>(())
    })
}
