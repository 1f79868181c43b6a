//! Server reconciliation: transport, REST client, batch sync and cache-first loading.

pub mod api;
pub mod coordinator;
pub mod error;
pub mod http_client;
pub mod loader;
pub mod network;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use api::MindmapApi;
pub use coordinator::SyncCoordinator;
pub use error::{SyncError, TransportError, TransportErrorKind};
pub use http_client::HttpTransport;
pub use loader::{CacheLoader, LoadOutcome};
pub use network::NetworkMonitor;
pub use transport::Transport;
pub use types::*;
