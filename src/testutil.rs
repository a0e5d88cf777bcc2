//! Shared test helpers, available to all `#[cfg(test)]` modules in the crate.

use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;

use crate::broker::{BrokerSettings, LoginBroker};
use crate::config::{Config, NodeConfig, StorageBackend, TicketConfig, UpstreamConfig};
use crate::storage::models::{DeviceInfo, Ticket};
use crate::storage::{Database, MemoryStore, TicketStore};
use crate::tokens::{hash_key, SessionIssuer};
use crate::AppState;

/// Open a fresh database in a temporary directory.
///
/// Returns both the `Database` and the `TempDir` guard; the caller must
/// keep the `TempDir` alive for the duration of the test.
pub fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::open(temp_dir.path()).unwrap();
    (db, temp_dir)
}

/// A minimal `Config` suitable for unit tests: in-memory storage, trusted
/// bearer identities and locally minted credentials.
pub fn test_config() -> Config {
    Config {
        node: NodeConfig {
            bind_address: "127.0.0.1:8080".to_string(),
            data_dir: "/tmp/test".to_string(),
            id: "test-node".to_string(),
            storage: StorageBackend::Memory,
        },
        test_mode: true,
        tickets: TicketConfig::default(),
        upstream: UpstreamConfig::default(),
    }
}

/// Build a full `Arc<AppState>` from [`test_config`].
pub fn test_state() -> Arc<AppState> {
    test_state_with(|_| {})
}

/// Like [`test_state`] but lets the test adjust the config first.
pub fn test_state_with(adjust: impl FnOnce(&mut Config)) -> Arc<AppState> {
    let mut config = test_config();
    adjust(&mut config);
    Arc::new(AppState::from_config(config).unwrap())
}

/// A broker over an in-memory store with locally minted credentials.
pub fn test_broker(settings: BrokerSettings) -> LoginBroker {
    broker_over(Arc::new(MemoryStore::new()), settings)
}

pub fn broker_over(store: Arc<dyn TicketStore>, settings: BrokerSettings) -> LoginBroker {
    LoginBroker::new(store, SessionIssuer::Local, settings)
}

/// Create a pending `Ticket` with the given id, expiring in two minutes.
/// Its creator key is `creator-{id}`.
pub fn make_ticket(id: &str) -> Ticket {
    Ticket::new(
        id.to_string(),
        hash_key(&format!("creator-{id}")),
        DeviceInfo::default(),
        Utc::now(),
        chrono::Duration::seconds(120),
    )
}

/// Serve `router` on an ephemeral local port and return its base URL.
pub async fn stub_server(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// A `reqwest::Client` with proxy disabled (avoids macOS
/// system-configuration panics in sandboxed tests).
pub fn test_http_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}
