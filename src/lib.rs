//! qr-login-broker - server-side broker for cross-device QR code login
//!
//! A web session asks for a ticket and shows its id as a QR code. An
//! authenticated mobile app scans it and confirms; the web session then
//! picks up a freshly minted session credential by polling. This crate
//! provides:
//! - Single-use tickets with strict expiry and a forward-only state machine
//! - Optimistic concurrency (compare-and-swap) on every ticket mutation
//! - Short-poll and long-poll status with one-time credential hand-off
//! - redb embedded storage (ACID, crash-safe) or in-process storage
//! - Background eviction of finished tickets
//! - REST API

pub mod api;
pub mod broker;
pub mod config;
pub mod device;
pub mod expiration;
pub mod poll;
pub mod state_machine;
pub mod storage;
#[cfg(test)]
pub mod testutil;
pub mod tokens;

use std::sync::Arc;
use std::time::Duration;

use broker::{BrokerSettings, LoginBroker};
use config::{Config, StorageBackend};
use storage::{Database, DatabaseError, MemoryStore, TicketStore};
use tokens::{IdentityVerifier, RemoteIssuer, RemoteVerifier, SessionIssuer};

/// Shared application state
pub struct AppState {
    pub broker: Arc<LoginBroker>,
    pub config: Config,
    pub identity: IdentityVerifier,
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("{0}")]
    Config(#[from] config::ConfigError),
    #[error("Failed to open database: {0}")]
    Database(#[from] DatabaseError),
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

impl AppState {
    /// Wire storage, upstream clients and the broker from configuration.
    pub fn from_config(config: Config) -> Result<Self, StartupError> {
        let store: Arc<dyn TicketStore> = match config.node.storage {
            StorageBackend::Redb => Arc::new(Database::open(&config.node.data_dir)?),
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
        };

        let http_client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(config.upstream.timeout_seconds))
            .build()?;

        let identity = match &config.upstream.identity_verify_url {
            Some(url) => IdentityVerifier::Remote(RemoteVerifier::new(http_client.clone(), url)),
            None => IdentityVerifier::Trusted,
        };

        let issuer = match &config.upstream.session_issue_url {
            Some(url) => SessionIssuer::Remote(RemoteIssuer::new(
                http_client,
                url,
                config.upstream.session_ttl_seconds,
            )),
            None => SessionIssuer::Local,
        };

        let broker = LoginBroker::new(store, issuer, BrokerSettings::try_from(&config.tickets)?);

        Ok(Self {
            broker: Arc::new(broker),
            config,
            identity,
        })
    }
}
