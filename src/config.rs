use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub node: NodeConfig,
    /// Enables dangerous operations like purge and trusted bearer identities.
    /// Must never be true in production.
    pub test_mode: bool,
    pub tickets: TicketConfig,
    pub upstream: UpstreamConfig,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_address: String,
    pub data_dir: String,
    pub id: String,
    pub storage: StorageBackend,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    #[default]
    Redb,
}

/// Upper bound for ticket TTL and eviction grace (one day)
pub const MAX_TICKET_WINDOW_SECONDS: u64 = 86_400;

#[derive(Debug, Clone)]
pub struct TicketConfig {
    /// Compare-and-swap attempts per operation before answering busy
    pub cas_retry_limit: u32,
    pub cleanup_interval_seconds: u64,
    /// How long past its deadline a ticket may stay in the store
    pub eviction_grace_seconds: u64,
    pub long_poll_timeout_seconds: u64,
    /// How long an observed terminal ticket stays readable
    pub observed_linger_seconds: u64,
    pub ttl_seconds: u64,
}

/// External identity and session services
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Endpoint resolving a bearer token to a subject (`POST {token}`)
    pub identity_verify_url: Option<String>,
    /// Endpoint creating a session for a subject (`POST {subject_id, ...}`)
    pub session_issue_url: Option<String>,
    pub session_ttl_seconds: u64,
    pub timeout_seconds: u64,
}

impl Default for TicketConfig {
    fn default() -> Self {
        Self {
            cas_retry_limit: 3,
            cleanup_interval_seconds: 30,
            eviction_grace_seconds: 60,
            long_poll_timeout_seconds: 25,
            observed_linger_seconds: 10,
            ttl_seconds: 120,
        }
    }
}

impl TicketConfig {
    pub fn ttl(&self) -> Result<chrono::Duration, ConfigError> {
        seconds("TICKET_TTL_SECONDS", self.ttl_seconds)
    }

    pub fn eviction_grace(&self) -> Result<chrono::Duration, ConfigError> {
        seconds("TICKET_EVICTION_GRACE_SECONDS", self.eviction_grace_seconds)
    }
}

/// Convert a second count to a chrono duration without wrapping.
fn seconds(name: &str, value: u64) -> Result<chrono::Duration, ConfigError> {
    i64::try_from(value)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .ok_or_else(|| ConfigError::ValidationError(format!("{name} is out of range")))
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            identity_verify_url: None,
            session_issue_url: None,
            session_ttl_seconds: 86400, // 24 hours
            timeout_seconds: 5,
        }
    }
}

/// Parse an optional numeric variable, falling back to `default` when unset.
fn env_number<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            ConfigError::ValidationError(format!("{name} must be a number, got '{raw}'"))
        }),
        Err(_) => Ok(default),
    }
}

fn env_url(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let node_id = std::env::var("NODE_ID").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());

        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());

        let storage = match std::env::var("STORAGE_BACKEND") {
            Ok(s) => match s.to_lowercase().as_str() {
                "memory" => StorageBackend::Memory,
                "redb" => StorageBackend::Redb,
                other => {
                    return Err(ConfigError::ValidationError(format!(
                        "STORAGE_BACKEND must be 'redb' or 'memory', got '{other}'"
                    )))
                }
            },
            Err(_) => StorageBackend::default(),
        };

        let test_mode = std::env::var("TEST_MODE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let defaults = TicketConfig::default();
        let tickets = TicketConfig {
            cas_retry_limit: env_number("CAS_RETRY_LIMIT", defaults.cas_retry_limit)?,
            cleanup_interval_seconds: env_number(
                "CLEANUP_INTERVAL_SECONDS",
                defaults.cleanup_interval_seconds,
            )?,
            eviction_grace_seconds: env_number(
                "TICKET_EVICTION_GRACE_SECONDS",
                defaults.eviction_grace_seconds,
            )?,
            long_poll_timeout_seconds: env_number(
                "LONG_POLL_TIMEOUT_SECONDS",
                defaults.long_poll_timeout_seconds,
            )?,
            observed_linger_seconds: env_number(
                "OBSERVED_LINGER_SECONDS",
                defaults.observed_linger_seconds,
            )?,
            ttl_seconds: env_number("TICKET_TTL_SECONDS", defaults.ttl_seconds)?,
        };

        let upstream_defaults = UpstreamConfig::default();
        let upstream = UpstreamConfig {
            identity_verify_url: env_url("IDENTITY_VERIFY_URL"),
            session_issue_url: env_url("SESSION_ISSUE_URL"),
            session_ttl_seconds: env_number(
                "SESSION_TTL_SECONDS",
                upstream_defaults.session_ttl_seconds,
            )?,
            timeout_seconds: env_number(
                "UPSTREAM_TIMEOUT_SECONDS",
                upstream_defaults.timeout_seconds,
            )?,
        };

        let config = Config {
            node: NodeConfig {
                bind_address,
                data_dir,
                id: node_id,
                storage,
            },
            test_mode,
            tickets,
            upstream,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.id.is_empty() {
            return Err(ConfigError::ValidationError(
                "NODE_ID cannot be empty".to_string(),
            ));
        }

        if self.tickets.ttl_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "TICKET_TTL_SECONDS must be greater than 0".to_string(),
            ));
        }

        if self.tickets.ttl_seconds > MAX_TICKET_WINDOW_SECONDS {
            return Err(ConfigError::ValidationError(format!(
                "TICKET_TTL_SECONDS must be at most {MAX_TICKET_WINDOW_SECONDS}"
            )));
        }

        if self.tickets.eviction_grace_seconds > MAX_TICKET_WINDOW_SECONDS {
            return Err(ConfigError::ValidationError(format!(
                "TICKET_EVICTION_GRACE_SECONDS must be at most {MAX_TICKET_WINDOW_SECONDS}"
            )));
        }

        if self.tickets.cas_retry_limit == 0 {
            return Err(ConfigError::ValidationError(
                "CAS_RETRY_LIMIT must be greater than 0".to_string(),
            ));
        }

        if self.tickets.cleanup_interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "CLEANUP_INTERVAL_SECONDS must be greater than 0".to_string(),
            ));
        }

        if self.upstream.identity_verify_url.is_none() && !self.test_mode {
            return Err(ConfigError::ValidationError(
                "IDENTITY_VERIFY_URL is required unless TEST_MODE is enabled".to_string(),
            ));
        }

        if self.tickets.long_poll_timeout_seconds > self.tickets.ttl_seconds {
            tracing::warn!(
                long_poll = self.tickets.long_poll_timeout_seconds,
                ttl = self.tickets.ttl_seconds,
                "Long-poll timeout exceeds ticket TTL; waits will be cut at the ticket deadline"
            );
        }

        Ok(())
    }
}
