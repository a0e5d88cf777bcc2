use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Device kind detected from User-Agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DeviceKind {
    Bot,
    Desktop,
    Mobile,
    Tablet,
    #[default]
    Unknown,
}

/// Information about the device that requested a login ticket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DeviceInfo {
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub kind: DeviceKind,
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub raw_user_agent: String,
}

/// Where a login ticket is in its handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketState {
    Pending,
    Scanned,
    Confirmed,
    Cancelled,
    Expired,
    Consumed,
}

impl TicketState {
    /// Terminal states accept no further writes.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TicketState::Cancelled | TicketState::Expired | TicketState::Consumed
        )
    }

    /// States that lapse into `Expired` once the deadline passes.
    pub fn is_live(self) -> bool {
        matches!(self, TicketState::Pending | TicketState::Scanned)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TicketState::Pending => "pending",
            TicketState::Scanned => "scanned",
            TicketState::Confirmed => "confirmed",
            TicketState::Cancelled => "cancelled",
            TicketState::Expired => "expired",
            TicketState::Consumed => "consumed",
        }
    }
}

impl fmt::Display for TicketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque session credential handed to the web session on confirmation.
///
/// The value is never printed through `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionCredential(String);

impl SessionCredential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionCredential(<redacted>)")
    }
}

/// A single QR login attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    /// Session credential minted on confirmation
    pub confirmed_session_ref: Option<SessionCredential>,
    /// When the ticket was created
    pub created_at: DateTime<Utc>,
    /// SHA-256 (hex) of the secret held by the creating web session
    pub creator_key_hash: String,
    /// Absolute deadline for scanning and confirming
    pub expires_at: DateTime<Utc>,
    /// Random identifier, also the QR payload
    pub id: String,
    /// Device that asked for the ticket
    pub requester_device: DeviceInfo,
    /// Identity of the mobile user who scanned the code
    pub scanned_by: Option<String>,
    pub state: TicketState,
    /// When the ticket was last mutated
    pub updated_at: DateTime<Utc>,
    /// Compare-and-swap counter, bumped on every mutation
    pub version: u64,
}

impl Ticket {
    pub fn new(
        id: String,
        creator_key_hash: String,
        requester_device: DeviceInfo,
        now: DateTime<Utc>,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            confirmed_session_ref: None,
            created_at: now,
            creator_key_hash,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
            id,
            requester_device,
            scanned_by: None,
            state: TicketState::Pending,
            updated_at: now,
            version: 0,
        }
    }

    /// Whether the deadline has passed at `now`.
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
