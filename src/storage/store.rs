//! The ticket store contract.
//!
//! `compare_and_swap` is the only way to change a stored ticket. Callers read
//! a ticket, decide what to do with it, and hand back the version they saw;
//! the store refuses the write if anyone got there first.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::db::DatabaseError;
use super::models::Ticket;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Version conflict (expected {expected}, found {found})")]
    Conflict { expected: u64, found: u64 },
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Ticket already exists")]
    Duplicate,
    #[error("Ticket not found")]
    NotFound,
}

/// Keyed storage for login tickets with single-id atomic transitions.
pub trait TicketStore: Send + Sync {
    /// Insert a new ticket, returning its id.
    fn create(&self, ticket: &Ticket) -> Result<String, StoreError>;

    fn get(&self, id: &str) -> Result<Ticket, StoreError>;

    /// Apply `mutate` if the stored version equals `expected_version`.
    ///
    /// The store bumps `version` itself; whatever `mutate` writes there is
    /// overwritten. Returns the ticket as persisted.
    fn compare_and_swap(
        &self,
        id: &str,
        expected_version: u64,
        mutate: &mut dyn FnMut(&mut Ticket),
    ) -> Result<Ticket, StoreError>;

    /// Remove a ticket. Returns whether anything was removed.
    fn evict(&self, id: &str) -> Result<bool, StoreError>;

    /// Tickets whose deadline is at or before `deadline`, earliest first.
    fn expiring_before(
        &self,
        deadline: DateTime<Utc>,
    ) -> Result<Vec<(String, DateTime<Utc>)>, StoreError>;

    /// Number of stored tickets.
    fn count(&self) -> Result<u64, StoreError>;

    /// Drop every ticket. Returns how many were removed.
    fn purge(&self) -> Result<u64, StoreError>;
}
