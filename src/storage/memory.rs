//! In-process ticket store.
//!
//! Tickets live only as long as the process. Useful for single-node
//! deployments that do not need tickets to survive a restart, and for tests.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::models::Ticket;
use super::store::{StoreError, TicketStore};

#[derive(Default)]
pub struct MemoryStore {
    tickets: Mutex<HashMap<String, Ticket>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TicketStore for MemoryStore {
    fn create(&self, ticket: &Ticket) -> Result<String, StoreError> {
        let mut tickets = self.tickets.lock();
        if tickets.contains_key(&ticket.id) {
            return Err(StoreError::Duplicate);
        }
        tickets.insert(ticket.id.clone(), ticket.clone());
        Ok(ticket.id.clone())
    }

    fn get(&self, id: &str) -> Result<Ticket, StoreError> {
        self.tickets
            .lock()
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn compare_and_swap(
        &self,
        id: &str,
        expected_version: u64,
        mutate: &mut dyn FnMut(&mut Ticket),
    ) -> Result<Ticket, StoreError> {
        let mut tickets = self.tickets.lock();
        let stored = tickets.get_mut(id).ok_or(StoreError::NotFound)?;
        if stored.version != expected_version {
            return Err(StoreError::Conflict {
                expected: expected_version,
                found: stored.version,
            });
        }

        // The stored record changes only after `mutate` returns.
        let mut next = stored.clone();
        mutate(&mut next);
        debug_assert_eq!(next.id, id, "mutation must not change the ticket id");
        next.version = expected_version + 1;
        *stored = next.clone();
        Ok(next)
    }

    fn evict(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.tickets.lock().remove(id).is_some())
    }

    fn expiring_before(
        &self,
        deadline: DateTime<Utc>,
    ) -> Result<Vec<(String, DateTime<Utc>)>, StoreError> {
        let mut due: Vec<(String, DateTime<Utc>)> = self
            .tickets
            .lock()
            .values()
            .filter(|t| t.expires_at <= deadline)
            .map(|t| (t.id.clone(), t.expires_at))
            .collect();
        due.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(due)
    }

    fn count(&self) -> Result<u64, StoreError> {
        Ok(self.tickets.lock().len() as u64)
    }

    fn purge(&self) -> Result<u64, StoreError> {
        let mut tickets = self.tickets.lock();
        let removed = tickets.len() as u64;
        tickets.clear();
        Ok(removed)
    }
}
