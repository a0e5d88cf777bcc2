use chrono::{DateTime, Utc};
use redb::{ReadableTable, ReadableTableMetadata};

use super::db::{expiry_key, expiry_key_ms, Database, DatabaseError};
use super::models::Ticket;
use super::store::{StoreError, TicketStore};
use super::tables::*;

/// Outcome of a compare-and-swap inside a single write transaction
enum Swap {
    Applied(Ticket),
    Missing,
    Stale(u64),
}

impl Database {
    // ========================================================================
    // Ticket operations
    // ========================================================================

    /// Insert a ticket, refusing to overwrite an existing id
    fn insert_ticket(&self, ticket: &Ticket) -> Result<bool, DatabaseError> {
        debug_assert!(!ticket.id.is_empty(), "ticket id must not be empty");

        let write_txn = self.begin_write()?;
        let inserted = {
            let mut table = write_txn.open_table(TICKETS)?;
            if table.get(ticket.id.as_str())?.is_some() {
                false
            } else {
                let data = rmp_serde::to_vec_named(ticket)?;
                table.insert(ticket.id.as_str(), data.as_slice())?;

                let mut expiry_table = write_txn.open_table(TICKET_EXPIRY)?;
                let ek = expiry_key(&ticket.expires_at, &ticket.id);
                expiry_table.insert(ek.as_str(), ticket.id.as_str())?;
                true
            }
        };

        if inserted {
            write_txn.commit()?;
        } else {
            write_txn.abort()?;
        }
        Ok(inserted)
    }

    /// Get a ticket by id
    fn read_ticket(&self, id: &str) -> Result<Option<Ticket>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(TICKETS)?;

        match table.get(id)? {
            Some(data) => {
                let ticket: Ticket = rmp_serde::from_slice(data.value())?;
                Ok(Some(ticket))
            }
            None => Ok(None),
        }
    }

    /// Read, check and rewrite a ticket under one write transaction.
    ///
    /// redb serializes write transactions, so the version check and the
    /// write cannot interleave with another caller.
    fn swap_ticket(
        &self,
        id: &str,
        expected_version: u64,
        mutate: &mut dyn FnMut(&mut Ticket),
    ) -> Result<Swap, DatabaseError> {
        let write_txn = self.begin_write()?;

        let current: Option<Ticket> = {
            let table = write_txn.open_table(TICKETS)?;
            let result = table.get(id)?;
            match result {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            }
        };

        let mut ticket = match current {
            Some(ticket) if ticket.version == expected_version => ticket,
            Some(ticket) => {
                write_txn.abort()?;
                return Ok(Swap::Stale(ticket.version));
            }
            None => {
                write_txn.abort()?;
                return Ok(Swap::Missing);
            }
        };

        mutate(&mut ticket);
        debug_assert_eq!(ticket.id, id, "mutation must not change the ticket id");
        ticket.version = expected_version + 1;

        {
            let mut table = write_txn.open_table(TICKETS)?;
            let data = rmp_serde::to_vec_named(&ticket)?;
            table.insert(id, data.as_slice())?;
        }
        write_txn.commit()?;

        Ok(Swap::Applied(ticket))
    }

    /// Delete a ticket and its expiration index entry
    fn delete_ticket(&self, id: &str) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;

        let ticket: Option<Ticket> = {
            let table = write_txn.open_table(TICKETS)?;
            let result = table.get(id)?;
            match result {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            }
        };

        let deleted = match ticket {
            Some(ticket) => {
                {
                    let mut table = write_txn.open_table(TICKETS)?;
                    table.remove(id)?;
                }
                {
                    let mut expiry_table = write_txn.open_table(TICKET_EXPIRY)?;
                    let ek = expiry_key(&ticket.expires_at, id);
                    expiry_table.remove(ek.as_str())?;
                }
                true
            }
            None => false,
        };

        write_txn.commit()?;
        Ok(deleted)
    }

    /// Walk the expiration index up to `deadline` (no full table scan)
    fn scan_expiry_index(
        &self,
        deadline: DateTime<Utc>,
    ) -> Result<Vec<(String, DateTime<Utc>)>, DatabaseError> {
        let deadline_ms = deadline.timestamp_millis();
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(TICKET_EXPIRY)?;

        let mut result = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            match expiry_key_ms(key.value()) {
                Some(ms) if ms <= deadline_ms => {
                    if let Some(at) = DateTime::from_timestamp_millis(ms) {
                        result.push((value.value().to_string(), at));
                    }
                }
                _ => break,
            }
        }

        Ok(result)
    }

    fn ticket_count(&self) -> Result<u64, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(TICKETS)?;
        Ok(table.len()?)
    }

    /// Purge all tickets - for testing only
    fn purge_tickets(&self) -> Result<u64, DatabaseError> {
        let write_txn = self.begin_write()?;
        let mut deleted = 0u64;

        {
            let table = write_txn.open_table(TICKETS)?;
            let keys: Vec<String> = table
                .iter()?
                .map(|r| r.map(|(k, _)| k.value().to_string()))
                .collect::<Result<Vec<_>, _>>()?;
            drop(table);

            let mut table = write_txn.open_table(TICKETS)?;
            for key in keys {
                table.remove(key.as_str())?;
                deleted += 1;
            }
        }

        {
            let table = write_txn.open_table(TICKET_EXPIRY)?;
            let keys: Vec<String> = table
                .iter()?
                .map(|r| r.map(|(k, _)| k.value().to_string()))
                .collect::<Result<Vec<_>, _>>()?;
            drop(table);

            let mut table = write_txn.open_table(TICKET_EXPIRY)?;
            for key in keys {
                table.remove(key.as_str())?;
            }
        }

        write_txn.commit()?;
        Ok(deleted)
    }
}

impl TicketStore for Database {
    fn create(&self, ticket: &Ticket) -> Result<String, StoreError> {
        if self.insert_ticket(ticket)? {
            Ok(ticket.id.clone())
        } else {
            Err(StoreError::Duplicate)
        }
    }

    fn get(&self, id: &str) -> Result<Ticket, StoreError> {
        self.read_ticket(id)?.ok_or(StoreError::NotFound)
    }

    fn compare_and_swap(
        &self,
        id: &str,
        expected_version: u64,
        mutate: &mut dyn FnMut(&mut Ticket),
    ) -> Result<Ticket, StoreError> {
        match self.swap_ticket(id, expected_version, mutate)? {
            Swap::Applied(ticket) => Ok(ticket),
            Swap::Missing => Err(StoreError::NotFound),
            Swap::Stale(found) => Err(StoreError::Conflict {
                expected: expected_version,
                found,
            }),
        }
    }

    fn evict(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.delete_ticket(id)?)
    }

    fn expiring_before(
        &self,
        deadline: DateTime<Utc>,
    ) -> Result<Vec<(String, DateTime<Utc>)>, StoreError> {
        Ok(self.scan_expiry_index(deadline)?)
    }

    fn count(&self) -> Result<u64, StoreError> {
        Ok(self.ticket_count()?)
    }

    fn purge(&self) -> Result<u64, StoreError> {
        Ok(self.purge_tickets()?)
    }
}
