//! Change notification for the web session waiting on a ticket.
//!
//! The mutation path only ever calls [`PollChannel::publish`] after a
//! successful compare-and-swap; it never waits on subscribers. Long-poll
//! requests subscribe before reading the ticket, so a change that lands
//! between the read and the wait still wakes them.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;

#[derive(Default)]
pub struct PollChannel {
    /// ticket_id -> latest published version
    watchers: Mutex<HashMap<String, watch::Sender<u64>>>,
    /// ticket_id -> when a terminal state was first handed to a poller
    observed: Mutex<HashMap<String, Instant>>,
}

impl PollChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start listening for new versions of a ticket.
    pub fn subscribe(&self, ticket_id: &str) -> watch::Receiver<u64> {
        let mut watchers = self.watchers.lock();
        watchers
            .entry(ticket_id.to_string())
            .or_insert_with(|| watch::channel(0).0)
            .subscribe()
    }

    /// Announce that a ticket reached `version`. No-op when nobody listens.
    pub fn publish(&self, ticket_id: &str, version: u64) {
        if let Some(sender) = self.watchers.lock().get(ticket_id) {
            sender.send_if_modified(|current| {
                if *current < version {
                    *current = version;
                    true
                } else {
                    false
                }
            });
        }
    }

    /// Wait until a newer version is published, the ticket is forgotten, or
    /// `timeout` passes. Returns whether something happened.
    pub async fn changed(receiver: &mut watch::Receiver<u64>, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, receiver.changed()).await,
            Ok(Ok(())) | Ok(Err(_))
        )
    }

    /// Record that a poller saw the ticket in a terminal state.
    pub fn mark_observed(&self, ticket_id: &str) {
        self.observed
            .lock()
            .entry(ticket_id.to_string())
            .or_insert_with(Instant::now);
    }

    /// Tickets whose terminal state was observed at least `linger` ago.
    pub fn observed_before(&self, linger: Duration) -> Vec<String> {
        let now = Instant::now();
        self.observed
            .lock()
            .iter()
            .filter(|(_, seen)| now.duration_since(**seen) >= linger)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Drop all state for a ticket. Waiting subscribers wake up.
    pub fn forget(&self, ticket_id: &str) {
        self.watchers.lock().remove(ticket_id);
        self.observed.lock().remove(ticket_id);
    }

    /// Drop a ticket's channel once its last subscriber is gone.
    pub fn release(&self, ticket_id: &str) {
        let mut watchers = self.watchers.lock();
        if watchers
            .get(ticket_id)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            watchers.remove(ticket_id);
        }
    }

    /// Drop every channel and observation. Waiting subscribers wake up.
    pub fn clear(&self) {
        self.watchers.lock().clear();
        self.observed.lock().clear();
    }

    /// Remove channels nobody is waiting on. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut watchers = self.watchers.lock();
        let before = watchers.len();
        watchers.retain(|_, sender| sender.receiver_count() > 0);
        before - watchers.len()
    }

    pub fn watched(&self) -> usize {
        self.watchers.lock().len()
    }

    pub fn observed_count(&self) -> usize {
        self.observed.lock().len()
    }
}
