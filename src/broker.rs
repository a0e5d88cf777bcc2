//! The login broker: the only component that mutates tickets.
//!
//! Every mutation is a read, a pure check in [`crate::state_machine`], and a
//! compare-and-swap against the version that was read. When the swap loses a
//! race the broker re-reads and re-checks, a bounded number of times, so a
//! concurrent winner is seen as a state conflict rather than overwritten.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, TicketConfig};
use crate::device::requester_device;
use crate::poll::PollChannel;
use crate::state_machine::{self, Canceller, Rejection, Transition};
use crate::storage::models::{SessionCredential, Ticket, TicketState};
use crate::storage::{StoreError, TicketStore};
use crate::tokens::generator::{
    digests_match, generate_hex, generate_ticket_id, hash_key, SECRET_BYTES,
};
use crate::tokens::{IssueError, SessionIssuer};

#[derive(Debug, Error)]
pub enum TicketError {
    #[error("Session credential already claimed")]
    AlreadyConsumed,
    #[error("Ticket is busy, try again later")]
    Busy,
    #[error("Ticket was changed by another request")]
    Conflict,
    #[error("QR code expired, generate a new one")]
    Expired,
    #[error("Not allowed")]
    Forbidden,
    #[error("Failed to mint session credential: {0}")]
    Issue(#[from] IssueError),
    #[error("Ticket not found")]
    NotFound,
    #[error("Storage error: {0}")]
    Storage(StoreError),
}

impl From<Rejection> for TicketError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::AlreadyConsumed => TicketError::AlreadyConsumed,
            Rejection::Conflict => TicketError::Conflict,
            Rejection::Expired => TicketError::Expired,
            Rejection::Forbidden => TicketError::Forbidden,
        }
    }
}

impl From<StoreError> for TicketError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => TicketError::NotFound,
            StoreError::Conflict { .. } => TicketError::Conflict,
            other => TicketError::Storage(other),
        }
    }
}

/// Tunables taken from [`TicketConfig`]
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub cas_retry_limit: u32,
    pub eviction_grace: chrono::Duration,
    pub long_poll_timeout: Duration,
    pub observed_linger: Duration,
    pub ticket_ttl: chrono::Duration,
}

impl TryFrom<&TicketConfig> for BrokerSettings {
    type Error = ConfigError;

    fn try_from(config: &TicketConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            cas_retry_limit: config.cas_retry_limit,
            eviction_grace: config.eviction_grace()?,
            long_poll_timeout: Duration::from_secs(config.long_poll_timeout_seconds),
            observed_linger: Duration::from_secs(config.observed_linger_seconds),
            ticket_ttl: config.ttl()?,
        })
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            cas_retry_limit: 3,
            eviction_grace: chrono::Duration::seconds(60),
            long_poll_timeout: Duration::from_secs(25),
            observed_linger: Duration::from_secs(10),
            ticket_ttl: chrono::Duration::seconds(120),
        }
    }
}

/// What the web session gets back when it asks for a ticket
#[derive(Debug)]
pub struct CreatedTicket {
    /// Secret proving the caller created the ticket; stored only as a hash
    pub creator_key: String,
    pub expires_at: DateTime<Utc>,
    pub id: String,
}

/// Answer to a status poll
#[derive(Debug, Clone)]
pub struct TicketStatus {
    pub expires_at: DateTime<Utc>,
    pub id: String,
    /// Present on exactly one poll per ticket: the one that consumed it
    pub session_credential: Option<SessionCredential>,
    pub state: TicketState,
    pub version: u64,
}

impl TicketStatus {
    fn of(ticket: &Ticket, session_credential: Option<SessionCredential>) -> Self {
        Self {
            expires_at: ticket.expires_at,
            id: ticket.id.clone(),
            session_credential,
            state: ticket.state,
            version: ticket.version,
        }
    }
}

/// Counts from one eviction sweep
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub channels_pruned: usize,
    pub evicted: usize,
    pub expired: usize,
}

pub struct LoginBroker {
    channel: PollChannel,
    issuer: SessionIssuer,
    settings: BrokerSettings,
    store: Arc<dyn TicketStore>,
}

/// Ticket ids double as poll handles, so logs carry only a prefix.
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

impl LoginBroker {
    pub fn new(
        store: Arc<dyn TicketStore>,
        issuer: SessionIssuer,
        settings: BrokerSettings,
    ) -> Self {
        Self {
            channel: PollChannel::new(),
            issuer,
            settings,
            store,
        }
    }

    pub fn channel(&self) -> &PollChannel {
        &self.channel
    }

    pub fn store(&self) -> &dyn TicketStore {
        self.store.as_ref()
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Mint a pending ticket for a web session.
    pub fn create_ticket(&self, user_agent: Option<&str>) -> Result<CreatedTicket, TicketError> {
        let creator_key = generate_hex(SECRET_BYTES);
        let ticket = Ticket::new(
            generate_ticket_id(),
            hash_key(&creator_key),
            requester_device(user_agent),
            Utc::now(),
            self.settings.ticket_ttl,
        );

        let id = self.store.create(&ticket)?;
        info!(ticket = short_id(&id), expires_at = %ticket.expires_at, "Created login ticket");

        Ok(CreatedTicket {
            creator_key,
            expires_at: ticket.expires_at,
            id,
        })
    }

    /// Attach the scanning mobile user to a pending ticket.
    pub fn scan_ticket(&self, id: &str, scanner: &str) -> Result<Ticket, TicketError> {
        self.transition(id, |ticket, now| state_machine::scan(ticket, scanner, now))
    }

    /// Confirm a scanned ticket and attach a freshly minted session credential.
    pub async fn confirm_ticket(&self, id: &str, scanner: &str) -> Result<Ticket, TicketError> {
        // Rejected callers never reach the issuer.
        let ticket = self.load(id)?;
        state_machine::check_confirm(&ticket, scanner, Utc::now())?;

        let credential = self.issuer.issue(scanner, &ticket.requester_device).await?;

        let result = self.transition(id, |ticket, now| {
            state_machine::confirm(ticket, scanner, credential.clone(), now)
        });
        if let Err(e) = &result {
            warn!(ticket = short_id(id), error = %e, "Minted session credential was not attached");
        }
        result
    }

    /// Cancel a pending or scanned ticket.
    pub fn cancel_ticket(
        &self,
        id: &str,
        scanner: Option<&str>,
        creator_key: Option<&str>,
    ) -> Result<Ticket, TicketError> {
        let presented = creator_key.map(hash_key);
        self.transition(id, |ticket, now| {
            let is_creator = presented
                .as_deref()
                .is_some_and(|hash| digests_match(hash, &ticket.creator_key_hash));
            state_machine::cancel(ticket, Canceller { scanner, is_creator }, now)
        })
    }

    /// Claim the credential of a confirmed ticket. Fails with
    /// `AlreadyConsumed` on every call after the first.
    pub fn consume_ticket(&self, id: &str) -> Result<(Ticket, SessionCredential), TicketError> {
        let ticket = self.transition(id, |ticket, _| state_machine::consume(ticket))?;
        let credential = ticket
            .confirmed_session_ref
            .clone()
            .ok_or(TicketError::NotFound)?;
        Ok((ticket, credential))
    }

    /// Report a ticket's state. The first poll after confirmation consumes
    /// the ticket and is the only one that carries the credential.
    pub fn poll_status(&self, id: &str) -> Result<TicketStatus, TicketError> {
        let ticket = self.load(id)?;

        if ticket.state == TicketState::Confirmed {
            match self.consume_ticket(id) {
                Ok((consumed, credential)) => {
                    self.channel.mark_observed(id);
                    info!(ticket = short_id(id), "Session credential handed to web session");
                    return Ok(TicketStatus::of(&consumed, Some(credential)));
                }
                Err(TicketError::AlreadyConsumed) => {
                    let consumed = self.load(id)?;
                    self.channel.mark_observed(id);
                    return Ok(TicketStatus::of(&consumed, None));
                }
                Err(e) => return Err(e),
            }
        }

        if ticket.state.is_terminal() {
            self.channel.mark_observed(id);
        }
        Ok(TicketStatus::of(&ticket, None))
    }

    /// Long-poll: hold until the ticket moves past `since` (or changes at
    /// all when `since` is absent), the long-poll timeout passes, or the
    /// ticket deadline passes. Dropping the future abandons the wait.
    pub async fn wait_for_status(
        &self,
        id: &str,
        since: Option<u64>,
    ) -> Result<TicketStatus, TicketError> {
        let mut receiver = self.channel.subscribe(id);
        let status = match self.poll_status(id) {
            Ok(status) => status,
            Err(e) => {
                drop(receiver);
                self.channel.release(id);
                return Err(e);
            }
        };

        let moved = since.is_some_and(|version| version != status.version);
        if moved || status.state.is_terminal() {
            return Ok(status);
        }

        let until_deadline = (status.expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let timeout = if status.state.is_live() {
            self.settings
                .long_poll_timeout
                .min(until_deadline + Duration::from_millis(50))
        } else {
            self.settings.long_poll_timeout
        };

        if PollChannel::changed(&mut receiver, timeout).await {
            debug!(ticket = short_id(id), "Long-poll woke on change");
        }
        self.poll_status(id)
    }

    /// Evict tickets that are done with: terminal ones already observed by a
    /// poller and past the linger, and anything past its deadline plus grace.
    pub fn sweep(&self) -> Result<SweepStats, TicketError> {
        let mut stats = SweepStats::default();

        for id in self.channel.observed_before(self.settings.observed_linger) {
            match self.store.get(&id) {
                Ok(ticket) if ticket.state.is_terminal() => {
                    if self.store.evict(&id)? {
                        stats.evicted += 1;
                    }
                    self.channel.forget(&id);
                }
                Ok(_) => {}
                Err(StoreError::NotFound) => self.channel.forget(&id),
                Err(e) => return Err(e.into()),
            }
        }

        let cutoff = Utc::now()
            .checked_sub_signed(self.settings.eviction_grace)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        for (id, _) in self.store.expiring_before(cutoff)? {
            let ticket = match self.store.get(&id) {
                Ok(ticket) => ticket,
                Err(StoreError::NotFound) => continue,
                Err(e) => return Err(e.into()),
            };
            let ticket = if ticket.state.is_live() {
                match self.load(&id) {
                    Ok(expired) => {
                        stats.expired += 1;
                        expired
                    }
                    Err(TicketError::NotFound) => continue,
                    // Still contended; the next sweep gets it.
                    Err(TicketError::Busy) => continue,
                    Err(e) => return Err(e),
                }
            } else {
                ticket
            };

            // A confirmed ticket nobody claimed within the grace is abandoned.
            if ticket.state.is_terminal() || ticket.state == TicketState::Confirmed {
                if self.store.evict(&id)? {
                    stats.evicted += 1;
                }
                self.channel.forget(&id);
            }
        }

        stats.channels_pruned = self.channel.prune();
        Ok(stats)
    }

    // ========================================================================
    // Compare-and-swap plumbing
    // ========================================================================

    /// Read a ticket, forcing it to `Expired` first if its deadline passed.
    fn load(&self, id: &str) -> Result<Ticket, TicketError> {
        for _ in 0..self.settings.cas_retry_limit {
            let ticket = self.store.get(id)?;
            let now = Utc::now();
            let Some(expire) = state_machine::lapse(&ticket, now) else {
                return Ok(ticket);
            };

            match self.commit(&ticket, &expire, now) {
                Ok(expired) => {
                    info!(ticket = short_id(id), "Login ticket expired");
                    return Ok(expired);
                }
                Err(StoreError::Conflict { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        warn!(ticket = short_id(id), "Gave up expiring a contended ticket");
        Err(TicketError::Busy)
    }

    /// Bounded read-check-swap loop around one planned transition.
    fn transition<F>(&self, id: &str, mut plan: F) -> Result<Ticket, TicketError>
    where
        F: FnMut(&Ticket, DateTime<Utc>) -> Result<Transition, Rejection>,
    {
        for attempt in 1..=self.settings.cas_retry_limit {
            let ticket = self.load(id)?;
            let now = Utc::now();
            let transition = plan(&ticket, now)?;

            match self.commit(&ticket, &transition, now) {
                Ok(updated) => return Ok(updated),
                Err(StoreError::Conflict { expected, found }) => {
                    debug!(
                        ticket = short_id(id),
                        attempt,
                        expected,
                        found,
                        "Lost compare-and-swap race, re-reading"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(
            ticket = short_id(id),
            attempts = self.settings.cas_retry_limit,
            "Compare-and-swap retry budget exhausted"
        );
        Err(TicketError::Busy)
    }

    fn commit(
        &self,
        ticket: &Ticket,
        transition: &Transition,
        now: DateTime<Utc>,
    ) -> Result<Ticket, StoreError> {
        let updated = self
            .store
            .compare_and_swap(&ticket.id, ticket.version, &mut |t: &mut Ticket| {
                transition.apply(t, now)
            })?;

        debug!(
            ticket = short_id(&updated.id),
            from = %ticket.state,
            to = %updated.state,
            version = updated.version,
            "Ticket transitioned"
        );
        self.channel.publish(&updated.id, updated.version);
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::testutil::{broker_over, make_ticket, setup_db, test_broker};

    fn quick_settings() -> BrokerSettings {
        BrokerSettings {
            long_poll_timeout: Duration::from_millis(200),
            observed_linger: Duration::ZERO,
            ..BrokerSettings::default()
        }
    }

    /// Store whose compare-and-swap always loses.
    struct AlwaysStale(MemoryStore);

    impl TicketStore for AlwaysStale {
        fn create(&self, ticket: &Ticket) -> Result<String, StoreError> {
            self.0.create(ticket)
        }

        fn get(&self, id: &str) -> Result<Ticket, StoreError> {
            self.0.get(id)
        }

        fn compare_and_swap(
            &self,
            _id: &str,
            expected_version: u64,
            _mutate: &mut dyn FnMut(&mut Ticket),
        ) -> Result<Ticket, StoreError> {
            Err(StoreError::Conflict {
                expected: expected_version,
                found: expected_version + 1,
            })
        }

        fn evict(&self, id: &str) -> Result<bool, StoreError> {
            self.0.evict(id)
        }

        fn expiring_before(
            &self,
            deadline: DateTime<Utc>,
        ) -> Result<Vec<(String, DateTime<Utc>)>, StoreError> {
            self.0.expiring_before(deadline)
        }

        fn count(&self) -> Result<u64, StoreError> {
            self.0.count()
        }

        fn purge(&self) -> Result<u64, StoreError> {
            self.0.purge()
        }
    }

    #[tokio::test]
    async fn test_handshake_hands_credential_over_once() {
        let broker = test_broker(quick_settings());
        let created = broker.create_ticket(Some("Mozilla/5.0")).unwrap();

        let status = broker.poll_status(&created.id).unwrap();
        assert_eq!(status.state, TicketState::Pending);
        assert_eq!(status.version, 0);

        let scanned = broker.scan_ticket(&created.id, "user-1").unwrap();
        assert_eq!(scanned.state, TicketState::Scanned);
        assert_eq!(scanned.scanned_by.as_deref(), Some("user-1"));

        let confirmed = broker.confirm_ticket(&created.id, "user-1").await.unwrap();
        assert_eq!(confirmed.state, TicketState::Confirmed);
        assert!(confirmed.confirmed_session_ref.is_some());

        let first = broker.poll_status(&created.id).unwrap();
        assert_eq!(first.state, TicketState::Consumed);
        assert_eq!(first.version, 3);
        let credential = first.session_credential.expect("first poll carries the credential");
        assert_eq!(
            Some(&credential),
            confirmed.confirmed_session_ref.as_ref()
        );

        let second = broker.poll_status(&created.id).unwrap();
        assert_eq!(second.state, TicketState::Consumed);
        assert!(second.session_credential.is_none());

        assert!(matches!(
            broker.consume_ticket(&created.id),
            Err(TicketError::AlreadyConsumed)
        ));
    }

    #[test]
    fn test_creator_key_is_not_stored_in_clear() {
        let broker = test_broker(quick_settings());
        let created = broker.create_ticket(None).unwrap();

        let stored = broker.store().get(&created.id).unwrap();
        assert_ne!(stored.creator_key_hash, created.creator_key);
        assert_eq!(stored.creator_key_hash, hash_key(&created.creator_key));
        assert_eq!(created.expires_at, stored.expires_at);
    }

    #[test]
    fn test_cancel_pending_then_scan_conflicts() {
        let broker = test_broker(quick_settings());
        let created = broker.create_ticket(None).unwrap();

        let cancelled = broker.cancel_ticket(&created.id, None, None).unwrap();
        assert_eq!(cancelled.state, TicketState::Cancelled);

        assert!(matches!(
            broker.scan_ticket(&created.id, "user-1"),
            Err(TicketError::Conflict)
        ));
        assert!(matches!(
            broker.cancel_ticket(&created.id, None, None),
            Err(TicketError::Conflict)
        ));
    }

    #[test]
    fn test_unknown_ticket() {
        let broker = test_broker(quick_settings());
        assert!(matches!(broker.poll_status("missing"), Err(TicketError::NotFound)));
        assert!(matches!(
            broker.scan_ticket("missing", "user-1"),
            Err(TicketError::NotFound)
        ));
    }

    #[test]
    fn test_concurrent_scans_have_one_winner() {
        for _ in 0..20 {
            let broker = Arc::new(test_broker(quick_settings()));
            let id = broker.create_ticket(None).unwrap().id;

            let handles: Vec<_> = ["user-1", "user-2"]
                .into_iter()
                .map(|scanner| {
                    let broker = Arc::clone(&broker);
                    let id = id.clone();
                    std::thread::spawn(move || broker.scan_ticket(&id, scanner))
                })
                .collect();
            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

            let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
            assert_eq!(winners.len(), 1);
            assert!(results
                .iter()
                .any(|r| matches!(r, Err(TicketError::Conflict))));

            let stored = broker.store().get(&id).unwrap();
            assert_eq!(stored.version, 1);
            assert_eq!(stored.scanned_by, winners[0].scanned_by);
        }
    }

    #[tokio::test]
    async fn test_concurrent_polls_claim_credential_once() {
        for _ in 0..20 {
            let broker = Arc::new(test_broker(quick_settings()));
            let id = broker.create_ticket(None).unwrap().id;
            broker.scan_ticket(&id, "user-1").unwrap();
            broker.confirm_ticket(&id, "user-1").await.unwrap();

            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let broker = Arc::clone(&broker);
                    let id = id.clone();
                    std::thread::spawn(move || broker.poll_status(&id))
                })
                .collect();
            let statuses: Vec<_> = handles
                .into_iter()
                .map(|h| h.join().unwrap().unwrap())
                .collect();

            let credentials = statuses
                .iter()
                .filter(|s| s.session_credential.is_some())
                .count();
            assert_eq!(credentials, 1);
            assert!(statuses.iter().all(|s| s.state == TicketState::Consumed));
        }
    }

    #[test]
    fn test_concurrent_scans_on_redb() {
        let (db, _dir) = setup_db();
        let broker = Arc::new(broker_over(Arc::new(db), quick_settings()));
        let id = broker.create_ticket(None).unwrap().id;

        let handles: Vec<_> = (0..4)
            .map(|n| {
                let broker = Arc::clone(&broker);
                let id = id.clone();
                std::thread::spawn(move || broker.scan_ticket(&id, &format!("user-{n}")))
            })
            .collect();
        let ok = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| r.is_ok())
            .count();

        assert_eq!(ok, 1);
        assert_eq!(broker.store().get(&id).unwrap().state, TicketState::Scanned);
    }

    #[tokio::test]
    async fn test_confirm_by_other_scanner_is_forbidden() {
        let broker = test_broker(quick_settings());
        let id = broker.create_ticket(None).unwrap().id;
        broker.scan_ticket(&id, "user-1").unwrap();

        assert!(matches!(
            broker.confirm_ticket(&id, "user-2").await,
            Err(TicketError::Forbidden)
        ));

        let stored = broker.store().get(&id).unwrap();
        assert_eq!(stored.state, TicketState::Scanned);
        assert!(stored.confirmed_session_ref.is_none());
    }

    #[tokio::test]
    async fn test_confirm_before_scan_conflicts() {
        let broker = test_broker(quick_settings());
        let id = broker.create_ticket(None).unwrap().id;

        assert!(matches!(
            broker.confirm_ticket(&id, "user-1").await,
            Err(TicketError::Conflict)
        ));
    }

    #[test]
    fn test_scanned_cancel_needs_scanner_or_creator() {
        let broker = test_broker(quick_settings());
        let created = broker.create_ticket(None).unwrap();
        broker.scan_ticket(&created.id, "user-1").unwrap();

        assert!(matches!(
            broker.cancel_ticket(&created.id, Some("user-2"), None),
            Err(TicketError::Forbidden)
        ));
        assert!(matches!(
            broker.cancel_ticket(&created.id, None, Some("not-the-key")),
            Err(TicketError::Forbidden)
        ));

        let cancelled = broker
            .cancel_ticket(&created.id, None, Some(&created.creator_key))
            .unwrap();
        assert_eq!(cancelled.state, TicketState::Cancelled);
        assert!(cancelled.scanned_by.is_none());
    }

    #[test]
    fn test_scanner_can_cancel() {
        let broker = test_broker(quick_settings());
        let id = broker.create_ticket(None).unwrap().id;
        broker.scan_ticket(&id, "user-1").unwrap();

        let cancelled = broker.cancel_ticket(&id, Some("user-1"), None).unwrap();
        assert_eq!(cancelled.state, TicketState::Cancelled);
    }

    #[tokio::test]
    async fn test_expired_ticket_rejects_everything() {
        let broker = test_broker(BrokerSettings {
            ticket_ttl: chrono::Duration::seconds(1),
            ..quick_settings()
        });
        let id = broker.create_ticket(None).unwrap().id;
        broker.scan_ticket(&id, "user-1").unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert!(matches!(
            broker.confirm_ticket(&id, "user-1").await,
            Err(TicketError::Expired)
        ));
        assert!(matches!(
            broker.cancel_ticket(&id, Some("user-1"), None),
            Err(TicketError::Expired)
        ));

        let status = broker.poll_status(&id).unwrap();
        assert_eq!(status.state, TicketState::Expired);
        assert!(status.session_credential.is_none());

        let stored = broker.store().get(&id).unwrap();
        assert!(stored.scanned_by.is_none());
        assert!(stored.confirmed_session_ref.is_none());
    }

    #[test]
    fn test_store_written_past_deadline_expires_on_read() {
        let store = Arc::new(MemoryStore::new());
        let mut ticket = make_ticket("stale");
        ticket.expires_at = Utc::now() - chrono::Duration::seconds(1);
        store.create(&ticket).unwrap();
        let broker = broker_over(store, quick_settings());

        assert!(matches!(
            broker.scan_ticket("stale", "user-1"),
            Err(TicketError::Expired)
        ));
        let status = broker.poll_status("stale").unwrap();
        assert_eq!(status.state, TicketState::Expired);
        assert_eq!(status.version, 1);
    }

    #[test]
    fn test_lost_races_end_in_busy() {
        let broker = broker_over(Arc::new(AlwaysStale(MemoryStore::new())), quick_settings());
        let id = broker.create_ticket(None).unwrap().id;

        assert!(matches!(
            broker.scan_ticket(&id, "user-1"),
            Err(TicketError::Busy)
        ));
        assert_eq!(broker.store().get(&id).unwrap().state, TicketState::Pending);
    }

    #[tokio::test]
    async fn test_long_poll_wakes_on_change() {
        let broker = Arc::new(test_broker(BrokerSettings {
            long_poll_timeout: Duration::from_secs(5),
            ..quick_settings()
        }));
        let id = broker.create_ticket(None).unwrap().id;

        let waiter = {
            let broker = Arc::clone(&broker);
            let id = id.clone();
            tokio::spawn(async move { broker.wait_for_status(&id, Some(0)).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        broker.scan_ticket(&id, "user-1").unwrap();

        let status = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .expect("waiter should wake before its timeout")
            .unwrap()
            .unwrap();
        assert_eq!(status.state, TicketState::Scanned);
        assert_eq!(status.version, 1);
    }

    #[tokio::test]
    async fn test_long_poll_returns_at_once_when_behind() {
        let broker = test_broker(BrokerSettings {
            long_poll_timeout: Duration::from_secs(5),
            ..quick_settings()
        });
        let id = broker.create_ticket(None).unwrap().id;
        broker.scan_ticket(&id, "user-1").unwrap();

        let status = tokio::time::timeout(
            Duration::from_millis(500),
            broker.wait_for_status(&id, Some(0)),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(status.version, 1);
    }

    #[tokio::test]
    async fn test_long_poll_times_out_unchanged() {
        let broker = test_broker(quick_settings());
        let id = broker.create_ticket(None).unwrap().id;

        let started = std::time::Instant::now();
        let status = broker.wait_for_status(&id, Some(0)).await.unwrap();

        assert!(started.elapsed() >= Duration::from_millis(150));
        assert_eq!(status.state, TicketState::Pending);
        assert_eq!(status.version, 0);
    }

    #[tokio::test]
    async fn test_long_poll_delivers_credential_on_confirm() {
        let broker = Arc::new(test_broker(BrokerSettings {
            long_poll_timeout: Duration::from_secs(5),
            ..quick_settings()
        }));
        let id = broker.create_ticket(None).unwrap().id;
        broker.scan_ticket(&id, "user-1").unwrap();

        let waiter = {
            let broker = Arc::clone(&broker);
            let id = id.clone();
            tokio::spawn(async move { broker.wait_for_status(&id, Some(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        broker.confirm_ticket(&id, "user-1").await.unwrap();

        let status = waiter.await.unwrap().unwrap();
        assert_eq!(status.state, TicketState::Consumed);
        assert!(status.session_credential.is_some());
    }

    #[tokio::test]
    async fn test_long_poll_on_unknown_ticket_leaves_no_channel() {
        let broker = test_broker(quick_settings());

        assert!(matches!(
            broker.wait_for_status("missing", Some(0)).await,
            Err(TicketError::NotFound)
        ));
        assert_eq!(broker.channel().watched(), 0);
    }

    #[tokio::test]
    async fn test_sweep_evicts_observed_terminal_tickets() {
        let broker = test_broker(quick_settings());
        let id = broker.create_ticket(None).unwrap().id;
        broker.scan_ticket(&id, "user-1").unwrap();
        broker.confirm_ticket(&id, "user-1").await.unwrap();

        let untouched = broker.create_ticket(None).unwrap().id;

        // Not yet observed: stays.
        assert_eq!(broker.sweep().unwrap().evicted, 0);

        broker.poll_status(&id).unwrap();
        let stats = broker.sweep().unwrap();
        assert_eq!(stats.evicted, 1);
        assert!(matches!(broker.poll_status(&id), Err(TicketError::NotFound)));
        assert!(broker.poll_status(&untouched).is_ok());
    }

    #[test]
    fn test_sweep_expires_and_evicts_past_grace() {
        let store = Arc::new(MemoryStore::new());
        let past = Utc::now() - chrono::Duration::seconds(120);

        let mut stale_pending = make_ticket("stale-pending");
        stale_pending.expires_at = past;
        store.create(&stale_pending).unwrap();

        let mut abandoned = make_ticket("abandoned");
        abandoned.expires_at = past;
        abandoned.state = TicketState::Confirmed;
        abandoned.scanned_by = Some("user-1".to_string());
        abandoned.confirmed_session_ref = Some(SessionCredential::new("orphan"));
        store.create(&abandoned).unwrap();

        store.create(&make_ticket("fresh")).unwrap();

        let broker = broker_over(store, quick_settings());
        let stats = broker.sweep().unwrap();

        assert_eq!(stats.expired, 1);
        assert_eq!(stats.evicted, 2);
        assert_eq!(broker.store().count().unwrap(), 1);
        assert!(broker.store().get("fresh").is_ok());
    }

    #[test]
    fn test_sweep_keeps_recent_expiry_within_grace() {
        let store = Arc::new(MemoryStore::new());
        let mut lapsed = make_ticket("lapsed");
        lapsed.expires_at = Utc::now() - chrono::Duration::seconds(1);
        store.create(&lapsed).unwrap();

        let broker = broker_over(store, quick_settings());
        assert_eq!(broker.sweep().unwrap(), SweepStats::default());
        assert_eq!(broker.poll_status("lapsed").unwrap().state, TicketState::Expired);
    }

    #[test]
    fn test_settings_reject_wrapping_ttl() {
        let config = TicketConfig {
            ttl_seconds: u64::MAX,
            ..TicketConfig::default()
        };
        assert!(BrokerSettings::try_from(&config).is_err());

        let settings = BrokerSettings::try_from(&TicketConfig::default()).unwrap();
        assert_eq!(settings.ticket_ttl, chrono::Duration::seconds(120));
        assert_eq!(settings.eviction_grace, chrono::Duration::seconds(60));
    }

    #[test]
    fn test_sweep_survives_huge_grace() {
        let broker = test_broker(BrokerSettings {
            eviction_grace: chrono::Duration::days(1_000_000_000),
            ..quick_settings()
        });
        broker.create_ticket(None).unwrap();
        assert_eq!(broker.sweep().unwrap().evicted, 0);
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }
}
