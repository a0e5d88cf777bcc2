//! The login ticket state machine.
//!
//! ```text
//! Pending ──scan──> Scanned ──confirm──> Confirmed ──consume──> Consumed
//!    │                 │
//!    ├──cancel──┐      ├──cancel──> Cancelled
//!    │          └──────┘
//!    └──deadline──> Expired <──deadline── Scanned
//! ```
//!
//! Everything here is pure: the checks look at a ticket and a clock reading
//! and either reject the request or hand back a [`Transition`] to be applied
//! through the store's compare-and-swap.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::storage::models::{SessionCredential, Ticket, TicketState};

/// Why a requested transition is not legal for the ticket as read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("Session credential already claimed")]
    AlreadyConsumed,
    #[error("Ticket is not in a state that allows this")]
    Conflict,
    #[error("QR code expired, generate a new one")]
    Expired,
    #[error("Not allowed")]
    Forbidden,
}

/// A state change, ready to be applied inside compare-and-swap
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Cancel,
    Confirm { credential: SessionCredential },
    Consume,
    Expire,
    Scan { scanner: String },
}

impl Transition {
    pub fn target(&self) -> TicketState {
        match self {
            Transition::Cancel => TicketState::Cancelled,
            Transition::Confirm { .. } => TicketState::Confirmed,
            Transition::Consume => TicketState::Consumed,
            Transition::Expire => TicketState::Expired,
            Transition::Scan { .. } => TicketState::Scanned,
        }
    }

    /// Write the transition into `ticket`, keeping `scanned_by` and
    /// `confirmed_session_ref` in step with the new state.
    pub fn apply(&self, ticket: &mut Ticket, now: DateTime<Utc>) {
        debug_assert!(
            is_legal_edge(ticket.state, self.target()),
            "illegal edge {} -> {}",
            ticket.state,
            self.target()
        );

        match self {
            Transition::Scan { scanner } => {
                ticket.scanned_by = Some(scanner.clone());
            }
            Transition::Confirm { credential } => {
                ticket.confirmed_session_ref = Some(credential.clone());
            }
            Transition::Cancel | Transition::Consume | Transition::Expire => {
                ticket.scanned_by = None;
            }
        }
        ticket.state = self.target();
        ticket.updated_at = now;
    }
}

/// The edges of the graph above. Nothing else is ever written.
pub fn is_legal_edge(from: TicketState, to: TicketState) -> bool {
    use TicketState::*;
    matches!(
        (from, to),
        (Pending, Scanned)
            | (Pending, Cancelled)
            | (Pending, Expired)
            | (Scanned, Confirmed)
            | (Scanned, Cancelled)
            | (Scanned, Expired)
            | (Confirmed, Consumed)
    )
}

/// The passive expiry check run before every read and mutation.
pub fn lapse(ticket: &Ticket, now: DateTime<Utc>) -> Option<Transition> {
    (ticket.state.is_live() && ticket.is_past_deadline(now)).then_some(Transition::Expire)
}

/// Rejection shared by every operation on a ticket whose deadline matters.
fn reject_if_expired(ticket: &Ticket, now: DateTime<Utc>) -> Result<(), Rejection> {
    if ticket.state == TicketState::Expired || lapse(ticket, now).is_some() {
        return Err(Rejection::Expired);
    }
    Ok(())
}

/// Attach `scanner` to a pending ticket. Only one scanner may ever attach.
pub fn scan(
    ticket: &Ticket,
    scanner: &str,
    now: DateTime<Utc>,
) -> Result<Transition, Rejection> {
    reject_if_expired(ticket, now)?;
    match ticket.state {
        TicketState::Pending => Ok(Transition::Scan {
            scanner: scanner.to_string(),
        }),
        _ => Err(Rejection::Conflict),
    }
}

/// Check that `scanner` may confirm. The credential is minted by the caller
/// only after this passes.
pub fn check_confirm(
    ticket: &Ticket,
    scanner: &str,
    now: DateTime<Utc>,
) -> Result<(), Rejection> {
    reject_if_expired(ticket, now)?;
    match ticket.state {
        TicketState::Scanned if ticket.scanned_by.as_deref() == Some(scanner) => Ok(()),
        TicketState::Scanned => Err(Rejection::Forbidden),
        _ => Err(Rejection::Conflict),
    }
}

pub fn confirm(
    ticket: &Ticket,
    scanner: &str,
    credential: SessionCredential,
    now: DateTime<Utc>,
) -> Result<Transition, Rejection> {
    check_confirm(ticket, scanner, now)?;
    Ok(Transition::Confirm { credential })
}

/// Who is asking to cancel
#[derive(Debug, Clone, Copy, Default)]
pub struct Canceller<'a> {
    /// Authenticated mobile identity, if any
    pub scanner: Option<&'a str>,
    /// Whether the caller proved it created the ticket
    pub is_creator: bool,
}

/// Pending tickets can be abandoned by whoever holds the id. Once scanned,
/// only the scanner or the proven creator may cancel.
pub fn cancel(
    ticket: &Ticket,
    caller: Canceller<'_>,
    now: DateTime<Utc>,
) -> Result<Transition, Rejection> {
    reject_if_expired(ticket, now)?;
    match ticket.state {
        TicketState::Pending => Ok(Transition::Cancel),
        TicketState::Scanned => {
            let is_scanner =
                caller.scanner.is_some() && caller.scanner == ticket.scanned_by.as_deref();
            if is_scanner || caller.is_creator {
                Ok(Transition::Cancel)
            } else {
                Err(Rejection::Forbidden)
            }
        }
        _ => Err(Rejection::Conflict),
    }
}

/// Claim the credential of a confirmed ticket. Succeeds once per ticket.
pub fn consume(ticket: &Ticket) -> Result<Transition, Rejection> {
    match ticket.state {
        TicketState::Confirmed => Ok(Transition::Consume),
        TicketState::Consumed => Err(Rejection::AlreadyConsumed),
        TicketState::Expired => Err(Rejection::Expired),
        _ => Err(Rejection::Conflict),
    }
}
