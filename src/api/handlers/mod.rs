mod admin;
mod tickets;

use crate::api::response::ApiError;
use crate::broker::TicketError;

pub use admin::{admin_purge, health};
pub use tickets::{cancel_ticket, confirm_ticket, create_ticket, get_status, scan_ticket};

/// Map a TicketError to an ApiError
fn ticket_error(e: TicketError) -> ApiError {
    match e {
        // A claimed credential is gone for good; do not hint that it existed.
        TicketError::NotFound | TicketError::AlreadyConsumed => {
            ApiError::not_found("Ticket not found")
        }
        TicketError::Expired => ApiError::gone(e.to_string()),
        TicketError::Forbidden => ApiError::forbidden("Not allowed"),
        TicketError::Conflict => ApiError::conflict("Ticket is not in a state that allows this"),
        TicketError::Busy => ApiError::unavailable(e.to_string()),
        TicketError::Issue(ref inner) => {
            tracing::error!(error = %inner, "Session issuer failed");
            ApiError::bad_gateway("Session service unavailable")
        }
        TicketError::Storage(ref inner) => {
            tracing::error!(error = %inner, "Ticket storage failed");
            ApiError::internal("Storage error")
        }
    }
}
