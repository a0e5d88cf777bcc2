pub mod generator;
pub mod identity;
pub mod session;

use serde::Deserialize;

pub use generator::{generate_hex, generate_ticket_id, hash_key};
pub use identity::{IdentityError, IdentityVerifier, RemoteVerifier};
pub use session::{IssueError, RemoteIssuer, SessionIssuer};

/// The `data` member of a JSend success envelope returned by an upstream service
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}
