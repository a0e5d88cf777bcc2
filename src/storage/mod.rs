pub mod db;
mod memory;
pub mod models;
mod store;
mod tables;
mod tickets;

pub use db::{Database, DatabaseError};
pub use memory::MemoryStore;
pub use store::{StoreError, TicketStore};
pub use tables::*;
