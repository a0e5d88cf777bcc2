use redb::TableDefinition;

/// Login tickets: ticket_id -> Ticket (msgpack)
pub const TICKETS: TableDefinition<&str, &[u8]> = TableDefinition::new("tickets");

/// Expiration index: "{expires_at_ms:020}:{ticket_id}" -> ticket_id
///
/// Keys sort by deadline so the sweep can stop at the first entry still in
/// its window.
pub const TICKET_EXPIRY: TableDefinition<&str, &str> = TableDefinition::new("ticket_expiry");
