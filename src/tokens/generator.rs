use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Length in bytes of ticket ids (192 bits)
pub const TICKET_ID_BYTES: usize = 24;

/// Length in bytes of creator keys and locally minted session credentials
pub const SECRET_BYTES: usize = 32;

/// Generate `len` bytes from the OS-seeded CSPRNG, hex encoded.
pub fn generate_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generate a fresh login ticket id
pub fn generate_ticket_id() -> String {
    generate_hex(TICKET_ID_BYTES)
}

/// SHA-256 of a secret, hex encoded (what we store instead of the secret)
pub fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Compare two hex digests in constant time.
pub fn digests_match(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
