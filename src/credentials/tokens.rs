//! Opaque token generation and one-way token hashing.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Bytes of entropy in generated codes and state values.
const TOKEN_BYTES: usize = 32;

/// Generates a random URL-safe token (43 characters).
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// SHA-256 of the token value as lowercase hex. Used as the store key for
/// access and refresh tokens so raw values never appear in the keyspace.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
