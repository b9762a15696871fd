//! PKCE (RFC 7636) S256 challenge handling.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use sha2::{Digest, Sha256};

/// The only challenge method the proxy accepts.
pub const METHOD_S256: &str = "S256";

/// `BASE64URL-NOPAD(SHA256(verifier))`
pub fn s256_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// True when the verifier hashes to the stored challenge.
pub fn verify_s256(verifier: &str, challenge: &str) -> bool {
    s256_challenge(verifier) == challenge
}
