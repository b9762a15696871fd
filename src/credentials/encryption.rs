//! AES-256-GCM encryption for sensitive record fields.
//!
//! Each field is encrypted separately with a unique nonce. Keys are supplied as
//! an ordered list, newest first: encryption always uses the first key and
//! decryption tries every key in order, so a retired key can stay in the list
//! until all data written under it has expired.

use crate::error::{OAuthError, Result};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Encrypted field as it is written into a stored record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub nonce: String,
    pub ciphertext: String,
}

/// Validates that a key is exactly 32 bytes when base64 decoded.
///
/// # Arguments
/// * `key_base64` - Base64-encoded key
///
/// # Returns
/// * `Ok(Vec<u8>)` - Decoded key bytes (32 bytes)
/// * `Err` - If key is invalid length or invalid base64
pub fn validate_key(key_base64: &str) -> Result<Vec<u8>> {
    let key_bytes = BASE64.decode(key_base64.trim()).map_err(|e| {
        OAuthError::Configuration(format!("Failed to decode base64 encryption key: {}", e))
    })?;

    if key_bytes.len() != KEY_SIZE {
        return Err(OAuthError::Configuration(format!(
            "Encryption key must be {} bytes (256 bits), got {} bytes",
            KEY_SIZE,
            key_bytes.len()
        )));
    }

    Ok(key_bytes)
}

/// Field encryptor holding the rotation list of ciphers.
pub struct FieldEncryptor {
    ciphers: Vec<Aes256Gcm>,
}

impl std::fmt::Debug for FieldEncryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldEncryptor")
            .field("keys", &self.ciphers.len())
            .finish()
    }
}

impl FieldEncryptor {
    /// Build an encryptor from raw 32-byte keys, newest first.
    ///
    /// # Returns
    /// * `Err(Configuration)` - If the list is empty or a key has the wrong size
    pub fn new(keys: Vec<Vec<u8>>) -> Result<Self> {
        if keys.is_empty() {
            return Err(OAuthError::Configuration(
                "At least one encryption key is required".to_string(),
            ));
        }

        let ciphers = keys
            .iter()
            .map(|key| {
                Aes256Gcm::new_from_slice(key).map_err(|_| {
                    OAuthError::Configuration(format!(
                        "Encryption key must be {} bytes, got {} bytes",
                        KEY_SIZE,
                        key.len()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { ciphers })
    }

    /// Build an encryptor from base64-encoded keys, newest first.
    pub fn from_base64_keys<S: AsRef<str>>(keys: &[S]) -> Result<Self> {
        let decoded = keys
            .iter()
            .map(|key| validate_key(key.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Self::new(decoded)
    }

    /// Number of keys in the rotation list.
    pub fn key_count(&self) -> usize {
        self.ciphers.len()
    }

    /// Encrypts plaintext with the current (first) key and a random nonce.
    ///
    /// # Security
    /// - Uses a cryptographically secure random nonce (never reuse)
    /// - Authenticated encryption (tampering detected)
    pub fn encrypt(&self, plaintext: &str) -> Result<Envelope> {
        let cipher = self.ciphers.first().ok_or_else(|| {
            OAuthError::Configuration("At least one encryption key is required".to_string())
        })?;

        // Generate random nonce (never reuse!)
        let nonce_bytes = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext_bytes = cipher
            .encrypt(&nonce_bytes, plaintext.as_bytes())
            .map_err(|e| OAuthError::Configuration(format!("Encryption failed: {}", e)))?;

        Ok(Envelope {
            nonce: BASE64.encode(nonce_bytes),
            ciphertext: BASE64.encode(ciphertext_bytes),
        })
    }

    /// Decrypts an envelope, trying every key in list order.
    ///
    /// # Returns
    /// * `Ok(String)` - Decrypted plaintext from the first key that authenticates
    /// * `Err(Decryption)` - If no key matches or the envelope is malformed
    pub fn decrypt(&self, envelope: &Envelope) -> Result<String> {
        let ciphertext_bytes = BASE64
            .decode(&envelope.ciphertext)
            .map_err(|_| OAuthError::Decryption)?;
        let nonce_bytes = BASE64
            .decode(&envelope.nonce)
            .map_err(|_| OAuthError::Decryption)?;

        if nonce_bytes.len() != NONCE_SIZE {
            return Err(OAuthError::Decryption);
        }
        let nonce = Nonce::from_slice(&nonce_bytes);

        let plaintext_bytes = self
            .ciphers
            .iter()
            .find_map(|cipher| cipher.decrypt(nonce, ciphertext_bytes.as_ref()).ok())
            .ok_or(OAuthError::Decryption)?;

        String::from_utf8(plaintext_bytes).map_err(|_| OAuthError::Decryption)
    }
}
