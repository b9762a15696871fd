//! Credential primitives shared by the stores.
//!
//! ```text
//!   record ──► RecordCodec ──► serde_json::Value
//!                  │
//!                  ├─ SENSITIVE_FIELDS ──► FieldEncryptor (AES-256-GCM, key[0])
//!                  │                         └─► {"nonce", "ciphertext"}
//!                  ▼
//!               JSON bytes ──► KeyValueBackend (key = oauth:<kind>:<hash_token(..)>)
//! ```
//!
//! # Security Model
//!
//! - Access and refresh tokens are addressed by their SHA-256 hex digest, never
//!   by raw value
//! - With keys configured, `token`, `client_secret` and `upstream_code` are
//!   encrypted with a unique nonce per value
//! - Keys rotate by prepending: the first key encrypts, all keys decrypt
//! - Keys come from configuration and are never written to the store

pub mod codec;
pub mod encryption;
pub mod tokens;

pub use codec::{RecordCodec, SensitiveFields};
pub use encryption::{validate_key, Envelope, FieldEncryptor};
pub use tokens::{generate_token, hash_token};
