//! JSON serialization of stored records with optional field-level encryption.

use super::encryption::{Envelope, FieldEncryptor};
use crate::error::{OAuthError, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Records that carry secret string fields. Only the named top-level fields
/// are encrypted; everything else stays readable in the store.
pub trait SensitiveFields {
    const SENSITIVE_FIELDS: &'static [&'static str];
}

impl SensitiveFields for String {
    const SENSITIVE_FIELDS: &'static [&'static str] = &[];
}

/// Converts records to bytes for a networked store and back.
#[derive(Clone, Debug, Default)]
pub struct RecordCodec {
    encryptor: Option<Arc<FieldEncryptor>>,
}

impl RecordCodec {
    /// Codec that writes plain JSON.
    pub fn plain() -> Self {
        Self { encryptor: None }
    }

    /// Codec that wraps sensitive fields in an encryption envelope.
    pub fn encrypted(encryptor: FieldEncryptor) -> Self {
        Self {
            encryptor: Some(Arc::new(encryptor)),
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryptor.is_some()
    }

    pub fn encode<T>(&self, record: &T) -> Result<Vec<u8>>
    where
        T: Serialize + SensitiveFields,
    {
        let mut value = serde_json::to_value(record)?;

        if let (Some(encryptor), Value::Object(fields)) = (&self.encryptor, &mut value) {
            for name in T::SENSITIVE_FIELDS {
                if let Some(Value::String(plaintext)) = fields.get(*name) {
                    let envelope = encryptor.encrypt(plaintext)?;
                    fields.insert((*name).to_string(), serde_json::to_value(envelope)?);
                }
            }
        }

        Ok(serde_json::to_vec(&value)?)
    }

    /// Decodes a record. Plain string fields are accepted whether or not an
    /// encryptor is configured; an envelope without an encryptor is a
    /// decryption failure.
    pub fn decode<T>(&self, bytes: &[u8]) -> Result<T>
    where
        T: DeserializeOwned + SensitiveFields,
    {
        let mut value: Value = serde_json::from_slice(bytes)?;

        if let Value::Object(fields) = &mut value {
            for name in T::SENSITIVE_FIELDS {
                let Some(field @ Value::Object(_)) = fields.get(*name) else {
                    continue;
                };
                let envelope: Envelope =
                    serde_json::from_value(field.clone()).map_err(|_| OAuthError::Decryption)?;
                let encryptor = self.encryptor.as_ref().ok_or(OAuthError::Decryption)?;
                let plaintext = encryptor.decrypt(&envelope)?;
                fields.insert((*name).to_string(), Value::String(plaintext));
            }
        }

        Ok(serde_json::from_value(value)?)
    }
}
