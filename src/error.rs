//! Error type shared by the store, the authorization coordinator and the
//! service-account refresher.

use thiserror::Error;

/// Result alias used across the library seams.
pub type Result<T, E = OAuthError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum OAuthError {
    /// Upstream callback arrived without a code or state.
    #[error("invalid callback data")]
    InvalidCallback,

    /// State is unknown, already consumed or expired.
    #[error("invalid state")]
    InvalidState,

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("invalid scope: {0}")]
    InvalidScope(String),

    #[error("invalid client: {0}")]
    InvalidClient(String),

    #[error("invalid grant: {0}")]
    InvalidGrant(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    /// Non-2xx answer from the identity provider or the token-issuance
    /// endpoint. Never retried by the coordinator.
    #[error("{message} (upstream status {status})")]
    UpstreamExchange { status: u16, message: String },

    /// No key in the rotation list authenticates the stored field.
    #[error("no configured encryption key could decrypt the stored field")]
    Decryption,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("store operation {operation} failed: {message}")]
    Store {
        operation: &'static str,
        message: String,
    },

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0} is not supported")]
    Unsupported(&'static str),
}

impl OAuthError {
    /// RFC 6749 error code for this failure, as sent in token endpoint bodies.
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            OAuthError::InvalidCallback | OAuthError::InvalidState | OAuthError::Validation(_) => {
                "invalid_request"
            }
            OAuthError::InvalidScope(_) => "invalid_scope",
            OAuthError::InvalidClient(_) => "invalid_client",
            OAuthError::InvalidGrant(_) | OAuthError::NotFound(_) => "invalid_grant",
            OAuthError::Unsupported(_) => "unsupported_token_type",
            _ => "server_error",
        }
    }
}
