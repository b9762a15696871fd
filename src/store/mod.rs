//! Persistence for OAuth clients, pending authorizations and issued tokens.
//!
//! Two implementations share the [`OAuthStore`] contract:
//! - [`InMemoryOAuthStore`]: process-local maps, expiry checked on read
//! - [`RedisOAuthStore`]: shared backend, expiry delegated to native TTL,
//!   token keys hashed, sensitive fields optionally encrypted
//!
//! State and code reads are destructive: a successful `get` deletes the record,
//! so a concurrent second reader sees `None`.

pub mod memory;
pub mod redis;

pub use self::memory::InMemoryOAuthStore;
pub use self::redis::{KeyValueBackend, RedisBackend, RedisOAuthStore};

use crate::config::{StoreBackend, StoreConfig};
use crate::credentials::{FieldEncryptor, RecordCodec};
use crate::error::{OAuthError, Result};
use crate::oauth::types::{
    AccessToken, AuthorizationCode, AuthorizationState, ClientRegistration, OAuthToken,
    RefreshToken,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Lifetime of a stored refresh token and its mapping entry (31 days).
pub const REFRESH_TOKEN_TTL_SECS: u64 = 31 * 24 * 60 * 60;

/// Wall clock in unix seconds.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> i64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Settable clock for expiry tests.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(now)),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: i64) {
        self.now.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[async_trait]
pub trait OAuthStore: Send + Sync {
    async fn save_client(&self, client: &ClientRegistration) -> Result<()>;

    async fn get_client(&self, client_id: &str) -> Result<Option<ClientRegistration>>;

    /// Saves a pending authorization. Without a ttl the record never expires.
    async fn save_state(
        &self,
        state: &AuthorizationState,
        state_id: &str,
        ttl_seconds: Option<u64>,
    ) -> Result<()>;

    /// Reads and deletes a pending authorization.
    async fn get_state(&self, state_id: &str) -> Result<Option<AuthorizationState>>;

    async fn save_auth_code(&self, code: &AuthorizationCode, ttl_seconds: Option<u64>)
        -> Result<()>;

    /// Reads and deletes an authorization code.
    async fn get_auth_code(&self, code: &str) -> Result<Option<AuthorizationCode>>;

    /// Stores the access token (ttl = `expires_in`) and, when present, the
    /// refresh token plus the refresh→access mapping (ttl 31 days).
    async fn save_oauth_token(
        &self,
        token: &OAuthToken,
        client_id: &str,
        scopes: &[String],
        resource: Option<&str>,
    ) -> Result<()>;

    async fn get_access_token(&self, token: &str) -> Result<Option<AccessToken>>;

    async fn get_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>>;

    /// Deletes the refresh token, its mapping entry and the mapped access
    /// token. Unknown tokens are a no-op.
    async fn revoke_refresh_token(&self, token: &str) -> Result<()>;
}

/// Records written by `save_oauth_token`, identical for every backend.
pub(crate) struct IssuedTokens {
    pub access: AccessToken,
    pub access_ttl: u64,
    pub refresh: Option<RefreshToken>,
}

pub(crate) fn issued_tokens(
    token: &OAuthToken,
    client_id: &str,
    scopes: &[String],
    resource: Option<&str>,
    now: i64,
) -> Result<IssuedTokens> {
    let expires_in = token
        .expires_in
        .ok_or_else(|| OAuthError::Validation("expires_in must be provided".to_string()))?;
    if expires_in <= 0 {
        return Err(OAuthError::Validation("expires_in must be positive".to_string()));
    }
    let access_ttl = expires_in as u64;
    let access_expires_at = now
        .checked_add(expires_in)
        .ok_or_else(|| OAuthError::Validation("expires_in is out of range".to_string()))?;

    let access = AccessToken {
        token: token.access_token.clone(),
        client_id: client_id.to_string(),
        scopes: scopes.to_vec(),
        resource: resource.map(str::to_string),
        expires_at: Some(access_expires_at),
    };

    let refresh = token.refresh_token.as_ref().map(|refresh_token| RefreshToken {
        token: refresh_token.clone(),
        client_id: client_id.to_string(),
        scopes: scopes.to_vec(),
        expires_at: Some(now.saturating_add(REFRESH_TOKEN_TTL_SECS as i64)),
    });

    Ok(IssuedTokens {
        access,
        access_ttl,
        refresh,
    })
}

/// Builds the configured store backend.
pub async fn build_store(config: &StoreConfig) -> Result<Arc<dyn OAuthStore>> {
    match config.backend {
        StoreBackend::Memory => {
            info!("Using in-memory OAuth store");
            Ok(Arc::new(InMemoryOAuthStore::new(Arc::new(SystemClock))))
        }
        StoreBackend::Redis => {
            let (codec, key_count) = if config.encryption_keys.is_empty() {
                (RecordCodec::plain(), 0)
            } else {
                let encryptor = FieldEncryptor::from_base64_keys(&config.encryption_keys)?;
                let key_count = encryptor.key_count();
                (RecordCodec::encrypted(encryptor), key_count)
            };

            let backend = RedisBackend::connect(
                &config.redis.url(),
                Duration::from_secs(config.operation_timeout_seconds),
            )
            .await?;

            info!(
                host = %config.redis.host,
                port = config.redis.port,
                db = config.redis.db,
                encrypted = codec.is_encrypted(),
                encryption_keys = key_count,
                "Using Redis OAuth store"
            );

            Ok(Arc::new(RedisOAuthStore::new(
                Arc::new(backend),
                codec,
                Arc::new(SystemClock),
            )))
        }
    }
}
