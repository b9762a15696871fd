//! Shared OAuth store on a key/value service.
//!
//! Keys are namespaced `oauth:<kind>:`. Access tokens, refresh tokens and the
//! refresh→access mapping are keyed by [`hash_token`], so raw token values only
//! ever appear inside (optionally encrypted) record values. Expiry is left to
//! the backend's native TTL.

use super::{issued_tokens, Clock, OAuthStore, REFRESH_TOKEN_TTL_SECS};
use crate::credentials::{hash_token, RecordCodec, SensitiveFields};
use crate::error::{OAuthError, Result};
use crate::oauth::types::{
    AccessToken, AuthorizationCode, AuthorizationState, ClientRegistration, OAuthToken,
    RefreshToken,
};
use ::redis::aio::ConnectionManager;
use ::redis::AsyncCommands;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

const CLIENT_PREFIX: &str = "oauth:client:";
const STATE_PREFIX: &str = "oauth:state:";
const AUTH_CODE_PREFIX: &str = "oauth:authcode:";
const ACCESS_PREFIX: &str = "oauth:access:";
const REFRESH_PREFIX: &str = "oauth:refresh:";
const MAPPING_PREFIX: &str = "oauth:mapping:";

/// Minimal key/value contract the store needs from its transport.
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Sets a value, expiring after `ttl_seconds` when given.
    async fn set(&self, key: &str, value: Vec<u8>, ttl_seconds: Option<u64>) -> Result<()>;

    /// Atomically reads and deletes a value.
    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Redis transport with a per-operation timeout.
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
    op_timeout: Duration,
}

impl RedisBackend {
    pub async fn connect(url: &str, op_timeout: Duration) -> Result<Self> {
        let client = ::redis::Client::open(url).map_err(|e| {
            OAuthError::Configuration(format!("Invalid Redis connection settings: {}", e))
        })?;

        let conn = match tokio::time::timeout(op_timeout, ConnectionManager::new(client)).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                error!(error = %e, "Failed to connect to Redis");
                return Err(OAuthError::Store {
                    operation: "CONNECT",
                    message: e.to_string(),
                });
            }
            Err(_) => return Err(OAuthError::Timeout("Redis CONNECT")),
        };

        Ok(Self { conn, op_timeout })
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = ::redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                error!(operation, error = %e, "Redis operation failed");
                Err(OAuthError::Store {
                    operation,
                    message: e.to_string(),
                })
            }
            Err(_) => {
                error!(operation, "Redis operation timed out");
                Err(OAuthError::Timeout(operation))
            }
        }
    }
}

#[async_trait]
impl KeyValueBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        self.bounded("GET", conn.get(key)).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl_seconds: Option<u64>) -> Result<()> {
        let mut conn = self.conn.clone();
        match ttl_seconds {
            Some(ttl) => self.bounded("SETEX", conn.set_ex(key, value, ttl)).await,
            None => self.bounded("SET", conn.set(key, value)).await,
        }
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let cmd = ::redis::cmd("GETDEL").arg(key).clone();
        self.bounded("GETDEL", async move { cmd.query_async(&mut conn).await })
            .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        self.bounded("DEL", conn.del(key)).await
    }
}

pub struct RedisOAuthStore {
    backend: Arc<dyn KeyValueBackend>,
    codec: RecordCodec,
    clock: Arc<dyn Clock>,
}

impl RedisOAuthStore {
    pub fn new(backend: Arc<dyn KeyValueBackend>, codec: RecordCodec, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            codec,
            clock,
        }
    }

    async fn put<T>(&self, key: &str, record: &T, ttl_seconds: Option<u64>) -> Result<()>
    where
        T: Serialize + SensitiveFields + Sync,
    {
        let bytes = self.codec.encode(record)?;
        self.backend.set(key, bytes, ttl_seconds).await
    }

    async fn fetch<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + SensitiveFields,
    {
        match self.backend.get(key).await? {
            Some(bytes) => Ok(Some(self.codec.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn consume<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + SensitiveFields,
    {
        match self.backend.take(key).await? {
            Some(bytes) => Ok(Some(self.codec.decode(&bytes)?)),
            None => Ok(None),
        }
    }
}

fn access_key(token_hash: &str) -> String {
    format!("{}{}", ACCESS_PREFIX, token_hash)
}

fn refresh_key(token_hash: &str) -> String {
    format!("{}{}", REFRESH_PREFIX, token_hash)
}

fn mapping_key(refresh_hash: &str) -> String {
    format!("{}{}", MAPPING_PREFIX, refresh_hash)
}

#[async_trait]
impl OAuthStore for RedisOAuthStore {
    async fn save_client(&self, client: &ClientRegistration) -> Result<()> {
        let key = format!("{}{}", CLIENT_PREFIX, client.client_id);
        self.put(&key, client, None).await
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<ClientRegistration>> {
        self.fetch(&format!("{}{}", CLIENT_PREFIX, client_id)).await
    }

    async fn save_state(
        &self,
        state: &AuthorizationState,
        state_id: &str,
        ttl_seconds: Option<u64>,
    ) -> Result<()> {
        let key = format!("{}{}", STATE_PREFIX, state_id);
        self.put(&key, state, ttl_seconds).await
    }

    async fn get_state(&self, state_id: &str) -> Result<Option<AuthorizationState>> {
        self.consume(&format!("{}{}", STATE_PREFIX, state_id)).await
    }

    async fn save_auth_code(
        &self,
        code: &AuthorizationCode,
        ttl_seconds: Option<u64>,
    ) -> Result<()> {
        let key = format!("{}{}", AUTH_CODE_PREFIX, code.code);
        self.put(&key, code, ttl_seconds).await
    }

    async fn get_auth_code(&self, code: &str) -> Result<Option<AuthorizationCode>> {
        self.consume(&format!("{}{}", AUTH_CODE_PREFIX, code)).await
    }

    async fn save_oauth_token(
        &self,
        token: &OAuthToken,
        client_id: &str,
        scopes: &[String],
        resource: Option<&str>,
    ) -> Result<()> {
        let issued = issued_tokens(token, client_id, scopes, resource, self.clock.now())?;
        let access_hash = hash_token(&issued.access.token);

        self.put(&access_key(&access_hash), &issued.access, Some(issued.access_ttl))
            .await?;

        if let Some(refresh) = &issued.refresh {
            let refresh_hash = hash_token(&refresh.token);
            self.put(
                &refresh_key(&refresh_hash),
                refresh,
                Some(REFRESH_TOKEN_TTL_SECS),
            )
            .await?;
            self.put(
                &mapping_key(&refresh_hash),
                &access_hash,
                Some(REFRESH_TOKEN_TTL_SECS),
            )
            .await?;
        }

        debug!(
            client_id = %client_id,
            access_hash = %&access_hash[..8],
            has_refresh_token = issued.refresh.is_some(),
            "Stored OAuth token"
        );
        Ok(())
    }

    async fn get_access_token(&self, token: &str) -> Result<Option<AccessToken>> {
        self.fetch(&access_key(&hash_token(token))).await
    }

    async fn get_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>> {
        self.fetch(&refresh_key(&hash_token(token))).await
    }

    async fn revoke_refresh_token(&self, token: &str) -> Result<()> {
        let refresh_hash = hash_token(token);
        let mapped_access: Option<String> = self.consume(&mapping_key(&refresh_hash)).await?;

        self.backend.delete(&refresh_key(&refresh_hash)).await?;
        if let Some(access_hash) = mapped_access {
            self.backend.delete(&access_key(&access_hash)).await?;
        }
        Ok(())
    }
}
