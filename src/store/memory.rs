//! Process-local OAuth store.
//!
//! Expiry is captured as an absolute timestamp at write time and checked on
//! every read; expired entries are purged when touched. Nothing is serialized,
//! so field encryption does not apply here.

use super::{issued_tokens, Clock, OAuthStore};
use crate::error::Result;
use crate::oauth::types::{
    AccessToken, AuthorizationCode, AuthorizationState, ClientRegistration, OAuthToken,
    RefreshToken,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Clone, Debug)]
struct Entry<T> {
    record: T,
    expires_at: Option<i64>,
}

#[derive(Debug)]
pub struct InMemoryOAuthStore {
    clock: Arc<dyn Clock>,
    clients: DashMap<String, ClientRegistration>,
    states: DashMap<String, Entry<AuthorizationState>>,
    auth_codes: DashMap<String, Entry<AuthorizationCode>>,
    access_tokens: DashMap<String, Entry<AccessToken>>,
    refresh_tokens: DashMap<String, Entry<RefreshToken>>,
    /// refresh token → access token issued alongside it
    refresh_to_access: DashMap<String, String>,
}

impl InMemoryOAuthStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            clients: DashMap::new(),
            states: DashMap::new(),
            auth_codes: DashMap::new(),
            access_tokens: DashMap::new(),
            refresh_tokens: DashMap::new(),
            refresh_to_access: DashMap::new(),
        }
    }

    fn expiry(&self, ttl_seconds: Option<u64>) -> Option<i64> {
        ttl_seconds.map(|ttl| {
            self.clock
                .now()
                .saturating_add(i64::try_from(ttl).unwrap_or(i64::MAX))
        })
    }

    fn is_expired(&self, expires_at: Option<i64>) -> bool {
        expires_at.is_some_and(|at| self.clock.now() > at)
    }

    /// Drops expired entries from every expiring map, along with mapping
    /// entries whose refresh token is gone. Runs on each write so entries
    /// that are never read again do not accumulate.
    fn purge_expired(&self) {
        let now = self.clock.now();
        let live = |expires_at: Option<i64>| expires_at.map_or(true, |at| now <= at);

        self.states.retain(|_, entry| live(entry.expires_at));
        self.auth_codes.retain(|_, entry| live(entry.expires_at));
        self.access_tokens.retain(|_, entry| live(entry.expires_at));
        self.refresh_tokens.retain(|_, entry| live(entry.expires_at));
        self.refresh_to_access
            .retain(|refresh, _| self.refresh_tokens.contains_key(refresh));
    }

    /// Single-use read: the entry is removed whether or not it has expired.
    fn take<T>(&self, map: &DashMap<String, Entry<T>>, key: &str) -> Option<T> {
        let (_, entry) = map.remove(key)?;
        if self.is_expired(entry.expires_at) {
            None
        } else {
            Some(entry.record)
        }
    }

    /// Regular read: expired entries are purged and reported as absent.
    fn read<T: Clone>(&self, map: &DashMap<String, Entry<T>>, key: &str) -> Option<T> {
        if map
            .remove_if(key, |_, entry| self.is_expired(entry.expires_at))
            .is_some()
        {
            return None;
        }
        map.get(key).map(|entry| entry.record.clone())
    }
}

#[async_trait]
impl OAuthStore for InMemoryOAuthStore {
    async fn save_client(&self, client: &ClientRegistration) -> Result<()> {
        self.clients
            .insert(client.client_id.clone(), client.clone());
        Ok(())
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<ClientRegistration>> {
        Ok(self.clients.get(client_id).map(|c| c.clone()))
    }

    async fn save_state(
        &self,
        state: &AuthorizationState,
        state_id: &str,
        ttl_seconds: Option<u64>,
    ) -> Result<()> {
        self.purge_expired();
        self.states.insert(
            state_id.to_string(),
            Entry {
                record: state.clone(),
                expires_at: self.expiry(ttl_seconds),
            },
        );
        Ok(())
    }

    async fn get_state(&self, state_id: &str) -> Result<Option<AuthorizationState>> {
        Ok(self.take(&self.states, state_id))
    }

    async fn save_auth_code(
        &self,
        code: &AuthorizationCode,
        ttl_seconds: Option<u64>,
    ) -> Result<()> {
        self.purge_expired();
        self.auth_codes.insert(
            code.code.clone(),
            Entry {
                record: code.clone(),
                expires_at: self.expiry(ttl_seconds),
            },
        );
        Ok(())
    }

    async fn get_auth_code(&self, code: &str) -> Result<Option<AuthorizationCode>> {
        Ok(self.take(&self.auth_codes, code))
    }

    async fn save_oauth_token(
        &self,
        token: &OAuthToken,
        client_id: &str,
        scopes: &[String],
        resource: Option<&str>,
    ) -> Result<()> {
        let issued = issued_tokens(token, client_id, scopes, resource, self.clock.now())?;
        self.purge_expired();

        let access_key = issued.access.token.clone();
        let access_expires_at = issued.access.expires_at;
        self.access_tokens.insert(
            access_key.clone(),
            Entry {
                record: issued.access,
                expires_at: access_expires_at,
            },
        );

        if let Some(refresh) = issued.refresh {
            let refresh_key = refresh.token.clone();
            let refresh_expires_at = refresh.expires_at;
            self.refresh_tokens.insert(
                refresh_key.clone(),
                Entry {
                    record: refresh,
                    expires_at: refresh_expires_at,
                },
            );
            self.refresh_to_access.insert(refresh_key, access_key);
        }

        Ok(())
    }

    async fn get_access_token(&self, token: &str) -> Result<Option<AccessToken>> {
        Ok(self.read(&self.access_tokens, token))
    }

    async fn get_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>> {
        let refresh = self.read(&self.refresh_tokens, token);
        if refresh.is_none() {
            self.refresh_to_access.remove(token);
        }
        Ok(refresh)
    }

    async fn revoke_refresh_token(&self, token: &str) -> Result<()> {
        self.refresh_tokens.remove(token);
        if let Some((_, access)) = self.refresh_to_access.remove(token) {
            self.access_tokens.remove(&access);
        }
        Ok(())
    }
}
