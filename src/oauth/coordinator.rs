use super::exchange;
use super::pkce;
use super::provider::UpstreamProvider;
use super::types::{
    AccessToken, AuthorizationCode, AuthorizationParams, AuthorizationState, CallbackParams,
    CallbackRedirect, ClientRegistration, OAuthToken, RefreshToken,
};
use crate::config::OAuthConfig;
use crate::credentials::generate_token;
use crate::error::{OAuthError, Result};
use crate::store::{Clock, OAuthStore, SystemClock};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;


/// Path of the endpoint the identity provider redirects back to.
pub const CALLBACK_PATH: &str = "/oauth/callback";

#[derive(Clone, Debug)]
pub struct CoordinatorSettings {
    /// Public base URL of this server.
    pub server_url: String,
    /// Scopes recorded on a code when the authorization request named none.
    pub default_scopes: Vec<String>,
    /// When false, requested scopes are neither validated nor sent upstream.
    pub use_scopes: bool,
    pub state_ttl_seconds: u64,
    pub code_ttl_seconds: u64,
}

/// Relays the authorization-code flow between downstream clients and the
/// upstream identity provider. All flow state lives in the store.
pub struct AuthorizationCoordinator {
    store: Arc<dyn OAuthStore>,
    upstream: UpstreamProvider,
    settings: CoordinatorSettings,
    http: reqwest::Client,
    clock: Arc<dyn Clock>,
}

impl AuthorizationCoordinator {
    pub fn new(
        store: Arc<dyn OAuthStore>,
        upstream: UpstreamProvider,
        settings: CoordinatorSettings,
        http: reqwest::Client,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            upstream,
            settings,
            http,
            clock,
        }
    }

    pub fn from_config(
        config: &OAuthConfig,
        server_url: &str,
        store: Arc<dyn OAuthStore>,
    ) -> Result<Self> {
        let (Some(client_id), Some(client_secret)) = (&config.client_id, &config.client_secret)
        else {
            return Err(OAuthError::Configuration(
                "OAuth client_id and client_secret are required when OAuth is enabled".to_string(),
            ));
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| OAuthError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        let settings = CoordinatorSettings {
            server_url: server_url.trim_end_matches('/').to_string(),
            default_scopes: config.scopes.clone().unwrap_or_default(),
            use_scopes: config.use_scopes,
            state_ttl_seconds: config.state_ttl_seconds,
            code_ttl_seconds: config.code_ttl_seconds,
        };

        Ok(Self::new(
            store,
            UpstreamProvider::new(&config.issuer_url, client_id, client_secret),
            settings,
            http,
            Arc::new(SystemClock),
        ))
    }

    pub fn server_url(&self) -> &str {
        &self.settings.server_url
    }

    pub fn default_scopes(&self) -> &[String] {
        &self.settings.default_scopes
    }

    /// Redirect URI registered with the identity provider.
    pub fn callback_url(&self) -> String {
        format!("{}{}", self.settings.server_url, CALLBACK_PATH)
    }

    pub async fn get_client(&self, client_id: &str) -> Result<Option<ClientRegistration>> {
        self.store.get_client(client_id).await
    }

    pub async fn register_client(&self, client: &ClientRegistration) -> Result<()> {
        self.store.save_client(client).await?;
        info!(client_id = %client.client_id, "Registered OAuth client");
        Ok(())
    }

    /// Looks up a client and checks the presented secret, if one was
    /// registered.
    pub async fn authenticate_client(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
    ) -> Result<ClientRegistration> {
        let client = self
            .store
            .get_client(client_id)
            .await?
            .ok_or_else(|| OAuthError::InvalidClient("Unknown client".to_string()))?;

        if let Some(expected) = &client.client_secret {
            if client_secret != Some(expected.as_str()) {
                warn!(client_id = %client_id, "Client secret mismatch");
                return Err(OAuthError::InvalidClient("Invalid client secret".to_string()));
            }
        }

        Ok(client)
    }

    /// Records the pending authorization and returns the upstream URL the
    /// user agent should be sent to.
    pub async fn authorize(
        &self,
        client: &ClientRegistration,
        params: AuthorizationParams,
    ) -> Result<String> {
        let scopes = if self.settings.use_scopes {
            client.validate_scope(params.scopes.as_deref())?
        } else {
            None
        };

        let state_id = params.state.unwrap_or_else(generate_token);
        let state = AuthorizationState {
            redirect_uri: params.redirect_uri,
            redirect_uri_provided_explicitly: params.redirect_uri_provided_explicitly,
            code_challenge: params.code_challenge,
            scopes,
            client_id: client.client_id.clone(),
            resource: params.resource,
        };

        self.store
            .save_state(&state, &state_id, Some(self.settings.state_ttl_seconds))
            .await?;

        debug!(client_id = %client.client_id, "Authorization state saved, redirecting upstream");

        Ok(self
            .upstream
            .build_auth_url(&state_id, &self.callback_url(), state.scopes.as_deref()))
    }

    /// Consumes the pending authorization and mints a downstream code bound
    /// to the upstream one.
    pub async fn handle_upstream_callback(&self, params: &CallbackParams) -> Result<CallbackRedirect> {
        if let Some(error) = &params.error {
            warn!(
                error = %error,
                description = params.error_description.as_deref().unwrap_or(""),
                "Identity provider returned an error"
            );
        }

        let (Some(upstream_code), Some(state_id)) = (params.code.as_deref(), params.state.as_deref())
        else {
            return Err(OAuthError::InvalidCallback);
        };

        let state = self.store.get_state(state_id).await?.ok_or_else(|| {
            warn!("Unknown or expired authorization state");
            OAuthError::InvalidState
        })?;

        let code = AuthorizationCode {
            code: generate_token(),
            upstream_code: upstream_code.to_string(),
            client_id: state.client_id,
            redirect_uri: state.redirect_uri,
            redirect_uri_provided_explicitly: state.redirect_uri_provided_explicitly,
            scopes: state
                .scopes
                .unwrap_or_else(|| self.settings.default_scopes.clone()),
            code_challenge: state.code_challenge,
            resource: state.resource,
            expires_at: self.clock.now() + self.settings.code_ttl_seconds as i64,
        };

        self.store
            .save_auth_code(&code, Some(self.settings.code_ttl_seconds))
            .await?;

        let mut location = Url::parse(&code.redirect_uri)
            .map_err(|e| OAuthError::Validation(format!("Invalid redirect_uri: {}", e)))?;
        location
            .query_pairs_mut()
            .append_pair("code", &code.code)
            .append_pair("state", state_id);

        info!(client_id = %code.client_id, "Authorization code issued");

        Ok(CallbackRedirect {
            location: location.to_string(),
        })
    }

    /// Reads the code. The read is destructive, so a code can be loaded once.
    pub async fn load_authorization_code(
        &self,
        client: &ClientRegistration,
        code: &str,
    ) -> Result<Option<AuthorizationCode>> {
        let loaded = self.store.get_auth_code(code).await?;
        if loaded.is_none() {
            debug!(client_id = %client.client_id, "Authorization code not found");
        }
        Ok(loaded)
    }

    /// Checks a loaded code against the token request: owner, expiry,
    /// redirect URI and PKCE verifier.
    pub fn verify_code_grant(
        &self,
        client: &ClientRegistration,
        code: &AuthorizationCode,
        code_verifier: Option<&str>,
        redirect_uri: Option<&str>,
    ) -> Result<()> {
        if code.client_id != client.client_id {
            return Err(OAuthError::InvalidGrant(
                "Authorization code was not issued to this client".to_string(),
            ));
        }

        if code.expires_at < self.clock.now() {
            return Err(OAuthError::InvalidGrant("Authorization code has expired".to_string()));
        }

        if code.redirect_uri_provided_explicitly && redirect_uri != Some(code.redirect_uri.as_str())
        {
            return Err(OAuthError::InvalidGrant(
                "redirect_uri did not match the one used when creating the code".to_string(),
            ));
        }

        let verifier = code_verifier
            .ok_or_else(|| OAuthError::Validation("code_verifier is required".to_string()))?;
        if !pkce::verify_s256(verifier, &code.code_challenge) {
            warn!(client_id = %client.client_id, "PKCE verification failed");
            return Err(OAuthError::InvalidGrant("Incorrect code_verifier".to_string()));
        }

        Ok(())
    }

    pub async fn exchange_authorization_code(
        &self,
        client: &ClientRegistration,
        code: &AuthorizationCode,
    ) -> Result<OAuthToken> {
        let token = exchange::exchange_code(&self.http, &self.upstream, &code.upstream_code).await?;

        self.store
            .save_oauth_token(
                &token,
                &client.client_id,
                &code.scopes,
                code.resource.as_deref(),
            )
            .await?;

        info!(
            client_id = %client.client_id,
            has_refresh_token = token.refresh_token.is_some(),
            "Authorization code exchanged"
        );
        Ok(token)
    }

    pub async fn load_refresh_token(
        &self,
        client: &ClientRegistration,
        refresh_token: &str,
    ) -> Result<Option<RefreshToken>> {
        let loaded = self.store.get_refresh_token(refresh_token).await?;
        if loaded.is_none() {
            debug!(client_id = %client.client_id, "Refresh token not found");
        }
        Ok(loaded)
    }

    /// Rotates a refresh token through the identity provider. The old token
    /// is revoked before the new pair is saved; the two writes are not atomic.
    pub async fn exchange_refresh_token(
        &self,
        client: &ClientRegistration,
        refresh_token: &RefreshToken,
        scopes: &[String],
    ) -> Result<OAuthToken> {
        let token = exchange::refresh_token(&self.http, &self.upstream, &refresh_token.token).await?;

        let scopes = if scopes.is_empty() {
            refresh_token.scopes.clone()
        } else {
            scopes.to_vec()
        };

        self.store.revoke_refresh_token(&refresh_token.token).await?;
        self.store
            .save_oauth_token(&token, &client.client_id, &scopes, None)
            .await?;

        info!(client_id = %client.client_id, "Refresh token rotated");
        Ok(token)
    }

    pub async fn load_access_token(&self, token: &str) -> Result<Option<AccessToken>> {
        self.store.get_access_token(token).await
    }

    /// Access tokens cannot be revoked directly; they only go away with
    /// their refresh token or on expiry.
    pub async fn revoke_token(&self, _token: &AccessToken) -> Result<()> {
        Err(OAuthError::Unsupported("access token revocation"))
    }
}
