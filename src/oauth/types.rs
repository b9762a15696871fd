//! OAuth records persisted by the store and exchanged with clients.

use crate::credentials::SensitiveFields;
use crate::error::{OAuthError, Result};
use serde::{Deserialize, Serialize};

fn default_grant_types() -> Vec<String> {
    vec!["authorization_code".to_string(), "refresh_token".to_string()]
}

fn default_response_types() -> Vec<String> {
    vec!["code".to_string()]
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Dynamically registered downstream client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRegistration {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default = "default_grant_types")]
    pub grant_types: Vec<String>,
    #[serde(default = "default_response_types")]
    pub response_types: Vec<String>,
    /// Space-separated list of scopes the client may request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id_issued_at: Option<i64>,
}

impl ClientRegistration {
    /// Checks requested scopes against the registered scope string.
    ///
    /// No request yields `None`. A client registered without scopes may not
    /// request any.
    pub fn validate_scope(&self, requested: Option<&[String]>) -> Result<Option<Vec<String>>> {
        let Some(requested) = requested else {
            return Ok(None);
        };

        let allowed: Vec<&str> = self
            .scope
            .as_deref()
            .map(|s| s.split_whitespace().collect())
            .unwrap_or_default();

        if let Some(scope) = requested.iter().find(|s| !allowed.contains(&s.as_str())) {
            return Err(OAuthError::InvalidScope(format!(
                "Client was not registered with scope {}",
                scope
            )));
        }

        Ok(Some(requested.to_vec()))
    }

    /// Resolves the redirect URI for an authorization request: an explicit URI
    /// must be registered, an omitted one defaults to the single registered URI.
    pub fn validate_redirect_uri(&self, redirect_uri: Option<&str>) -> Result<String> {
        match redirect_uri {
            Some(uri) if self.redirect_uris.iter().any(|r| r == uri) => Ok(uri.to_string()),
            Some(uri) => Err(OAuthError::Validation(format!(
                "Redirect URI '{}' not registered for client",
                uri
            ))),
            None if self.redirect_uris.len() == 1 => Ok(self.redirect_uris[0].clone()),
            None => Err(OAuthError::Validation(
                "redirect_uri must be specified when client has multiple registered URIs"
                    .to_string(),
            )),
        }
    }
}

impl SensitiveFields for ClientRegistration {
    const SENSITIVE_FIELDS: &'static [&'static str] = &["client_secret"];
}

/// Downstream authorization request after validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorizationParams {
    pub state: Option<String>,
    pub scopes: Option<Vec<String>>,
    pub code_challenge: String,
    pub redirect_uri: String,
    pub redirect_uri_provided_explicitly: bool,
    pub resource: Option<String>,
}

/// Pending authorization, keyed by the state value sent upstream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationState {
    pub redirect_uri: String,
    pub redirect_uri_provided_explicitly: bool,
    pub code_challenge: String,
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
    pub client_id: String,
    #[serde(default)]
    pub resource: Option<String>,
}

impl SensitiveFields for AuthorizationState {
    const SENSITIVE_FIELDS: &'static [&'static str] = &[];
}

/// Downstream code minted after the upstream callback.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub code: String,
    /// Code issued by the identity provider, redeemed at token exchange.
    pub upstream_code: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub redirect_uri_provided_explicitly: bool,
    pub scopes: Vec<String>,
    pub code_challenge: String,
    #[serde(default)]
    pub resource: Option<String>,
    /// Unix seconds.
    pub expires_at: i64,
}

impl SensitiveFields for AuthorizationCode {
    const SENSITIVE_FIELDS: &'static [&'static str] = &["upstream_code"];
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    #[serde(default)]
    pub resource: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl SensitiveFields for AccessToken {
    const SENSITIVE_FIELDS: &'static [&'static str] = &["token"];
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshToken {
    pub token: String,
    pub client_id: String,
    pub scopes: Vec<String>,
    /// Unix seconds.
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl SensitiveFields for RefreshToken {
    const SENSITIVE_FIELDS: &'static [&'static str] = &["token"];
}

/// Token endpoint response, both from the identity provider and to clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// Query parameters the identity provider sends to the callback endpoint.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Where to send the user agent after a successful callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallbackRedirect {
    pub location: String,
}
