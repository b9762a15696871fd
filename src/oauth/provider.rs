//! Upstream identity provider endpoints and credentials.

use serde::{Deserialize, Serialize};

/// Identity provider the proxy relays authorization to.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpstreamProvider {
    /// Issuer base URL; `/authorize` and `/token` are resolved against it.
    pub issuer_url: String,

    /// Client ID registered with the provider
    pub client_id: String,

    /// Client secret registered with the provider
    pub client_secret: String,
}

impl UpstreamProvider {
    pub fn new(issuer_url: &str, client_id: &str, client_secret: &str) -> Self {
        Self {
            issuer_url: issuer_url.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        }
    }

    pub fn authorize_url(&self) -> String {
        format!("{}/authorize", self.issuer_url)
    }

    pub fn token_url(&self) -> String {
        format!("{}/token", self.issuer_url)
    }

    /// Build authorization URL with state and redirect_uri. The `scope`
    /// parameter is omitted when no scopes are given.
    pub fn build_auth_url(&self, state: &str, redirect_uri: &str, scopes: Option<&[String]>) -> String {
        let mut url = format!(
            "{}?response_type=code&client_id={}&redirect_uri={}",
            self.authorize_url(),
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
        );

        if let Some(scopes) = scopes.filter(|s| !s.is_empty()) {
            url.push_str("&scope=");
            url.push_str(&urlencoding::encode(&scopes.join(" ")));
        }

        url.push_str("&state=");
        url.push_str(&urlencoding::encode(state));
        url
    }
}
