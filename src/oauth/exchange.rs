//! Token endpoint calls against the upstream identity provider.

use super::provider::UpstreamProvider;
use super::types::OAuthToken;
use crate::error::{OAuthError, Result};
use tracing::{debug, error};

/// Exchange an upstream authorization code for a token pair.
///
/// # Returns
/// * `Ok(OAuthToken)` - Token response as issued by the provider
/// * `Err(UpstreamExchange)` - Non-2xx answer, carrying the upstream status
pub async fn exchange_code(
    http: &reqwest::Client,
    provider: &UpstreamProvider,
    code: &str,
) -> Result<OAuthToken> {
    let form = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("client_id", provider.client_id.as_str()),
        ("client_secret", provider.client_secret.as_str()),
    ];
    request_token(http, provider, &form, "Failed to exchange authorization code").await
}

/// Redeem an upstream refresh token for a new token pair.
pub async fn refresh_token(
    http: &reqwest::Client,
    provider: &UpstreamProvider,
    refresh_token: &str,
) -> Result<OAuthToken> {
    let form = [
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token),
        ("client_id", provider.client_id.as_str()),
        ("client_secret", provider.client_secret.as_str()),
    ];
    request_token(http, provider, &form, "Failed to refresh token").await
}

async fn request_token(
    http: &reqwest::Client,
    provider: &UpstreamProvider,
    form: &[(&str, &str)],
    failure: &str,
) -> Result<OAuthToken> {
    let token_url = provider.token_url();
    debug!(token_url = %token_url, "Requesting upstream token");

    let response = http
        .post(&token_url)
        .header("Accept", "application/json")
        .form(form)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        error!(status = status.as_u16(), body = %body, "{}", failure);
        return Err(OAuthError::UpstreamExchange {
            status: status.as_u16(),
            message: failure.to_string(),
        });
    }

    let token: OAuthToken = response.json().await?;

    debug!(
        has_refresh_token = token.refresh_token.is_some(),
        expires_in = ?token.expires_in,
        "Upstream token request successful"
    );

    Ok(token)
}
