use super::{AppError, OAuthAppState};
use crate::error::OAuthError;
use crate::oauth::{ClientRegistration, OAuthToken};
use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Json, Response},
    Form,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Token request body (application/x-www-form-urlencoded)
#[derive(Debug, Deserialize)]
pub(super) struct TokenForm {
    grant_type: String,
    client_id: String,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    code_verifier: Option<String>,
    #[serde(default)]
    redirect_uri: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

/// POST /token
pub(super) async fn token(
    State(state): State<Arc<OAuthAppState>>,
    Form(form): Form<TokenForm>,
) -> Result<Response, AppError> {
    debug!(client_id = %form.client_id, grant_type = %form.grant_type, "Token request");

    let client = state
        .coordinator
        .authenticate_client(&form.client_id, form.client_secret.as_deref())
        .await?;

    let token = match form.grant_type.as_str() {
        "authorization_code" => authorization_code_grant(&state, &client, &form).await?,
        "refresh_token" => refresh_token_grant(&state, &client, &form).await?,
        other => {
            warn!(grant_type = %other, "Unsupported grant type");
            return Err(AppError::bad_request(
                "unsupported_grant_type",
                format!("Unsupported grant_type '{}'", other),
            ));
        }
    };

    Ok((
        [
            (header::CACHE_CONTROL, "no-store"),
            (header::PRAGMA, "no-cache"),
        ],
        Json(token),
    )
        .into_response())
}

async fn authorization_code_grant(
    state: &OAuthAppState,
    client: &ClientRegistration,
    form: &TokenForm,
) -> Result<OAuthToken, AppError> {
    let code = form
        .code
        .as_deref()
        .ok_or_else(|| AppError::bad_request("invalid_request", "code is required"))?;

    let code = state
        .coordinator
        .load_authorization_code(client, code)
        .await?
        .ok_or(OAuthError::NotFound("authorization code"))?;

    state.coordinator.verify_code_grant(
        client,
        &code,
        form.code_verifier.as_deref(),
        form.redirect_uri.as_deref(),
    )?;

    Ok(state
        .coordinator
        .exchange_authorization_code(client, &code)
        .await?)
}

async fn refresh_token_grant(
    state: &OAuthAppState,
    client: &ClientRegistration,
    form: &TokenForm,
) -> Result<OAuthToken, AppError> {
    let presented = form
        .refresh_token
        .as_deref()
        .ok_or_else(|| AppError::bad_request("invalid_request", "refresh_token is required"))?;

    let refresh_token = state
        .coordinator
        .load_refresh_token(client, presented)
        .await?
        .filter(|rt| rt.client_id == client.client_id)
        .ok_or(OAuthError::NotFound("refresh token"))?;

    let requested: Vec<String> = form
        .scope
        .as_deref()
        .map(|s| s.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();

    if let Some(scope) = requested
        .iter()
        .find(|scope| !refresh_token.scopes.contains(scope))
    {
        return Err(OAuthError::InvalidScope(format!(
            "Cannot request scope '{}' not provided by refresh token",
            scope
        ))
        .into());
    }

    Ok(state
        .coordinator
        .exchange_refresh_token(client, &refresh_token, &requested)
        .await?)
}
