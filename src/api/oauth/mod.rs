//! HTTP endpoints of the OAuth authorization-server proxy.
//!
//! - GET  /.well-known/oauth-authorization-server → server metadata
//! - POST /register → dynamic client registration
//! - GET  /authorize → redirect to the upstream provider
//! - GET  /oauth/callback → upstream redirect target, redirect to the client
//! - POST /token → authorization_code and refresh_token grants

mod token;

use crate::credentials::generate_token;
use crate::error::OAuthError;
use crate::oauth::pkce::METHOD_S256;
use crate::oauth::{
    AuthorizationCoordinator, AuthorizationParams, CallbackParams, ClientRegistration,
    CALLBACK_PATH,
};
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// RFC 6749 error body
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_description: Option<String>,
}

/// Application error types for OAuth endpoints
#[derive(Debug)]
enum AppError {
    /// OAuth protocol error with RFC 6749 code
    OAuth {
        status: StatusCode,
        error: &'static str,
        description: String,
    },
    /// Callback failures answer with a bare JSON string
    Callback(String),
    BadGateway(String),
    ServerError(String),
}

impl AppError {
    fn bad_request(error: &'static str, description: impl Into<String>) -> Self {
        AppError::OAuth {
            status: StatusCode::BAD_REQUEST,
            error,
            description: description.into(),
        }
    }
}

impl From<OAuthError> for AppError {
    fn from(err: OAuthError) -> Self {
        match &err {
            OAuthError::InvalidCallback
            | OAuthError::InvalidState
            | OAuthError::Validation(_)
            | OAuthError::InvalidScope(_)
            | OAuthError::InvalidGrant(_)
            | OAuthError::NotFound(_) => AppError::bad_request(err.oauth_error_code(), err.to_string()),
            OAuthError::InvalidClient(_) => AppError::OAuth {
                status: StatusCode::UNAUTHORIZED,
                error: "invalid_client",
                description: err.to_string(),
            },
            OAuthError::UpstreamExchange { .. } | OAuthError::Http(_) | OAuthError::Timeout(_) => {
                error!(error = %err, "Upstream request failed");
                AppError::BadGateway(err.to_string())
            }
            _ => {
                error!(error = %err, "OAuth request failed");
                AppError::ServerError(err.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, description) = match self {
            AppError::OAuth {
                status,
                error,
                description,
            } => (status, error, description),
            AppError::Callback(message) => {
                return (StatusCode::BAD_REQUEST, Json(message)).into_response();
            }
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "server_error", msg),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", msg),
        };

        let body = Json(ErrorResponse {
            error,
            error_description: Some(description),
        });

        (status, [(header::CACHE_CONTROL, "no-store")], body).into_response()
    }
}

/// Shared application state for OAuth API
#[derive(Clone)]
pub struct OAuthAppState {
    pub coordinator: Arc<AuthorizationCoordinator>,
}

/// Create OAuth API router
pub fn create_oauth_router(state: OAuthAppState) -> Router {
    Router::new()
        .route("/.well-known/oauth-authorization-server", get(metadata))
        .route("/register", post(register))
        .route("/authorize", get(authorize))
        .route(CALLBACK_PATH, get(oauth_callback))
        .route("/token", post(token::token))
        .with_state(Arc::new(state))
}

/// 302 with `Cache-Control: no-store`
fn found(location: &str) -> Response {
    (
        StatusCode::FOUND,
        [
            (header::LOCATION, location.to_string()),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
    )
        .into_response()
}

#[derive(Serialize)]
struct ServerMetadata {
    issuer: String,
    authorization_endpoint: String,
    token_endpoint: String,
    registration_endpoint: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    scopes_supported: Vec<String>,
    response_types_supported: Vec<&'static str>,
    grant_types_supported: Vec<&'static str>,
    token_endpoint_auth_methods_supported: Vec<&'static str>,
    code_challenge_methods_supported: Vec<&'static str>,
}

/// GET /.well-known/oauth-authorization-server
async fn metadata(State(state): State<Arc<OAuthAppState>>) -> Json<ServerMetadata> {
    let base = state.coordinator.server_url();
    Json(ServerMetadata {
        issuer: base.to_string(),
        authorization_endpoint: format!("{}/authorize", base),
        token_endpoint: format!("{}/token", base),
        registration_endpoint: format!("{}/register", base),
        scopes_supported: state.coordinator.default_scopes().to_vec(),
        response_types_supported: vec!["code"],
        grant_types_supported: vec!["authorization_code", "refresh_token"],
        token_endpoint_auth_methods_supported: vec!["client_secret_post", "none"],
        code_challenge_methods_supported: vec![METHOD_S256],
    })
}

/// Dynamic client registration request (RFC 7591)
#[derive(Deserialize)]
struct RegistrationRequest {
    #[serde(default)]
    redirect_uris: Vec<String>,
    #[serde(default)]
    grant_types: Option<Vec<String>>,
    #[serde(default)]
    response_types: Option<Vec<String>>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    client_name: Option<String>,
    #[serde(default)]
    token_endpoint_auth_method: Option<String>,
}

/// POST /register
async fn register(
    State(state): State<Arc<OAuthAppState>>,
    Json(request): Json<RegistrationRequest>,
) -> Result<Response, AppError> {
    if request.redirect_uris.is_empty() {
        return Err(AppError::bad_request(
            "invalid_redirect_uri",
            "At least one redirect_uri is required",
        ));
    }
    if let Some(uri) = request
        .redirect_uris
        .iter()
        .find(|uri| url::Url::parse(uri).is_err())
    {
        return Err(AppError::bad_request(
            "invalid_redirect_uri",
            format!("Invalid redirect_uri '{}'", uri),
        ));
    }

    let public_client = request.token_endpoint_auth_method.as_deref() == Some("none");
    let default_scopes = state.coordinator.default_scopes();
    let scope = request
        .scope
        .or_else(|| (!default_scopes.is_empty()).then(|| default_scopes.join(" ")));

    let client = ClientRegistration {
        client_id: Uuid::new_v4().to_string(),
        client_secret: (!public_client).then(generate_token),
        redirect_uris: request.redirect_uris,
        grant_types: request.grant_types.unwrap_or_else(|| {
            vec!["authorization_code".to_string(), "refresh_token".to_string()]
        }),
        response_types: request
            .response_types
            .unwrap_or_else(|| vec!["code".to_string()]),
        scope,
        client_name: request.client_name,
        client_id_issued_at: Some(chrono::Utc::now().timestamp()),
    };

    state.coordinator.register_client(&client).await?;

    Ok((StatusCode::CREATED, Json(client)).into_response())
}

/// Authorization request query parameters
#[derive(Deserialize)]
struct AuthorizeQuery {
    response_type: String,
    client_id: String,
    #[serde(default)]
    redirect_uri: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    state: Option<String>,
    code_challenge: String,
    #[serde(default)]
    code_challenge_method: Option<String>,
    #[serde(default)]
    resource: Option<String>,
}

/// GET /authorize
///
/// Validates the client request and redirects the user agent to the
/// upstream provider's authorization page.
async fn authorize(
    State(state): State<Arc<OAuthAppState>>,
    Query(query): Query<AuthorizeQuery>,
) -> Result<Response, AppError> {
    debug!(client_id = %query.client_id, "Authorization requested");

    let client = state
        .coordinator
        .get_client(&query.client_id)
        .await?
        .ok_or_else(|| {
            warn!(client_id = %query.client_id, "Unknown client");
            AppError::bad_request("invalid_request", "Client ID not found")
        })?;

    let redirect_uri = client.validate_redirect_uri(query.redirect_uri.as_deref())?;

    if query.response_type != "code" {
        return Err(AppError::bad_request(
            "unsupported_response_type",
            "response_type must be 'code'",
        ));
    }
    if query.code_challenge_method.as_deref().unwrap_or(METHOD_S256) != METHOD_S256 {
        return Err(AppError::bad_request(
            "invalid_request",
            "code_challenge_method must be S256",
        ));
    }

    let params = AuthorizationParams {
        state: query.state,
        scopes: query
            .scope
            .map(|s| s.split_whitespace().map(str::to_string).collect()),
        code_challenge: query.code_challenge,
        redirect_uri,
        redirect_uri_provided_explicitly: query.redirect_uri.is_some(),
        resource: query.resource,
    };

    let upstream_url = state.coordinator.authorize(&client, params).await?;

    info!(client_id = %client.client_id, "Redirecting to upstream provider");
    Ok(found(&upstream_url))
}

/// GET /oauth/callback
///
/// The upstream provider redirects here; the pending authorization is
/// consumed and the user agent is sent back to the client with a new code.
async fn oauth_callback(
    State(state): State<Arc<OAuthAppState>>,
    Query(callback): Query<CallbackParams>,
) -> Result<Response, AppError> {
    debug!("OAuth callback received");

    match state.coordinator.handle_upstream_callback(&callback).await {
        Ok(redirect) => Ok(found(&redirect.location)),
        Err(e @ (OAuthError::InvalidCallback | OAuthError::InvalidState)) => {
            Err(AppError::Callback(e.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let err: AppError = OAuthError::InvalidGrant("expired".into()).into();
        assert!(matches!(
            err,
            AppError::OAuth { status: StatusCode::BAD_REQUEST, error: "invalid_grant", .. }
        ));

        let err: AppError = OAuthError::InvalidClient("nope".into()).into();
        assert!(matches!(
            err,
            AppError::OAuth { status: StatusCode::UNAUTHORIZED, error: "invalid_client", .. }
        ));

        let err: AppError = OAuthError::UpstreamExchange {
            status: 400,
            message: "Failed to exchange authorization code".into(),
        }
        .into();
        assert!(matches!(err, AppError::BadGateway(_)));

        let err: AppError = OAuthError::Decryption.into();
        assert!(matches!(err, AppError::ServerError(_)));
    }

    #[test]
    fn test_authorize_query_deserialization() {
        let query = "response_type=code&client_id=abc&code_challenge=xyz&scope=tracker%3Aread+tracker%3Awrite";
        let parsed: AuthorizeQuery = serde_urlencoded::from_str(query).unwrap();
        assert_eq!(parsed.client_id, "abc");
        assert_eq!(parsed.scope.as_deref(), Some("tracker:read tracker:write"));
        assert_eq!(parsed.redirect_uri, None);
        assert_eq!(parsed.code_challenge_method, None);
    }
}
