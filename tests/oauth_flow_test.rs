// Integration tests for the OAuth proxy endpoints, end to end over the router

use axum::{
    body::Body,
    http::{header, HeaderMap, Request, StatusCode},
    Router,
};
use mockito::{Matcher, Server};
use std::sync::Arc;
use tower::ServiceExt;
use tracker_mcp::api::{create_router, OAuthAppState};
use tracker_mcp::config::OAuthConfig;
use tracker_mcp::oauth::pkce::s256_challenge;
use tracker_mcp::oauth::AuthorizationCoordinator;
use tracker_mcp::store::{InMemoryOAuthStore, SystemClock};
use url::Url;

const REDIRECT_URI: &str = "http://localhost:3000/callback";
const VERIFIER: &str = "dBjftJeZ4CVP-mJ92K9IcLQwsOiZoJxDhlkk3bB2TTbdTcOWJq2dQw";

fn create_test_app(issuer_url: &str) -> Router {
    let config = OAuthConfig {
        enabled: true,
        issuer_url: issuer_url.to_string(),
        client_id: Some("yandex-client".to_string()),
        client_secret: Some("yandex-secret".to_string()),
        scopes: Some(vec!["tracker:read".to_string(), "tracker:write".to_string()]),
        ..OAuthConfig::default()
    };
    let store = Arc::new(InMemoryOAuthStore::new(Arc::new(SystemClock)));
    let coordinator =
        AuthorizationCoordinator::from_config(&config, "https://mcp.example.com", store).unwrap();
    create_router(Some(OAuthAppState {
        coordinator: Arc::new(coordinator),
    }))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, headers, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn post_form(uri: &str, fields: &[(&str, &str)]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(serde_urlencoded::to_string(fields).unwrap()))
        .unwrap()
}

fn location(headers: &HeaderMap) -> Url {
    Url::parse(headers[header::LOCATION].to_str().unwrap()).unwrap()
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

/// Registers a confidential client and returns (client_id, client_secret).
async fn register(app: &Router) -> (String, String) {
    let request = Request::builder()
        .method("POST")
        .uri("/register")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            serde_json::json!({
                "redirect_uris": [REDIRECT_URI],
                "client_name": "Test MCP client",
            })
            .to_string(),
        ))
        .unwrap();

    let (status, _, body) = send(app, request).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["scope"], "tracker:read tracker:write");
    (
        body["client_id"].as_str().unwrap().to_string(),
        body["client_secret"].as_str().unwrap().to_string(),
    )
}

/// Runs /authorize and the upstream callback, returning the downstream code.
async fn authorize_and_callback(app: &Router, issuer_url: &str, client_id: &str) -> String {
    let uri = format!(
        "/authorize?response_type=code&client_id={}&redirect_uri={}&code_challenge={}&code_challenge_method=S256&state=client-state&scope=tracker%3Aread",
        client_id,
        urlencoding::encode(REDIRECT_URI),
        s256_challenge(VERIFIER),
    );
    let (status, headers, _) = send(app, get(&uri)).await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(headers[header::CACHE_CONTROL], "no-store");

    let upstream = location(&headers);
    assert!(upstream.as_str().starts_with(&format!("{}/authorize?", issuer_url)));
    assert_eq!(query_param(&upstream, "client_id").as_deref(), Some("yandex-client"));
    assert_eq!(
        query_param(&upstream, "redirect_uri").as_deref(),
        Some("https://mcp.example.com/oauth/callback")
    );
    assert_eq!(query_param(&upstream, "scope").as_deref(), Some("tracker:read"));
    let state = query_param(&upstream, "state").unwrap();
    assert_eq!(state, "client-state");

    let (status, headers, _) = send(
        app,
        get(&format!("/oauth/callback?code=upstream-code&state={}", state)),
    )
    .await;
    assert_eq!(status, StatusCode::FOUND);

    let back = location(&headers);
    assert!(back.as_str().starts_with(REDIRECT_URI));
    assert_eq!(query_param(&back, "state").as_deref(), Some("client-state"));
    query_param(&back, "code").unwrap()
}

/// GET /.well-known/oauth-authorization-server advertises endpoints under the public URL.
#[tokio::test]
async fn test_metadata() {
    let app = create_test_app("https://oauth.yandex.ru");

    let (status, _, body) = send(&app, get("/.well-known/oauth-authorization-server")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["issuer"], "https://mcp.example.com");
    assert_eq!(body["token_endpoint"], "https://mcp.example.com/token");
    assert_eq!(body["code_challenge_methods_supported"][0], "S256");
    assert_eq!(body["scopes_supported"][1], "tracker:write");
}

/// Full flow: register, authorize, callback, code exchange, refresh rotation.
#[tokio::test]
async fn test_full_authorization_code_flow() {
    let mut server = Server::new_async().await;
    let issuer = server.url();
    let app = create_test_app(&issuer);

    let code_exchange = server
        .mock("POST", "/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
            Matcher::UrlEncoded("code".into(), "upstream-code".into()),
            Matcher::UrlEncoded("client_id".into(), "yandex-client".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"access_token":"ya-access-1","token_type":"bearer","expires_in":3600,"refresh_token":"ya-refresh-1"}"#,
        )
        .expect(1)
        .create_async()
        .await;

    let (client_id, client_secret) = register(&app).await;
    let code = authorize_and_callback(&app, &issuer, &client_id).await;

    let (status, headers, body) = send(
        &app,
        post_form(
            "/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", code.as_str()),
                ("code_verifier", VERIFIER),
                ("redirect_uri", REDIRECT_URI),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
            ],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CACHE_CONTROL], "no-store");
    assert_eq!(body["access_token"], "ya-access-1");
    assert_eq!(body["refresh_token"], "ya-refresh-1");
    assert_eq!(body["expires_in"], 3600);
    code_exchange.assert_async().await;

    // Codes are single use
    let (status, _, body) = send(
        &app,
        post_form(
            "/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", code.as_str()),
                ("code_verifier", VERIFIER),
                ("redirect_uri", REDIRECT_URI),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
            ],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_grant");
    assert_eq!(body["error_description"], "authorization code not found");

    let refresh = server
        .mock("POST", "/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
            Matcher::UrlEncoded("refresh_token".into(), "ya-refresh-1".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"access_token":"ya-access-2","token_type":"bearer","expires_in":3600,"refresh_token":"ya-refresh-2"}"#,
        )
        .expect(1)
        .create_async()
        .await;

    let refresh_form = [
        ("grant_type", "refresh_token"),
        ("refresh_token", "ya-refresh-1"),
        ("client_id", client_id.as_str()),
        ("client_secret", client_secret.as_str()),
    ];
    let (status, _, body) = send(&app, post_form("/token", &refresh_form)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["access_token"], "ya-access-2");
    assert_eq!(body["refresh_token"], "ya-refresh-2");
    refresh.assert_async().await;

    // The rotated refresh token is gone
    let (status, _, body) = send(&app, post_form("/token", &refresh_form)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_grant");
    assert_eq!(body["error_description"], "refresh token not found");
}

/// A wrong PKCE verifier is rejected before the upstream is contacted.
#[tokio::test]
async fn test_pkce_mismatch_rejected() {
    let mut server = Server::new_async().await;
    let issuer = server.url();
    let app = create_test_app(&issuer);

    let upstream = server
        .mock("POST", "/token")
        .expect(0)
        .create_async()
        .await;

    let (client_id, client_secret) = register(&app).await;
    let code = authorize_and_callback(&app, &issuer, &client_id).await;

    let (status, _, body) = send(
        &app,
        post_form(
            "/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", code.as_str()),
                ("code_verifier", "not-the-verifier"),
                ("redirect_uri", REDIRECT_URI),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
            ],
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_grant");
    upstream.assert_async().await;
}

/// Upstream token endpoint failures surface as 502.
#[tokio::test]
async fn test_upstream_failure_is_bad_gateway() {
    let mut server = Server::new_async().await;
    let issuer = server.url();
    let app = create_test_app(&issuer);

    server
        .mock("POST", "/token")
        .with_status(400)
        .with_body(r#"{"error":"invalid_grant"}"#)
        .create_async()
        .await;

    let (client_id, client_secret) = register(&app).await;
    let code = authorize_and_callback(&app, &issuer, &client_id).await;

    let (status, _, body) = send(
        &app,
        post_form(
            "/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", code.as_str()),
                ("code_verifier", VERIFIER),
                ("redirect_uri", REDIRECT_URI),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
            ],
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "server_error");
}

/// Callback errors answer with a bare JSON string.
#[tokio::test]
async fn test_callback_errors() {
    let app = create_test_app("https://oauth.yandex.ru");

    let (status, _, body) = send(&app, get("/oauth/callback?state=abc")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, serde_json::json!("invalid callback data"));

    let (status, _, body) = send(&app, get("/oauth/callback?code=c&state=unknown")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, serde_json::json!("invalid state"));

    let (status, _, body) = send(
        &app,
        get("/oauth/callback?error=access_denied&error_description=denied"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, serde_json::json!("invalid callback data"));
}

/// Token requests with a bad secret or unknown client are rejected with 401.
#[tokio::test]
async fn test_client_authentication() {
    let app = create_test_app("https://oauth.yandex.ru");
    let (client_id, _) = register(&app).await;

    let (status, _, body) = send(
        &app,
        post_form(
            "/token",
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", "whatever"),
                ("client_id", client_id.as_str()),
                ("client_secret", "wrong"),
            ],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_client");

    let (status, _, body) = send(
        &app,
        post_form(
            "/token",
            &[("grant_type", "password"), ("client_id", "nobody")],
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_client");
}

/// /authorize validates the client, redirect URI and scopes before redirecting.
#[tokio::test]
async fn test_authorize_validation() {
    let app = create_test_app("https://oauth.yandex.ru");
    let (client_id, _) = register(&app).await;
    let challenge = s256_challenge(VERIFIER);

    let (status, _, _) = send(
        &app,
        get(&format!(
            "/authorize?response_type=code&client_id=unknown&code_challenge={}",
            challenge
        )),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, body) = send(
        &app,
        get(&format!(
            "/authorize?response_type=code&client_id={}&redirect_uri=http%3A%2F%2Fevil.example%2Fcb&code_challenge={}",
            client_id, challenge
        )),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");

    let (status, _, body) = send(
        &app,
        get(&format!(
            "/authorize?response_type=code&client_id={}&code_challenge={}&scope=tracker%3Aadmin",
            client_id, challenge
        )),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_scope");

    let (status, _, body) = send(
        &app,
        get(&format!(
            "/authorize?response_type=code&client_id={}&code_challenge={}&code_challenge_method=plain",
            client_id, challenge
        )),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");
}
