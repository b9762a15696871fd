// HTTP surface of the authorization server

pub mod oauth;

pub use oauth::{create_oauth_router, OAuthAppState};

use axum::{http::Method, Router};
use tower_http::cors::{Any, CorsLayer};

/// Top-level router. OAuth endpoints are mounted only when OAuth is enabled.
pub fn create_router(oauth: Option<OAuthAppState>) -> Router {
    let router = match oauth {
        Some(state) => create_oauth_router(state),
        None => Router::new(),
    };

    // Browser-based MCP clients call discovery and token endpoints cross-origin
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(Any);

    router.layer(cors)
}
