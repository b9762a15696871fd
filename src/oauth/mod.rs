//! OAuth 2.0 authorization-server proxy.
//!
//! Downstream clients run a PKCE authorization-code flow against this server,
//! which relays it to the upstream identity provider:
//! 1. GET /authorize → state saved, redirect to provider `/authorize`
//! 2. User authorizes on the provider's site
//! 3. Provider redirects to /oauth/callback → state consumed, downstream code
//!    minted, redirect to the client's redirect_uri
//! 4. POST /token → code consumed, PKCE checked, upstream code exchanged,
//!    token pair stored and returned
//! 5. POST /token (refresh_token) → upstream refresh, old pair revoked

pub mod coordinator;
pub mod exchange;
pub mod pkce;
pub mod provider;
pub mod types;

pub use coordinator::{AuthorizationCoordinator, CoordinatorSettings, CALLBACK_PATH};
pub use provider::UpstreamProvider;
pub use types::{
    AccessToken, AuthorizationCode, AuthorizationParams, AuthorizationState, CallbackParams,
    CallbackRedirect, ClientRegistration, OAuthToken, RefreshToken,
};
