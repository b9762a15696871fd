// Outbound tracker API request authentication
pub mod auth;

pub use auth::{AuthMethod, BackendAuth, RequestAuth, CLOUD_ORG_ID_HEADER, ORG_ID_HEADER};
