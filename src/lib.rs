// Startup configuration (TOML + environment)
pub mod config;

// Error types shared by the OAuth layers
pub mod error;

// Field encryption and token primitives
pub mod credentials;

// Authorization-code relay to the upstream identity provider
pub mod oauth;

// Persistence of clients, flow state and tokens
pub mod store;

// Service-account IAM credential refresh
pub mod service_account;

// Outbound tracker API authentication
pub mod tracker;

// HTTP endpoints
pub mod api;
