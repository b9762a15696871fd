pub mod env;

use crate::credentials::validate_key;
use crate::error::OAuthError;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Complete server configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    /// Present only when backend calls authenticate as a service account.
    #[serde(default)]
    pub service_account: Option<ServiceAccountConfig>,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Externally visible base URL, used for the OAuth issuer and callback.
    #[serde(default)]
    pub public_url: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8001
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: None,
        }
    }
}

impl ServerConfig {
    pub fn public_url(&self) -> String {
        match &self.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://localhost:{}", self.port),
        }
    }
}

/// OAuth proxy configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Upstream identity provider issuer
    #[serde(default = "default_issuer_url")]
    pub issuer_url: String,
    /// Client credentials registered with the upstream provider
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Scopes recorded when a client requests none
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
    /// Validate requested scopes and forward them upstream
    #[serde(default = "default_use_scopes")]
    pub use_scopes: bool,
    #[serde(default = "default_state_ttl")]
    pub state_ttl_seconds: u64,
    #[serde(default = "default_code_ttl")]
    pub code_ttl_seconds: u64,
    /// Timeout for upstream token endpoint calls
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_issuer_url() -> String {
    "https://oauth.yandex.ru".to_string()
}

fn default_use_scopes() -> bool {
    true
}

fn default_state_ttl() -> u64 {
    600
}

fn default_code_ttl() -> u64 {
    300
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            issuer_url: default_issuer_url(),
            client_id: None,
            client_secret: None,
            scopes: None,
            use_scopes: default_use_scopes(),
            state_ttl_seconds: default_state_ttl(),
            code_ttl_seconds: default_code_ttl(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

impl std::str::FromStr for StoreBackend {
    type Err = OAuthError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "redis" => Ok(StoreBackend::Redis),
            other => Err(OAuthError::Configuration(format!(
                "Unknown store backend '{}'",
                other
            ))),
        }
    }
}

/// OAuth record store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_seconds: u64,
    /// Base64 AES-256 keys, newest first. Empty disables field encryption.
    #[serde(default)]
    pub encryption_keys: Vec<String>,
}

fn default_operation_timeout() -> u64 {
    5
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis: RedisConfig::default(),
            operation_timeout_seconds: default_operation_timeout(),
            encryption_keys: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_host")]
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default)]
    pub db: i64,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_redis_host() -> String {
    "localhost".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_redis_host(),
            port: default_redis_port(),
            db: 0,
            password: None,
        }
    }
}

impl RedisConfig {
    /// Connection URL in `redis://[:password@]host:port/db` form.
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                urlencoding::encode(password),
                self.host,
                self.port,
                self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

/// Static credentials and organization for backend tracker calls
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub iam_token: Option<String>,
    /// Prefix for caller-supplied tokens: `OAuth` (default) or `Bearer`
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub cloud_org_id: Option<String>,
}

/// Service account authorized key
#[derive(Clone, Deserialize)]
pub struct ServiceAccountConfig {
    pub key_id: String,
    pub service_account_id: String,
    /// PEM-encoded RSA private key
    pub private_key: String,
    #[serde(default = "default_iam_token_url")]
    pub token_url: String,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_seconds: u64,
    #[serde(default = "default_refresh_jitter")]
    pub refresh_jitter_seconds: u64,
    #[serde(default = "default_retry_interval")]
    pub retry_interval_seconds: u64,
    #[serde(default = "default_request_timeout")]
    pub timeout_seconds: u64,
}

fn default_iam_token_url() -> String {
    "https://iam.api.cloud.yandex.net/iam/v1/tokens".to_string()
}

fn default_refresh_interval() -> u64 {
    3600
}

fn default_refresh_jitter() -> u64 {
    300
}

fn default_retry_interval() -> u64 {
    30
}

impl std::fmt::Debug for ServiceAccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountConfig")
            .field("key_id", &self.key_id)
            .field("service_account_id", &self.service_account_id)
            .field("private_key", &"<redacted>")
            .field("token_url", &self.token_url)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountConfig {
    pub fn new(key_id: String, service_account_id: String, private_key: String) -> Self {
        Self {
            key_id,
            service_account_id,
            private_key,
            token_url: default_iam_token_url(),
            refresh_interval_seconds: default_refresh_interval(),
            refresh_jitter_seconds: default_refresh_jitter(),
            retry_interval_seconds: default_retry_interval(),
            timeout_seconds: default_request_timeout(),
        }
    }
}

impl Config {
    /// Rejects combinations that cannot work at runtime.
    pub fn validate(&self) -> std::result::Result<(), OAuthError> {
        if self.tracker.org_id.is_some() && self.tracker.cloud_org_id.is_some() {
            return Err(OAuthError::Configuration(
                "Only one of org_id or cloud_org_id should be provided".to_string(),
            ));
        }

        if self.oauth.enabled
            && (self.oauth.client_id.is_none() || self.oauth.client_secret.is_none())
        {
            return Err(OAuthError::Configuration(
                "OAuth client_id and client_secret are required when OAuth is enabled".to_string(),
            ));
        }

        // Redis rejects SETEX with a zero expiry
        if self.oauth.state_ttl_seconds == 0 || self.oauth.code_ttl_seconds == 0 {
            return Err(OAuthError::Configuration(
                "state_ttl_seconds and code_ttl_seconds must be positive".to_string(),
            ));
        }

        for key in &self.store.encryption_keys {
            validate_key(key)?;
        }

        if let Some(sa) = &self.service_account {
            if sa.key_id.is_empty() || sa.service_account_id.is_empty() || sa.private_key.is_empty()
            {
                return Err(OAuthError::Configuration(
                    "Service account key_id, service_account_id and private_key are required"
                        .to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// Load configuration from an optional TOML file, apply `TRACKER_*`
/// environment overrides and validate the result.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        }
        None => Config::default(),
    };

    config.apply_env_overrides();
    config.validate().context("Invalid configuration")?;
    Ok(config)
}
