use super::{Config, ServiceAccountConfig};
use std::str::FromStr;
use tracing::warn;

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let value = lookup(name)?;
    match value.parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(variable = name, "Ignoring unparsable environment override");
            None
        }
    }
}

fn list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    /// Apply `TRACKER_*` environment variables on top of the loaded values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("TRACKER_HOST") {
            self.server.host = v;
        }
        if let Some(port) = parsed(&lookup, "TRACKER_PORT") {
            self.server.port = port;
        }
        if let Some(v) = lookup("TRACKER_PUBLIC_URL") {
            self.server.public_url = Some(v);
        }

        if let Some(enabled) = parsed(&lookup, "TRACKER_OAUTH_ENABLED") {
            self.oauth.enabled = enabled;
        }
        if let Some(v) = lookup("TRACKER_OAUTH_ISSUER_URL") {
            self.oauth.issuer_url = v;
        }
        if let Some(v) = lookup("TRACKER_OAUTH_CLIENT_ID") {
            self.oauth.client_id = Some(v);
        }
        if let Some(v) = lookup("TRACKER_OAUTH_CLIENT_SECRET") {
            self.oauth.client_secret = Some(v);
        }
        if let Some(v) = lookup("TRACKER_OAUTH_SCOPES") {
            self.oauth.scopes = Some(list(&v));
        }
        if let Some(use_scopes) = parsed(&lookup, "TRACKER_OAUTH_USE_SCOPES") {
            self.oauth.use_scopes = use_scopes;
        }

        if let Some(backend) = parsed(&lookup, "TRACKER_STORE_BACKEND") {
            self.store.backend = backend;
        }
        if let Some(v) = lookup("TRACKER_STORE_ENCRYPTION_KEYS") {
            self.store.encryption_keys = list(&v);
        }
        if let Some(v) = lookup("TRACKER_REDIS_HOST") {
            self.store.redis.host = v;
        }
        if let Some(port) = parsed(&lookup, "TRACKER_REDIS_PORT") {
            self.store.redis.port = port;
        }
        if let Some(db) = parsed(&lookup, "TRACKER_REDIS_DB") {
            self.store.redis.db = db;
        }
        if let Some(v) = lookup("TRACKER_REDIS_PASSWORD") {
            self.store.redis.password = Some(v);
        }

        if let Some(v) = lookup("TRACKER_TOKEN") {
            self.tracker.token = Some(v);
        }
        if let Some(v) = lookup("TRACKER_IAM_TOKEN") {
            self.tracker.iam_token = Some(v);
        }
        if let Some(v) = lookup("TRACKER_TOKEN_TYPE") {
            self.tracker.token_type = Some(v);
        }
        if let Some(v) = lookup("TRACKER_ORG_ID") {
            self.tracker.org_id = Some(v);
        }
        if let Some(v) = lookup("TRACKER_CLOUD_ORG_ID") {
            self.tracker.cloud_org_id = Some(v);
        }

        // PEM keys passed through the environment often carry escaped newlines
        let private_key = lookup("TRACKER_SA_PRIVATE_KEY").map(|v| v.replace("\\n", "\n"));
        let key_id = lookup("TRACKER_SA_KEY_ID");
        let service_account_id = lookup("TRACKER_SA_SERVICE_ACCOUNT_ID");

        if self.service_account.is_none() {
            if let (Some(key_id), Some(sa_id), Some(key)) = (key_id, service_account_id, private_key)
            {
                self.service_account = Some(ServiceAccountConfig::new(key_id, sa_id, key));
            }
        } else if let Some(sa) = self.service_account.as_mut() {
            if let Some(v) = key_id {
                sa.key_id = v;
            }
            if let Some(v) = service_account_id {
                sa.service_account_id = v;
            }
            if let Some(v) = private_key {
                sa.private_key = v;
            }
        }
    }
}
