//! Authorization and organization headers for outbound tracker API calls.

use crate::config::TrackerConfig;
use crate::error::{OAuthError, Result};
use crate::service_account::ServiceAccountRefresher;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use std::sync::Arc;

pub const ORG_ID_HEADER: &str = "X-Org-ID";
pub const CLOUD_ORG_ID_HEADER: &str = "X-Cloud-Org-ID";

const DEFAULT_TOKEN_TYPE: &str = "OAuth";

/// Credentials carried by the downstream caller of a single tool invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestAuth {
    pub token: Option<String>,
    pub org_id: Option<String>,
    pub cloud_org_id: Option<String>,
}

/// Which credential a request was authorized with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMethod {
    RequestToken,
    StaticOAuth,
    StaticIam,
    ServiceAccount,
}

pub struct BackendAuth {
    token: Option<String>,
    iam_token: Option<String>,
    token_type: String,
    org_id: Option<String>,
    cloud_org_id: Option<String>,
    service_account: Option<Arc<ServiceAccountRefresher>>,
}

impl BackendAuth {
    pub fn new(
        config: &TrackerConfig,
        service_account: Option<Arc<ServiceAccountRefresher>>,
    ) -> Result<Self> {
        if config.org_id.is_some() && config.cloud_org_id.is_some() {
            return Err(OAuthError::Configuration(
                "Only one of org_id or cloud_org_id should be provided".to_string(),
            ));
        }

        Ok(Self {
            token: config.token.clone(),
            iam_token: config.iam_token.clone(),
            token_type: config
                .token_type
                .clone()
                .unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_string()),
            org_id: config.org_id.clone(),
            cloud_org_id: config.cloud_org_id.clone(),
            service_account,
        })
    }

    /// Credential used when the caller supplies none, if any is configured.
    pub fn default_method(&self) -> Option<AuthMethod> {
        if self.token.is_some() {
            Some(AuthMethod::StaticOAuth)
        } else if self.iam_token.is_some() {
            Some(AuthMethod::StaticIam)
        } else if self.service_account.is_some() {
            Some(AuthMethod::ServiceAccount)
        } else {
            None
        }
    }

    /// Resolves the Authorization value: caller token, static OAuth token,
    /// static IAM token, then the service-account credential.
    pub async fn authorization(&self, auth: Option<&RequestAuth>) -> Result<(AuthMethod, String)> {
        if let Some(token) = auth.and_then(|a| a.token.as_deref()) {
            return Ok((
                AuthMethod::RequestToken,
                format!("{} {}", self.token_type, token),
            ));
        }
        if let Some(token) = &self.token {
            return Ok((AuthMethod::StaticOAuth, format!("OAuth {}", token)));
        }
        if let Some(token) = &self.iam_token {
            return Ok((AuthMethod::StaticIam, format!("Bearer {}", token)));
        }
        if let Some(refresher) = &self.service_account {
            let token = refresher.token().await?;
            return Ok((AuthMethod::ServiceAccount, format!("Bearer {}", token)));
        }
        Err(OAuthError::Configuration(
            "No authentication method provided".to_string(),
        ))
    }

    /// Resolves the organization header. Per-request ids override configured
    /// ones; exactly one kind must remain.
    pub fn organization(&self, auth: Option<&RequestAuth>) -> Result<(&'static str, String)> {
        let org_id = auth
            .and_then(|a| a.org_id.clone())
            .or_else(|| self.org_id.clone());
        let cloud_org_id = auth
            .and_then(|a| a.cloud_org_id.clone())
            .or_else(|| self.cloud_org_id.clone());

        match (org_id, cloud_org_id) {
            (Some(_), Some(_)) => Err(OAuthError::Configuration(
                "Only one of org_id or cloud_org_id should be provided".to_string(),
            )),
            (Some(org_id), None) => Ok((ORG_ID_HEADER, org_id)),
            (None, Some(cloud_org_id)) => Ok((CLOUD_ORG_ID_HEADER, cloud_org_id)),
            (None, None) => Err(OAuthError::Configuration(
                "Either org_id or cloud_org_id must be provided".to_string(),
            )),
        }
    }

    /// Headers to attach to the next outbound tracker API call.
    pub async fn headers(&self, auth: Option<&RequestAuth>) -> Result<HeaderMap> {
        let (org_header, org_value) = self.organization(auth)?;
        let (_, authorization) = self.authorization(auth).await?;

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, header_value(&authorization)?);
        let org_header = HeaderName::from_bytes(org_header.as_bytes())
            .map_err(|_| OAuthError::Validation("Invalid organization header".to_string()))?;
        headers.insert(org_header, header_value(&org_value)?);
        Ok(headers)
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| OAuthError::Validation("Header value contains invalid characters".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service_account::{CredentialMinter, RefreshSchedule, ServiceAccountCredential};
    use async_trait::async_trait;
    use std::time::Duration;

    struct FixedMinter;

    #[async_trait]
    impl CredentialMinter for FixedMinter {
        async fn mint(&self) -> Result<ServiceAccountCredential> {
            Ok(ServiceAccountCredential {
                token: "sa-iam-token".to_string(),
                expires_at: None,
            })
        }
    }

    fn refresher() -> Arc<ServiceAccountRefresher> {
        Arc::new(ServiceAccountRefresher::new(
            Arc::new(FixedMinter),
            RefreshSchedule {
                interval: Duration::from_secs(3600),
                jitter: Duration::ZERO,
                retry_interval: Duration::from_secs(10),
            },
            Duration::from_secs(5),
        ))
    }

    fn config() -> TrackerConfig {
        TrackerConfig {
            org_id: Some("org-1".to_string()),
            ..TrackerConfig::default()
        }
    }

    fn request(token: Option<&str>) -> RequestAuth {
        RequestAuth {
            token: token.map(str::to_string),
            ..RequestAuth::default()
        }
    }

    #[tokio::test]
    async fn test_request_token_wins() {
        let auth = BackendAuth::new(
            &TrackerConfig {
                token: Some("static".to_string()),
                ..config()
            },
            Some(refresher()),
        )
        .unwrap();

        let headers = auth.headers(Some(&request(Some("user-token")))).await.unwrap();
        assert_eq!(headers[AUTHORIZATION], "OAuth user-token");
        assert_eq!(headers["x-org-id"], "org-1");
    }

    #[tokio::test]
    async fn test_request_token_uses_configured_token_type() {
        let auth = BackendAuth::new(
            &TrackerConfig {
                token_type: Some("Bearer".to_string()),
                ..config()
            },
            None,
        )
        .unwrap();

        let (method, value) = auth.authorization(Some(&request(Some("oidc")))).await.unwrap();
        assert_eq!(method, AuthMethod::RequestToken);
        assert_eq!(value, "Bearer oidc");
    }

    #[tokio::test]
    async fn test_priority_without_request_token() {
        let oauth = BackendAuth::new(
            &TrackerConfig {
                token: Some("static".to_string()),
                iam_token: Some("iam".to_string()),
                ..config()
            },
            Some(refresher()),
        )
        .unwrap();
        assert_eq!(
            oauth.authorization(None).await.unwrap(),
            (AuthMethod::StaticOAuth, "OAuth static".to_string())
        );

        let iam = BackendAuth::new(
            &TrackerConfig {
                iam_token: Some("iam".to_string()),
                ..config()
            },
            Some(refresher()),
        )
        .unwrap();
        assert_eq!(
            iam.authorization(Some(&request(None))).await.unwrap(),
            (AuthMethod::StaticIam, "Bearer iam".to_string())
        );

        let sa = BackendAuth::new(&config(), Some(refresher())).unwrap();
        assert_eq!(sa.default_method(), Some(AuthMethod::ServiceAccount));
        assert_eq!(
            sa.authorization(None).await.unwrap(),
            (AuthMethod::ServiceAccount, "Bearer sa-iam-token".to_string())
        );
    }

    #[tokio::test]
    async fn test_default_headers_mint_service_account_credential() {
        let refresher = refresher();
        let auth = BackendAuth::new(&config(), Some(refresher.clone())).unwrap();

        let headers = auth.headers(None).await.unwrap();
        assert_eq!(headers[AUTHORIZATION], "Bearer sa-iam-token");
        assert_eq!(headers["x-org-id"], "org-1");

        // Later calls reuse the credential minted here
        assert_eq!(refresher.token().await.unwrap(), "sa-iam-token");
    }

    #[tokio::test]
    async fn test_no_credentials() {
        let auth = BackendAuth::new(&config(), None).unwrap();
        assert_eq!(auth.default_method(), None);

        match auth.headers(None).await {
            Err(OAuthError::Configuration(msg)) => {
                assert_eq!(msg, "No authentication method provided")
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_conflicting_static_org_ids_fail_at_construction() {
        let result = BackendAuth::new(
            &TrackerConfig {
                org_id: Some("org".to_string()),
                cloud_org_id: Some("cloud".to_string()),
                ..TrackerConfig::default()
            },
            None,
        );
        assert!(matches!(result, Err(OAuthError::Configuration(_))));
    }

    #[test]
    fn test_organization_resolution() {
        let cloud = BackendAuth::new(
            &TrackerConfig {
                cloud_org_id: Some("cloud-1".to_string()),
                ..TrackerConfig::default()
            },
            None,
        )
        .unwrap();
        assert_eq!(
            cloud.organization(None).unwrap(),
            (CLOUD_ORG_ID_HEADER, "cloud-1".to_string())
        );

        let org = BackendAuth::new(&config(), None).unwrap();
        let overridden = RequestAuth {
            org_id: Some("org-2".to_string()),
            ..RequestAuth::default()
        };
        assert_eq!(
            org.organization(Some(&overridden)).unwrap(),
            (ORG_ID_HEADER, "org-2".to_string())
        );

        // A per-request cloud org next to a configured org id is ambiguous
        let conflicting = RequestAuth {
            cloud_org_id: Some("cloud-2".to_string()),
            ..RequestAuth::default()
        };
        match org.organization(Some(&conflicting)) {
            Err(OAuthError::Configuration(msg)) => {
                assert_eq!(msg, "Only one of org_id or cloud_org_id should be provided")
            }
            other => panic!("unexpected result: {:?}", other),
        }

        let none = BackendAuth::new(&TrackerConfig::default(), None).unwrap();
        match none.organization(None) {
            Err(OAuthError::Configuration(msg)) => {
                assert_eq!(msg, "Either org_id or cloud_org_id must be provided")
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
