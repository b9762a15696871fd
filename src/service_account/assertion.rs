//! Signed JWT assertion exchanged for an IAM token.

use super::{CredentialMinter, ServiceAccountCredential};
use crate::config::ServiceAccountConfig;
use crate::error::{OAuthError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

/// Lifetime of a signed assertion in seconds.
const ASSERTION_TTL_SECS: i64 = 3600;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct AssertionClaims {
    aud: String,
    iss: String,
    iat: i64,
    exp: i64,
}

#[derive(Serialize)]
struct IamTokenRequest<'a> {
    jwt: &'a str,
}

#[derive(Deserialize)]
struct IamTokenResponse {
    #[serde(rename = "iamToken")]
    iam_token: String,
    #[serde(rename = "expiresAt", default)]
    expires_at: Option<DateTime<Utc>>,
}

/// Mints IAM tokens by posting a PS256 assertion signed with the service
/// account's authorized key.
pub struct IamTokenMinter {
    key_id: String,
    service_account_id: String,
    encoding_key: EncodingKey,
    token_url: String,
    http: reqwest::Client,
}

impl IamTokenMinter {
    pub fn new(
        key_id: &str,
        service_account_id: &str,
        private_key_pem: &str,
        token_url: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes()).map_err(|e| {
            OAuthError::Configuration(format!("Invalid service account private key: {}", e))
        })?;

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OAuthError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            key_id: key_id.to_string(),
            service_account_id: service_account_id.to_string(),
            encoding_key,
            token_url: token_url.to_string(),
            http,
        })
    }

    pub fn from_config(config: &ServiceAccountConfig) -> Result<Self> {
        Self::new(
            &config.key_id,
            &config.service_account_id,
            &config.private_key,
            &config.token_url,
            Duration::from_secs(config.timeout_seconds),
        )
    }

    fn sign_assertion(&self, now: i64) -> Result<String> {
        let mut header = Header::new(Algorithm::PS256);
        header.kid = Some(self.key_id.clone());

        let claims = AssertionClaims {
            aud: self.token_url.clone(),
            iss: self.service_account_id.clone(),
            iat: now,
            exp: now + ASSERTION_TTL_SECS,
        };

        encode(&header, &claims, &self.encoding_key)
            .map_err(|e| OAuthError::Configuration(format!("Failed to sign assertion: {}", e)))
    }
}

#[async_trait]
impl CredentialMinter for IamTokenMinter {
    async fn mint(&self) -> Result<ServiceAccountCredential> {
        let jwt = self.sign_assertion(Utc::now().timestamp())?;

        debug!(token_url = %self.token_url, "Requesting IAM token");
        let response = self
            .http
            .post(&self.token_url)
            .json(&IamTokenRequest { jwt: &jwt })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(status = status.as_u16(), body = %body, "IAM token request failed");
            return Err(OAuthError::UpstreamExchange {
                status: status.as_u16(),
                message: "Failed to mint service account token".to_string(),
            });
        }

        let token: IamTokenResponse = response.json().await?;
        Ok(ServiceAccountCredential {
            token: token.iam_token,
            expires_at: token.expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use mockito::{Matcher, Server};

    const TEST_KEY: &str = include_str!("../../tests/fixtures/service_account_key.pem");

    fn minter(token_url: &str) -> IamTokenMinter {
        IamTokenMinter::new(
            "key-id-1",
            "sa-id-1",
            TEST_KEY,
            token_url,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn claims_of(jwt: &str) -> AssertionClaims {
        let payload = jwt.split('.').nth(1).unwrap();
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).unwrap()).unwrap()
    }

    #[test]
    fn test_assertion_header_and_claims() {
        let token_url = "https://iam.api.cloud.yandex.net/iam/v1/tokens";
        let jwt = minter(token_url).sign_assertion(1_700_000_000).unwrap();

        let header = jsonwebtoken::decode_header(&jwt).unwrap();
        assert_eq!(header.alg, Algorithm::PS256);
        assert_eq!(header.kid.as_deref(), Some("key-id-1"));

        assert_eq!(
            claims_of(&jwt),
            AssertionClaims {
                aud: token_url.to_string(),
                iss: "sa-id-1".to_string(),
                iat: 1_700_000_000,
                exp: 1_700_003_600,
            }
        );
    }

    #[test]
    fn test_invalid_private_key() {
        let result = IamTokenMinter::new(
            "k",
            "sa",
            "not a pem",
            "https://iam.example/tokens",
            Duration::from_secs(5),
        );
        assert!(matches!(result, Err(OAuthError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_mint_success() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/iam/v1/tokens")
            .match_body(Matcher::Regex(r#"^\{"jwt":"[^"]+"\}$"#.to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"iamToken":"t1.iam","expiresAt":"2026-01-01T12:00:00Z"}"#)
            .create_async()
            .await;

        let credential = minter(&format!("{}/iam/v1/tokens", server.url()))
            .mint()
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(credential.token, "t1.iam");
        assert_eq!(
            credential.expires_at,
            Some("2026-01-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap())
        );
    }

    #[tokio::test]
    async fn test_mint_failure() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/iam/v1/tokens")
            .with_status(401)
            .with_body(r#"{"message":"invalid assertion"}"#)
            .create_async()
            .await;

        let result = minter(&format!("{}/iam/v1/tokens", server.url()))
            .mint()
            .await;

        assert!(matches!(
            result,
            Err(OAuthError::UpstreamExchange { status: 401, .. })
        ));
    }
}
