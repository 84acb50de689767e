//! GitHub App installation token minting.

use std::time::Duration;

use async_trait::async_trait;
use autoqa_core::clock::Clock;
use autoqa_core::github::{GITHUB_API_VERSION, InstallationToken, TokenError, TokenProvider};
use autoqa_core::log::redact_body;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// App JWTs are backdated by this many seconds to absorb clock drift.
const JWT_BACKDATE_SECS: i64 = 60;

/// App JWT lifetime; GitHub rejects anything over ten minutes.
const JWT_TTL_SECS: i64 = 600;

/// Production token provider using GitHub App JWT exchange.
pub struct GitHubAppTokenProvider {
    app_id: String,
    key: EncodingKey,
    api_base_url: String,
    clock: Arc<dyn Clock>,
    http_client: reqwest::Client,
}

impl std::fmt::Debug for GitHubAppTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubAppTokenProvider")
            .field("app_id", &self.app_id)
            .field("api_base_url", &self.api_base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct Claims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    token: String,
    expires_at: String,
}

impl GitHubAppTokenProvider {
    /// Creates a provider.
    ///
    /// # Errors
    ///
    /// Returns an error when the app id or API URL is empty, the private key
    /// is not an RSA PEM key, or the HTTP client cannot be initialized.
    pub fn new(
        app_id: impl Into<String>,
        private_key: &SecretString,
        api_base_url: impl Into<String>,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TokenError> {
        let app_id = app_id.into();
        if app_id.trim().is_empty() {
            return Err(TokenError::InvalidInput {
                field: "app_id".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        let api_base_url = api_base_url.into();
        if api_base_url.trim().is_empty() {
            return Err(TokenError::InvalidInput {
                field: "api_base_url".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        let key = EncodingKey::from_rsa_pem(private_key.expose_secret().as_bytes()).map_err(
            |error| TokenError::Jwt {
                message: error.to_string(),
            },
        )?;

        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(timeout)
            .build()
            .map_err(|error| TokenError::Http {
                status: None,
                message: error.to_string(),
            })?;

        Ok(Self {
            app_id,
            key,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            clock,
            http_client,
        })
    }

    fn generate_jwt(&self, now: DateTime<Utc>) -> Result<String, TokenError> {
        let now = now.timestamp();
        let claims = Claims {
            iat: now - JWT_BACKDATE_SECS,
            exp: now + JWT_TTL_SECS,
            iss: self.app_id.clone(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key).map_err(
            |error| TokenError::Jwt {
                message: error.to_string(),
            },
        )
    }
}

#[async_trait]
impl TokenProvider for GitHubAppTokenProvider {
    async fn mint(&self, installation_id: u64) -> Result<InstallationToken, TokenError> {
        let jwt = self.generate_jwt(self.clock.now())?;
        let endpoint = format!(
            "{}/app/installations/{installation_id}/access_tokens",
            self.api_base_url
        );

        let response = self
            .http_client
            .post(endpoint)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "autoqa-daemon")
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
            .bearer_auth(jwt)
            .send()
            .await
            .map_err(|error| TokenError::Http {
                status: None,
                message: error.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read token response body".to_string());
            return Err(TokenError::Http {
                status: Some(status.as_u16()),
                message: redact_body(&body),
            });
        }

        let payload: AccessTokenResponse =
            response.json().await.map_err(|error| TokenError::Http {
                status: Some(status.as_u16()),
                message: format!("invalid token response: {error}"),
            })?;

        let expires_at = DateTime::parse_from_rfc3339(&payload.expires_at)
            .map_err(|error| TokenError::TimeParse {
                value: payload.expires_at.clone(),
                message: error.to_string(),
            })?
            .with_timezone(&Utc);

        Ok(InstallationToken {
            token: SecretString::from(payload.token),
            expires_at,
            installation_id,
        })
    }

    fn name(&self) -> &'static str {
        "github-app"
    }
}

/// Serves one pre-issued token for every installation.
///
/// Used when the daemon runs with a personal or CI token instead of App
/// credentials. The token is treated as valid for a day at a time; a
/// rejected token surfaces as an authentication error on the next call.
pub struct StaticTokenProvider {
    token: SecretString,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenProvider").finish_non_exhaustive()
    }
}

impl StaticTokenProvider {
    /// Creates a provider serving `token`.
    #[must_use]
    pub fn new(token: SecretString, clock: Arc<dyn Clock>) -> Self {
        Self { token, clock }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn mint(&self, installation_id: u64) -> Result<InstallationToken, TokenError> {
        Ok(InstallationToken {
            token: SecretString::from(self.token.expose_secret().to_string()),
            expires_at: self.clock.now() + chrono::Duration::days(1),
            installation_id,
        })
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use autoqa_core::clock::FixedClock;
    use chrono::TimeZone;

    use super::*;

    fn clock() -> Arc<dyn Clock> {
        Arc::new(FixedClock::new(
            Utc.timestamp_opt(1_700_000_000, 0).single().unwrap(),
        ))
    }

    #[test]
    fn test_rejects_invalid_credentials() {
        let key = SecretString::from("not a pem key".to_string());
        let err = GitHubAppTokenProvider::new(
            "12345",
            &key,
            "https://api.github.com",
            Duration::from_secs(5),
            clock(),
        )
        .unwrap_err();
        assert!(matches!(err, TokenError::Jwt { .. }));

        let err = GitHubAppTokenProvider::new(
            " ",
            &key,
            "https://api.github.com",
            Duration::from_secs(5),
            clock(),
        )
        .unwrap_err();
        assert!(matches!(err, TokenError::InvalidInput { ref field, .. } if field == "app_id"));
    }

    #[tokio::test]
    async fn test_static_provider_reuses_token() {
        let provider = StaticTokenProvider::new(SecretString::from("ghp_plain".to_string()), clock());
        let first = provider.mint(1).await.unwrap();
        let second = provider.mint(2).await.unwrap();
        assert_eq!(first.token.expose_secret(), "ghp_plain");
        assert_eq!(second.installation_id, 2);
        assert_eq!(
            first.expires_at,
            Utc.timestamp_opt(1_700_000_000 + 86_400, 0).single().unwrap()
        );
    }
}
