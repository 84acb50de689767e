//! HTTP checklist enrichment provider.
//!
//! Posts `{"issue_text": ...}` to the configured endpoint and expects
//! `{"items": [{"description": ..., "required": ..., "tags": [...]}]}` back.
//! Any failure leaves the heuristic checklist untouched.

use std::sync::Arc;

use async_trait::async_trait;
use autoqa_core::checklist::{EnrichmentError, Enricher, NoopEnricher, SuggestedItem};
use autoqa_core::config::{ConfigError, EnrichmentConfig};
use autoqa_core::log::redact_body;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// Enricher backed by an HTTP endpoint.
pub struct HttpEnricher {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
}

impl std::fmt::Debug for HttpEnricher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEnricher")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct SuggestionResponse {
    #[serde(default)]
    items: Vec<SuggestedItem>,
}

impl HttpEnricher {
    /// Creates an enricher posting to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is empty or the HTTP client cannot be
    /// built.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: std::time::Duration,
    ) -> Result<Self, EnrichmentError> {
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            return Err(EnrichmentError::Configuration(
                "enrichment endpoint must not be empty".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| EnrichmentError::Configuration(error.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }
}

#[async_trait]
impl Enricher for HttpEnricher {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn suggest(&self, issue_text: &str) -> Result<Vec<SuggestedItem>, EnrichmentError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "issue_text": issue_text }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|error| EnrichmentError::Unavailable {
                reason: error.to_string(),
            })?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| EnrichmentError::Unavailable {
                reason: error.to_string(),
            })?;
        if !status.is_success() {
            return Err(EnrichmentError::Unavailable {
                reason: format!("status {}: {}", status.as_u16(), redact_body(&body)),
            });
        }

        parse_suggestions(&body)
    }
}

/// Parses an enrichment response body.
///
/// # Errors
///
/// Returns [`EnrichmentError::InvalidResponse`] when the body is not a
/// suggestion list.
pub fn parse_suggestions(body: &str) -> Result<Vec<SuggestedItem>, EnrichmentError> {
    serde_json::from_str::<SuggestionResponse>(body)
        .map(|response| response.items)
        .map_err(|error| EnrichmentError::InvalidResponse {
            reason: error.to_string(),
        })
}

/// Builds the enricher selected by `config`.
///
/// # Errors
///
/// Returns an error if the `http` provider has no endpoint, its API key
/// variable is unset, or the client cannot be built.
pub fn enricher_from_config(config: &EnrichmentConfig) -> Result<Arc<dyn Enricher>, ConfigError> {
    if !config.is_enabled() {
        return Ok(Arc::new(NoopEnricher));
    }
    let endpoint = config.endpoint.clone().ok_or_else(|| {
        ConfigError::Validation("enrichment.endpoint is required for the http provider".to_string())
    })?;
    let enricher = HttpEnricher::new(endpoint, config.api_key()?, config.timeout)
        .map_err(|error| ConfigError::Validation(error.to_string()))?;
    Ok(Arc::new(enricher))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_suggestions() {
        let items = parse_suggestions(
            r#"{"items":[{"description":"rate limit signups"},
                         {"description":"audit log","required":false,"tags":["ops"]}]}"#,
        )
        .unwrap();
        assert_eq!(items.len(), 2);
        assert!(items[0].required);
        assert!(!items[1].required);
        assert_eq!(items[1].tags, vec!["ops"]);

        assert!(parse_suggestions("{}").unwrap().is_empty());
        assert!(matches!(
            parse_suggestions("not json"),
            Err(EnrichmentError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_config_selection() {
        let disabled = enricher_from_config(&EnrichmentConfig::default()).unwrap();
        assert!(!disabled.is_enabled());

        let missing_endpoint = EnrichmentConfig {
            provider: "http".to_string(),
            ..EnrichmentConfig::default()
        };
        assert!(matches!(
            enricher_from_config(&missing_endpoint),
            Err(ConfigError::Validation(_))
        ));

        let http = EnrichmentConfig {
            provider: "http".to_string(),
            endpoint: Some("http://127.0.0.1:9/suggest".to_string()),
            ..EnrichmentConfig::default()
        };
        let enricher = enricher_from_config(&http).unwrap();
        assert_eq!(enricher.name(), "http");
        assert!(enricher.is_enabled());
    }

    #[test]
    fn test_empty_endpoint_is_rejected() {
        let error = HttpEnricher::new(" ", None, std::time::Duration::from_secs(1)).unwrap_err();
        assert!(matches!(error, EnrichmentError::Configuration(_)));
    }
}
