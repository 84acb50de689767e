//! Configuration parsing and validation.
//!
//! Every field has a serde default, so an empty file is a valid
//! configuration: auto-merge disabled, enrichment disabled, default matching
//! threshold.
//!
//! Secrets are never written in the file. The file names the environment
//! variable that holds them and [`GitHubConfig::private_key`] reads it into a
//! [`SecretString`].
//!
//! ```toml
//! [github]
//! app_id = "12345"
//! private_key_env = "AUTOQA_GITHUB_APP_PRIVATE_KEY"
//!
//! [merge]
//! auto_merge = false
//! method = "squash"
//!
//! [merge.repositories]
//! "octo/app" = true
//!
//! [matching]
//! fuzzy_threshold = 0.6
//!
//! [retry]
//! max_attempts = 4
//! initial_delay = "500ms"
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gate::MergePolicy;
use crate::github::DEFAULT_GITHUB_API_BASE_URL;
use crate::manifest::{FrameworkRegistry, ManifestGenerator, SymbolRegistry};
use crate::model::SymbolKind;
use crate::reconcile::{DEFAULT_FUZZY_THRESHOLD, Reconciler};
use crate::retry::RetryPolicy;
use crate::text::{DEFAULT_MIN_TOKEN_LEN, Tokenizer};

/// Environment variable overriding `merge.auto_merge`.
pub const ENV_AUTO_MERGE: &str = "AUTOQA_AUTO_MERGE";

/// Environment variable overriding `enrichment.provider`.
pub const ENV_ENRICHMENT_PROVIDER: &str = "AUTOQA_ENRICHMENT_PROVIDER";

/// Environment variable overriding `github.app_id`.
pub const ENV_GITHUB_APP_ID: &str = "GITHUB_APP_ID";

/// Enrichment provider names.
pub const ENRICHMENT_PROVIDERS: &[&str] = &["none", "http"];

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AutoQaConfig {
    /// Provider access.
    #[serde(default)]
    pub github: GitHubConfig,

    /// Optional checklist enrichment.
    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    /// Linkage and reconciliation matching.
    #[serde(default)]
    pub matching: MatchingConfig,

    /// Merge gate policy.
    #[serde(default)]
    pub merge: MergePolicy,

    /// Background work queue.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Provider call retries.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Additional symbol patterns and framework mappings.
    #[serde(default)]
    pub manifest: ManifestConfig,
}

impl AutoQaConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or a value is out of range.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Applies overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if an override has an invalid value.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides from `lookup`, then re-validates.
    ///
    /// # Errors
    ///
    /// Returns an error if an override has an invalid value.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_AUTO_MERGE) {
            self.merge.auto_merge = parse_bool(ENV_AUTO_MERGE, &value)?;
        }
        if let Some(value) = lookup(ENV_ENRICHMENT_PROVIDER) {
            self.enrichment.provider = value.trim().to_ascii_lowercase();
        }
        if let Some(value) = lookup(ENV_GITHUB_APP_ID) {
            let value = value.trim();
            if !value.is_empty() {
                self.github.app_id = Some(value.to_string());
            }
        }
        self.validate()
    }

    /// Checks value ranges and cross-field requirements.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] naming the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.matching.fuzzy_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::Validation(format!(
                "matching.fuzzy_threshold must be in (0, 1], got {threshold}"
            )));
        }
        if self.matching.min_token_len == 0 {
            return Err(ConfigError::Validation(
                "matching.min_token_len must be at least 1".to_string(),
            ));
        }
        if self.queue.max_concurrency == 0 {
            return Err(ConfigError::Validation(
                "queue.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if !(self.retry.multiplier.is_finite() && self.retry.multiplier >= 1.0) {
            return Err(ConfigError::Validation(format!(
                "retry.multiplier must be at least 1, got {}",
                self.retry.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(ConfigError::Validation(format!(
                "retry.jitter must be in [0, 1], got {}",
                self.retry.jitter
            )));
        }
        if !ENRICHMENT_PROVIDERS.contains(&self.enrichment.provider.as_str()) {
            return Err(ConfigError::Validation(format!(
                "enrichment.provider must be one of {ENRICHMENT_PROVIDERS:?}, got {:?}",
                self.enrichment.provider
            )));
        }
        if self.enrichment.provider == "http" && self.enrichment.endpoint.is_none() {
            return Err(ConfigError::Validation(
                "enrichment.endpoint is required when enrichment.provider = \"http\"".to_string(),
            ));
        }
        // Compile extra patterns now so a bad one fails at startup.
        self.symbol_registry()?;
        Ok(())
    }

    /// Tokenizer for linkage and fuzzy matching.
    #[must_use]
    pub fn tokenizer(&self) -> Tokenizer {
        Tokenizer::new(self.matching.min_token_len)
            .with_extra_stopwords(&self.matching.extra_stopwords)
    }

    /// Reconciler with the configured threshold.
    ///
    /// # Errors
    ///
    /// Returns an error if the threshold is out of range.
    pub fn reconciler(&self) -> Result<Reconciler, ConfigError> {
        Reconciler::new(self.matching.fuzzy_threshold, self.tokenizer())
            .map_err(|err| ConfigError::Validation(err.to_string()))
    }

    /// Manifest generator with the built-in and configured registries.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured symbol pattern is invalid.
    pub fn manifest_generator(&self) -> Result<ManifestGenerator, ConfigError> {
        let mut frameworks = FrameworkRegistry::default();
        for (extension, framework) in &self.manifest.frameworks {
            frameworks.register(extension, framework.clone());
        }
        Ok(ManifestGenerator::new(
            self.symbol_registry()?,
            frameworks,
            self.tokenizer(),
        ))
    }

    fn symbol_registry(&self) -> Result<SymbolRegistry, ConfigError> {
        let mut symbols = SymbolRegistry::default();
        for extra in &self.manifest.symbol_patterns {
            symbols
                .register(&extra.extension, &extra.pattern, extra.kind)
                .map_err(|err| {
                    ConfigError::Validation(format!(
                        "manifest.symbol_patterns[{}]: {err}",
                        extra.extension
                    ))
                })?;
        }
        Ok(symbols)
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::Validation(format!(
            "{name} must be a boolean, got {other:?}"
        ))),
    }
}

/// GitHub access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GitHubConfig {
    /// GitHub API base URL (default: `https://api.github.com`).
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// GitHub App id. Without it the daemon falls back to `token_env`.
    #[serde(default)]
    pub app_id: Option<String>,

    /// Environment variable holding the App private key (PEM).
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,

    /// Environment variable holding a plain token, used when no App id is
    /// configured.
    #[serde(default)]
    pub token_env: Option<String>,

    /// Name of the check run posted on pull requests.
    #[serde(default = "default_check_name")]
    pub check_name: String,

    /// Per-request timeout.
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

fn default_api_url() -> String {
    DEFAULT_GITHUB_API_BASE_URL.to_string()
}

fn default_private_key_env() -> String {
    "AUTOQA_GITHUB_APP_PRIVATE_KEY".to_string()
}

fn default_check_name() -> String {
    "AutoQA".to_string()
}

const fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            app_id: None,
            private_key_env: default_private_key_env(),
            token_env: None,
            check_name: default_check_name(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl GitHubConfig {
    /// Reads the App private key from its environment variable.
    ///
    /// # Errors
    ///
    /// Returns an error if the variable is unset or empty.
    pub fn private_key(&self) -> Result<SecretString, ConfigError> {
        read_secret_env(&self.private_key_env)
    }

    /// Reads the plain token, if `token_env` is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if `token_env` names an unset or empty variable.
    pub fn token(&self) -> Result<Option<SecretString>, ConfigError> {
        self.token_env.as_deref().map(read_secret_env).transpose()
    }
}

fn read_secret_env(name: &str) -> Result<SecretString, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(SecretString::from(value)),
        _ => Err(ConfigError::MissingSecret {
            env: name.to_string(),
        }),
    }
}

/// Checklist enrichment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnrichmentConfig {
    /// `none` (default) or `http`.
    #[serde(default = "default_enrichment_provider")]
    pub provider: String,

    /// Endpoint the `http` provider posts issue text to.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Environment variable holding a bearer token for the endpoint.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Per-request timeout.
    #[serde(default = "default_enrichment_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

fn default_enrichment_provider() -> String {
    "none".to_string()
}

const fn default_enrichment_timeout() -> Duration {
    Duration::from_secs(20)
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            provider: default_enrichment_provider(),
            endpoint: None,
            api_key_env: None,
            timeout: default_enrichment_timeout(),
        }
    }
}

impl EnrichmentConfig {
    /// Whether a provider other than `none` is selected.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.provider != "none"
    }

    /// Reads the endpoint bearer token, if configured.
    ///
    /// # Errors
    ///
    /// Returns an error if `api_key_env` names an unset or empty variable.
    pub fn api_key(&self) -> Result<Option<SecretString>, ConfigError> {
        self.api_key_env.as_deref().map(read_secret_env).transpose()
    }
}

/// Linkage and reconciliation matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchingConfig {
    /// Minimum token containment for a fuzzy match, in (0, 1].
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,

    /// Minimum significant token length.
    #[serde(default = "default_min_token_len")]
    pub min_token_len: usize,

    /// Stopwords added to the built-in list.
    #[serde(default)]
    pub extra_stopwords: Vec<String>,
}

const fn default_fuzzy_threshold() -> f64 {
    DEFAULT_FUZZY_THRESHOLD
}

const fn default_min_token_len() -> usize {
    DEFAULT_MIN_TOKEN_LEN
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: default_fuzzy_threshold(),
            min_token_len: default_min_token_len(),
            extra_stopwords: Vec::new(),
        }
    }
}

/// Background work queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// Jobs running at once across all keys.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

const fn default_max_concurrency() -> usize {
    8
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

/// Extra manifest registries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestConfig {
    /// Symbol patterns tried before the built-in ones.
    #[serde(default)]
    pub symbol_patterns: Vec<SymbolPatternConfig>,

    /// Extension to framework mappings.
    #[serde(default)]
    pub frameworks: BTreeMap<String, String>,
}

/// A declaration pattern for one extension. The regex must have a `name`
/// capture group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SymbolPatternConfig {
    /// File extension without the dot.
    pub extension: String,
    /// Regex with a `name` group.
    pub pattern: String,
    /// Kind reported for matches.
    #[serde(default = "default_symbol_kind")]
    pub kind: SymbolKind,
}

const fn default_symbol_kind() -> SymbolKind {
    SymbolKind::Function
}

/// Configuration errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// I/O error reading configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A secret's environment variable is unset or empty.
    #[error("environment variable {env} is not set")]
    MissingSecret {
        /// Variable name.
        env: String,
    },

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}
