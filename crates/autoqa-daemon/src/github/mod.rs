//! GitHub provider: App authentication and the REST forge.
//!
//! # Architecture
//!
//! ```text
//! GitHubRestForge ──token(installation)──► InstallationTokenCache
//!        │                                        │ mint on miss/expiry
//!        │                                        ▼
//!        │                        GitHubAppTokenProvider | StaticTokenProvider
//!        ▼
//!   api.github.com (issues, pulls, check-runs, actions artifacts)
//! ```
//!
//! A 401 from the API invalidates the cached token for that installation so
//! the next call mints a fresh one.

mod app_auth;
mod rest;

use std::sync::Arc;

use autoqa_core::clock::Clock;
use autoqa_core::config::{ConfigError, GitHubConfig};
use autoqa_core::github::{InstallationTokenCache, TokenProvider};

pub use app_auth::{GitHubAppTokenProvider, StaticTokenProvider};
pub use rest::{GitHubRestForge, classify_status};

/// Installation id used for every repository in plain-token mode.
pub const STATIC_INSTALLATION_ID: u64 = 0;

/// Builds the REST forge described by `config`.
///
/// App credentials win when `app_id` is set; otherwise `token_env` must name
/// a plain token.
///
/// # Errors
///
/// Returns an error when neither credential form is configured, a secret is
/// missing, or the HTTP client cannot be built.
pub fn forge_from_config(
    config: &GitHubConfig,
    clock: Arc<dyn Clock>,
) -> Result<GitHubRestForge, ConfigError> {
    let (provider, default_installation): (Arc<dyn TokenProvider>, Option<u64>) =
        if let Some(app_id) = &config.app_id {
            let key = config.private_key()?;
            let provider = GitHubAppTokenProvider::new(
                app_id.clone(),
                &key,
                config.api_url.clone(),
                config.request_timeout,
                Arc::clone(&clock),
            )
            .map_err(|error| ConfigError::Validation(error.to_string()))?;
            (Arc::new(provider), None)
        } else if let Some(token) = config.token()? {
            (
                Arc::new(StaticTokenProvider::new(token, Arc::clone(&clock))),
                Some(STATIC_INSTALLATION_ID),
            )
        } else {
            return Err(ConfigError::Validation(
                "github.app_id or github.token_env must be set".to_string(),
            ));
        };

    let tokens = Arc::new(InstallationTokenCache::new(provider, Arc::clone(&clock)));
    GitHubRestForge::new(
        &config.api_url,
        config.request_timeout,
        tokens,
        clock,
        default_installation,
    )
    .map_err(|error| ConfigError::Validation(error.to_string()))
}
