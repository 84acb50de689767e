//! Installation token cache.
//!
//! Tokens are reused until they are within
//! [`DEFAULT_REFRESH_MARGIN_SECS`] of expiry, then re-minted on demand. A
//! token the API rejected is dropped with
//! [`InstallationTokenCache::invalidate`] so the next call mints a fresh
//! one. Minting happens under the cache lock; concurrent callers for an
//! expired token wait for a single mint.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Mutex;

use super::error::TokenError;
use super::token_provider::{InstallationToken, TokenProvider};
use crate::clock::Clock;

/// How long before expiry a cached token is replaced, in seconds.
pub const DEFAULT_REFRESH_MARGIN_SECS: i64 = 300;

/// Per-installation token cache in front of a [`TokenProvider`].
pub struct InstallationTokenCache {
    provider: Arc<dyn TokenProvider>,
    clock: Arc<dyn Clock>,
    refresh_margin: Duration,
    tokens: Mutex<HashMap<u64, InstallationToken>>,
}

impl std::fmt::Debug for InstallationTokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallationTokenCache")
            .field("provider", &self.provider.name())
            .field("refresh_margin", &self.refresh_margin)
            .finish_non_exhaustive()
    }
}

impl InstallationTokenCache {
    /// Creates a cache with the default refresh margin.
    #[must_use]
    pub fn new(provider: Arc<dyn TokenProvider>, clock: Arc<dyn Clock>) -> Self {
        Self {
            provider,
            clock,
            refresh_margin: Duration::seconds(DEFAULT_REFRESH_MARGIN_SECS),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Overrides the refresh margin.
    #[must_use]
    pub const fn with_refresh_margin(mut self, refresh_margin: Duration) -> Self {
        self.refresh_margin = refresh_margin;
        self
    }

    /// Returns a valid token for the installation, minting one if needed.
    pub async fn token(&self, installation_id: u64) -> Result<SecretString, TokenError> {
        let mut tokens = self.tokens.lock().await;
        let now = self.clock.now();
        if let Some(cached) = tokens.get(&installation_id) {
            if cached.expires_at - self.refresh_margin > now {
                return Ok(SecretString::from(cached.token.expose_secret().to_string()));
            }
        }

        let minted = self.provider.mint(installation_id).await?;
        tracing::debug!(
            installation_id,
            provider = self.provider.name(),
            expires_at = %minted.expires_at,
            "minted installation token"
        );
        let token = SecretString::from(minted.token.expose_secret().to_string());
        tokens.insert(installation_id, minted);
        Ok(token)
    }

    /// Drops the cached token for the installation.
    pub async fn invalidate(&self, installation_id: u64) {
        if self.tokens.lock().await.remove(&installation_id).is_some() {
            tracing::info!(installation_id, "invalidated installation token");
        }
    }
}
