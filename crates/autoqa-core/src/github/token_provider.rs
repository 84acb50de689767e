//! Token provider trait and the mock implementation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;

use super::error::TokenError;
use crate::clock::Clock;

/// An installation access token.
#[derive(Debug)]
pub struct InstallationToken {
    /// The token. Wrapped so it never reaches a log line.
    pub token: SecretString,
    /// When GitHub stops accepting it.
    pub expires_at: DateTime<Utc>,
    /// Installation the token grants access to.
    pub installation_id: u64,
}

/// Mints installation access tokens.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Mints a new token for the installation.
    ///
    /// # Errors
    ///
    /// Returns an error if the App credentials are rejected or the token
    /// endpoint fails.
    async fn mint(&self, installation_id: u64) -> Result<InstallationToken, TokenError>;

    /// Returns the provider name for logging.
    fn name(&self) -> &'static str;
}

/// Mock token provider for testing.
///
/// Generates predictable tokens (`ghs_mock_{installation}_{n}`) valid for a
/// fixed TTL from the injected clock's current time.
#[derive(Debug)]
pub struct MockTokenProvider {
    clock: Arc<dyn Clock>,
    ttl: Duration,
    counter: AtomicU64,
}

impl MockTokenProvider {
    /// Creates a mock minting one-hour tokens.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_ttl(clock, Duration::hours(1))
    }

    /// Creates a mock minting tokens with the given TTL.
    #[must_use]
    pub fn with_ttl(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            clock,
            ttl,
            counter: AtomicU64::new(0),
        }
    }

    /// Number of tokens minted so far.
    #[must_use]
    pub fn minted(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for MockTokenProvider {
    async fn mint(&self, installation_id: u64) -> Result<InstallationToken, TokenError> {
        let counter = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(InstallationToken {
            token: SecretString::from(format!("ghs_mock_{installation_id}_{counter}")),
            expires_at: self.clock.now() + self.ttl,
            installation_id,
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
