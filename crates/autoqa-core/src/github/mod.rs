//! GitHub App installation tokens.
//!
//! # Architecture
//!
//! ```text
//! TokenProvider (trait)
//!     |
//!     +-- MockTokenProvider (tests, offline runs)
//!     |
//!     +-- GitHubAppTokenProvider (autoqa-daemon)
//!         App JWT exchange for installation access tokens.
//!
//! InstallationTokenCache
//!     owns the cached tokens, refreshes them before expiry and drops them
//!     when the provider rejects them
//! ```
//!
//! Raw tokens only ever live inside [`secrecy::SecretString`].

mod error;
mod token_cache;
mod token_provider;

pub use error::TokenError;
pub use token_cache::{DEFAULT_REFRESH_MARGIN_SECS, InstallationTokenCache};
pub use token_provider::{InstallationToken, MockTokenProvider, TokenProvider};

/// GitHub REST API base URL.
pub const DEFAULT_GITHUB_API_BASE_URL: &str = "https://api.github.com";

/// REST API version header value.
pub const GITHUB_API_VERSION: &str = "2022-11-28";
