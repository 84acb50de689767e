//! Token minting errors.

use thiserror::Error;

use crate::error::ErrorClass;
use crate::forge::ForgeError;

/// Errors that can occur while minting installation tokens.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TokenError {
    /// Invalid input field.
    #[error("invalid input for field {field}: {reason}")]
    InvalidInput {
        /// The field name.
        field: String,
        /// The reason it is invalid.
        reason: String,
    },

    /// The repository has no installation to mint a token for.
    #[error("no GitHub App installation for {repo}")]
    MissingInstallation {
        /// `owner/name`.
        repo: String,
    },

    /// Signing the App JWT failed.
    #[error("JWT error: {message}")]
    Jwt {
        /// Error message.
        message: String,
    },

    /// The token endpoint failed.
    #[error("token endpoint error (status {status:?}): {message}")]
    Http {
        /// HTTP status, when a response arrived.
        status: Option<u16>,
        /// Error body/message.
        message: String,
    },

    /// The token expiry could not be parsed.
    #[error("invalid token expiry {value}: {message}")]
    TimeParse {
        /// The raw value.
        value: String,
        /// Parse error.
        message: String,
    },
}

impl TokenError {
    /// Maps the error into the pipeline taxonomy.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Http { status: None, .. } => ErrorClass::TransientExternal,
            Self::Http {
                status: Some(status),
                ..
            } if *status >= 500 || *status == 429 => ErrorClass::TransientExternal,
            _ => ErrorClass::Configuration,
        }
    }
}

impl From<TokenError> for ForgeError {
    fn from(value: TokenError) -> Self {
        match value.class() {
            ErrorClass::TransientExternal => Self::Transport(value.to_string()),
            _ => Self::Authentication(value.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_error_classes() {
        let transient = TokenError::Http {
            status: Some(502),
            message: "bad gateway".to_string(),
        };
        assert_eq!(transient.class(), ErrorClass::TransientExternal);
        assert!(ForgeError::from(transient).is_transient());

        let rejected = TokenError::Http {
            status: Some(401),
            message: "bad credentials".to_string(),
        };
        assert!(ForgeError::from(rejected).is_authentication());

        let missing = TokenError::MissingInstallation {
            repo: "octo/app".to_string(),
        };
        assert_eq!(missing.class(), ErrorClass::Configuration);
    }
}
