//! Error types for credential and auth resolution

use std::time::Duration;
use thiserror::Error;

use crate::auth::TokenInfo;
use crate::credential::CredentialError;

/// Main error type for auth resolution and the OAuth2 flows
#[derive(Error, Debug)]
pub enum AuthError {
    /// Reading or writing a credential source failed
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Required settings are missing or malformed
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Token endpoint rejected the exchange or refresh
    #[error("Token exchange failed: {0}")]
    Exchange(String),

    /// Token endpoint answered with something unparseable
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// HTTP client error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The local callback listener could not be started
    #[error("Failed to start callback server: {0}")]
    ServerStart(String),

    /// The local callback listener stopped before delivering a result
    #[error("Callback server failed: {0}")]
    Server(String),

    /// Browser could not be opened
    #[error("Could not open browser: {0}")]
    BrowserOpen(String),

    /// The provider redirected back with an `error` parameter
    #[error("Authorization failed: {0}")]
    Provider(String),

    /// Callback `state` did not match the one sent with the request
    #[error("invalid state in authorization callback")]
    InvalidState,

    /// Callback carried no authorization code
    #[error("Authorization callback is missing the code parameter")]
    MissingCode,

    /// Caller cancelled the flow
    #[error("Authentication cancelled")]
    Cancelled,

    /// No callback arrived in time
    #[error("Authorization timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// A fresh token was obtained but could not be saved
    ///
    /// The token is still valid for this process.
    #[error("Token obtained but not persisted: {source}")]
    NotPersisted {
        /// The valid, unsaved token
        token: Box<TokenInfo>,
        /// Why saving failed
        source: CredentialError,
    },
}

/// Result type alias for auth operations
pub type Result<T> = std::result::Result<T, AuthError>;

impl AuthError {
    /// Whether this wraps the recoverable credential-not-found condition
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Credential(e) if e.is_not_found())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a token exchange error
    pub fn exchange(msg: impl Into<String>) -> Self {
        Self::Exchange(msg.into())
    }

    /// Create an invalid response error
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Create a server start error
    pub fn server_start(msg: impl Into<String>) -> Self {
        Self::ServerStart(msg.into())
    }

    /// Create a server failure error
    pub fn server(msg: impl Into<String>) -> Self {
        Self::Server(msg.into())
    }

    /// Create a browser open error
    pub fn browser_open(msg: impl Into<String>) -> Self {
        Self::BrowserOpen(msg.into())
    }

    /// Create a not-persisted error carrying the unsaved token
    #[must_use]
    pub fn not_persisted(token: TokenInfo, source: CredentialError) -> Self {
        Self::NotPersisted {
            token: Box::new(token),
            source,
        }
    }
}

impl From<url::ParseError> for AuthError {
    fn from(e: url::ParseError) -> Self {
        Self::InvalidConfig(format!("invalid URL: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_passthrough() {
        let err: AuthError = CredentialError::NotFound("environment variable TOK".into()).into();
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "Credential not found in environment variable TOK"
        );

        let err: AuthError = CredentialError::unsupported("exec").into();
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_invalid_state_message() {
        assert!(AuthError::InvalidState.to_string().contains("invalid state"));
    }
}
