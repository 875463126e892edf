//! OAuth2 token persistence and refresh
//!
//! [`TokenStore`] reads and writes the token fields of one identity through
//! the credential resolver and owns the lock that serializes refreshes of
//! that identity. [`RefreshingTokenSource`] runs the locked
//! read / refresh / write cycle; [`ReuseTokenSource`] sits in front of it and
//! hands out the current token until it expires.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::{Arc, PoisonError};
use tokio::sync::Mutex;

use super::oauth::OAuthClient;
use super::token::TokenInfo;
use crate::credential::{CredentialError, CredentialResolver};
use crate::error::{AuthError, Result};
use crate::types::{OAuth2Credentials, Secret};

/// Source of OAuth2 access tokens
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Return a token usable for the next request
    ///
    /// # Errors
    /// Returns an error if no usable token can be produced.
    async fn token(&self) -> Result<TokenInfo>;
}

// ============================================================================
// Token store
// ============================================================================

/// The persisted OAuth2 token fields of one identity, behind a lock
#[derive(Debug, Clone)]
pub struct TokenStore {
    resolver: CredentialResolver,
    credentials: Arc<Mutex<OAuth2Credentials>>,
}

impl TokenStore {
    /// Wrap the token fields of an identity
    #[must_use]
    pub fn new(resolver: CredentialResolver, credentials: OAuth2Credentials) -> Self {
        Self {
            resolver,
            credentials: Arc::new(Mutex::new(credentials)),
        }
    }

    /// Read the current token
    ///
    /// With `allow_missing`, absent access or refresh tokens read as empty.
    /// A missing expiry is never an error.
    ///
    /// # Errors
    ///
    /// Returns a not-found credential error for a missing token when
    /// `allow_missing` is false, and any other backend error unchanged.
    pub async fn read_token(&self, allow_missing: bool) -> Result<TokenInfo> {
        let credentials = self.credentials.lock().await;
        read_fields(&self.resolver, &credentials, allow_missing).await
    }

    /// Write `token` to the token fields
    ///
    /// # Errors
    ///
    /// Returns the first backend error; earlier fields may already be written.
    pub async fn write_token(&self, token: &TokenInfo) -> std::result::Result<(), CredentialError> {
        let mut credentials = self.credentials.lock().await;
        write_fields(&self.resolver, &mut credentials, token).await
    }

    /// Current field definitions, for saving the owning document
    ///
    /// Literal fields carry the latest values written.
    pub async fn credentials(&self) -> OAuth2Credentials {
        self.credentials.lock().await.clone()
    }
}

async fn read_field(
    resolver: &CredentialResolver,
    secret: Option<&Secret>,
    name: &str,
) -> std::result::Result<Option<String>, CredentialError> {
    let Some(secret) = secret else {
        return Ok(None);
    };
    match resolver.resolve_secret(secret).await {
        Ok(value) if value.is_empty() => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => {
            tracing::debug!(field = name, "OAuth2 token field not found");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

async fn read_fields(
    resolver: &CredentialResolver,
    credentials: &OAuth2Credentials,
    allow_missing: bool,
) -> Result<TokenInfo> {
    let require = |value: Option<String>, name: &str| match value {
        Some(value) => Ok(value),
        None if allow_missing => Ok(String::new()),
        None => Err(AuthError::from(CredentialError::NotFound(format!(
            "OAuth2 {name}"
        )))),
    };

    let access_token =
        read_field(resolver, credentials.access_token.as_ref(), "access-token").await?;
    let access_token = require(access_token, "access token")?;

    let refresh_token =
        read_field(resolver, credentials.refresh_token.as_ref(), "refresh-token").await?;
    let refresh_token = require(refresh_token, "refresh token")?;

    let expires_at = read_field(resolver, credentials.expiry.as_ref(), "expiry")
        .await?
        .map(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|at| at.with_timezone(&Utc))
                .map_err(|e| CredentialError::Invalid(format!("OAuth2 expiry `{raw}`: {e}")))
        })
        .transpose()?;

    let mut token = TokenInfo::new(
        access_token,
        Some(refresh_token).filter(|t| !t.is_empty()),
        None,
    );
    token.expires_at = expires_at;
    Ok(token)
}

async fn write_fields(
    resolver: &CredentialResolver,
    credentials: &mut OAuth2Credentials,
    token: &TokenInfo,
) -> std::result::Result<(), CredentialError> {
    let expiry = token
        .expires_at
        .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default();
    let refresh_token = token.refresh_token.clone().unwrap_or_default();

    for (slot, value) in [
        (&mut credentials.access_token, token.access_token.as_str()),
        (&mut credentials.refresh_token, refresh_token.as_str()),
        (&mut credentials.expiry, expiry.as_str()),
    ] {
        // Fields without a source become literals in the document
        let secret = slot.get_or_insert_with(|| Secret::literal(String::new()));
        resolver.persist_secret(secret, value).await?;
    }
    Ok(())
}

// ============================================================================
// Refreshing source
// ============================================================================

/// Refreshes the stored token under the store's lock
///
/// Every call re-reads the persisted token, exchanges its refresh token, and
/// writes the result back before releasing the lock, so concurrent callers
/// each refresh from the value the previous caller persisted.
#[derive(Debug, Clone)]
pub struct RefreshingTokenSource {
    store: TokenStore,
    client: OAuthClient,
}

impl RefreshingTokenSource {
    /// Create a source refreshing `store` through `client`
    #[must_use]
    pub fn new(store: TokenStore, client: OAuthClient) -> Self {
        Self { store, client }
    }

    /// The underlying token store
    #[must_use]
    pub fn store(&self) -> &TokenStore {
        &self.store
    }
}

#[async_trait]
impl TokenSource for RefreshingTokenSource {
    async fn token(&self) -> Result<TokenInfo> {
        let mut credentials = self.store.credentials.lock().await;

        // Only the refresh token is needed; a missing access token is the
        // normal reason to be here
        let current = read_fields(&self.store.resolver, &credentials, true).await?;
        let Some(refresh_token) = current.refresh_token.as_deref() else {
            return Err(CredentialError::NotFound("OAuth2 refresh token".to_string()).into());
        };

        let token = self.client.refresh_token(refresh_token).await?;

        if let Err(e) = write_fields(&self.store.resolver, &mut credentials, &token).await {
            tracing::warn!(error = %e, "Refreshed OAuth2 token could not be persisted");
            return Err(AuthError::not_persisted(token, e));
        }

        tracing::debug!(expires_at = ?token.expires_at, "OAuth2 token refreshed");
        Ok(token)
    }
}

// ============================================================================
// Reuse layer
// ============================================================================

/// Returns the cached token while it is usable, otherwise asks the inner
/// source for a new one
pub struct ReuseTokenSource {
    current: std::sync::Mutex<Option<TokenInfo>>,
    inner: Arc<dyn TokenSource>,
}

impl std::fmt::Debug for ReuseTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReuseTokenSource")
            .field("current", &self.cached())
            .finish_non_exhaustive()
    }
}

impl ReuseTokenSource {
    /// Create a reuse layer seeded with an optional initial token
    pub fn new(initial: Option<TokenInfo>, inner: Arc<dyn TokenSource>) -> Self {
        Self {
            current: std::sync::Mutex::new(initial),
            inner,
        }
    }

    fn cached(&self) -> Option<TokenInfo> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn remember(&self, token: &TokenInfo) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
    }
}

#[async_trait]
impl TokenSource for ReuseTokenSource {
    async fn token(&self) -> Result<TokenInfo> {
        if let Some(token) = self.cached().filter(TokenInfo::is_usable) {
            return Ok(token);
        }

        match self.inner.token().await {
            Ok(token) => {
                self.remember(&token);
                Ok(token)
            }
            Err(AuthError::NotPersisted { token, source }) => {
                // Still valid for this process
                self.remember(&token);
                Err(AuthError::NotPersisted { token, source })
            }
            Err(e) => Err(e),
        }
    }
}
