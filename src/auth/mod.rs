//! Auth source resolution and OAuth2 support
//!
//! [`AuthResolver`] turns an [`Auth`] entry from the configuration document
//! into an [`AuthSource`] that can be attached to outgoing requests.
//!
//! # Overview
//!
//! - Personal access tokens and job tokens are resolved once into static
//!   credentials.
//! - Basic auth resolves the username and password independently.
//! - OAuth2 identities get a refreshing token source. If no refresh token is
//!   stored yet and interactive authorization is allowed, the browser based
//!   PKCE flow runs first and its token is written back.
//!
//! # Example
//!
//! ```no_run
//! use api_credentials::{Auth, AuthResolver, CredentialResolver};
//! use url::Url;
//!
//! # async fn example(auth: Auth) -> Result<(), Box<dyn std::error::Error>> {
//! let resolver = AuthResolver::new(CredentialResolver::default());
//! let base_url = Url::parse("https://gitlab.example.com")?;
//!
//! let source = resolver.resolve_auth_source(&auth, &base_url).await?;
//! let request = reqwest::Client::new().get(base_url.join("api/v4/user")?);
//! let response = source.apply(request).await?.send().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Security
//!
//! - PKCE and a per-flow `state` protect the authorization code
//! - Refreshes of one identity are serialized; other identities never wait
//! - Secrets are redacted from `Debug` output and never logged

mod oauth;
mod pkce;
mod store;
mod token;

pub use oauth::{OAuthClient, OAuthConfig, open_browser};
pub use pkce::{
    DEFAULT_AUTHORIZATION_TIMEOUT, DEFAULT_SHUTDOWN_GRACE, PkceChallenge, PkceFlow, generate_state,
};
pub use store::{RefreshingTokenSource, ReuseTokenSource, TokenSource, TokenStore};
pub use token::TokenInfo;

use reqwest::RequestBuilder;
use reqwest::header::AUTHORIZATION;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;
use url::Url;

use crate::credential::{CredentialError, CredentialResolver};
use crate::error::{AuthError, Result};
use crate::types::{Auth, AuthInfo, OAuth2Credentials};

/// Header carrying CI job tokens
pub const JOB_TOKEN_HEADER: &str = "JOB-TOKEN";

/// Opens the authorization URL for the user
pub type BrowserLauncher = Arc<dyn Fn(&str) -> Result<()> + Send + Sync>;

/// Launcher using the platform's default browser
#[must_use]
pub fn default_launcher() -> BrowserLauncher {
    Arc::new(open_browser)
}

// ============================================================================
// OAuth2 client settings
// ============================================================================

/// OAuth2 client settings supplied by the application
#[derive(Clone, TypedBuilder)]
pub struct OAuth2Settings {
    /// OAuth client ID
    #[builder(setter(into))]
    pub client_id: String,

    /// Redirect URI registered for the client
    pub redirect_url: Url,

    /// Scopes to request
    #[builder(default)]
    pub scopes: Vec<String>,

    /// Whether the browser flow may run when no token is stored
    #[builder(default)]
    pub interactive: bool,

    /// Opens the authorization URL
    #[builder(default = default_launcher())]
    pub launcher: BrowserLauncher,

    /// Callback listener address; defaults to the redirect URL's host and port
    #[builder(default, setter(strip_option, into))]
    pub listen_addr: Option<String>,

    /// Authorization endpoint; defaults to `{base}/oauth/authorize`
    #[builder(default, setter(strip_option))]
    pub authorize_url: Option<Url>,

    /// Token endpoint; defaults to `{base}/oauth/token`
    #[builder(default, setter(strip_option))]
    pub token_url: Option<Url>,

    /// How long to wait for the browser callback
    #[builder(default = DEFAULT_AUTHORIZATION_TIMEOUT)]
    pub authorization_timeout: Duration,

    /// How long the callback listener gets to stop
    #[builder(default = DEFAULT_SHUTDOWN_GRACE)]
    pub shutdown_grace: Duration,
}

impl fmt::Debug for OAuth2Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuth2Settings")
            .field("client_id", &self.client_id)
            .field("redirect_url", &self.redirect_url.as_str())
            .field("scopes", &self.scopes)
            .field("interactive", &self.interactive)
            .field("listen_addr", &self.listen_addr)
            .field("authorize_url", &self.authorize_url.as_ref().map(Url::as_str))
            .field("token_url", &self.token_url.as_ref().map(Url::as_str))
            .field("authorization_timeout", &self.authorization_timeout)
            .field("shutdown_grace", &self.shutdown_grace)
            .finish_non_exhaustive()
    }
}

impl OAuth2Settings {
    /// Endpoints and client identity for the instance at `base_url`
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] if a default endpoint cannot be
    /// derived from `base_url`.
    pub fn oauth_config(&self, base_url: &Url) -> Result<OAuthConfig> {
        // Without a trailing slash `join` would replace the last segment
        let mut base = base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let authorize_url = match &self.authorize_url {
            Some(url) => url.clone(),
            None => base.join("oauth/authorize")?,
        };
        let token_url = match &self.token_url {
            Some(url) => url.clone(),
            None => base.join("oauth/token")?,
        };

        Ok(OAuthConfig::builder()
            .client_id(self.client_id.clone())
            .authorize_url(authorize_url)
            .token_url(token_url)
            .redirect_url(self.redirect_url.clone())
            .scopes(self.scopes.clone())
            .build())
    }

    /// Address the callback listener binds to
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] if no address is set and the
    /// redirect URL has no host or port.
    pub fn callback_listen_addr(&self) -> Result<String> {
        if let Some(addr) = &self.listen_addr {
            return Ok(addr.clone());
        }
        let host = self.redirect_url.host_str().ok_or_else(|| {
            AuthError::invalid_config(format!("redirect URL {} has no host", self.redirect_url))
        })?;
        let port = self.redirect_url.port_or_known_default().ok_or_else(|| {
            AuthError::invalid_config(format!("redirect URL {} has no port", self.redirect_url))
        })?;
        Ok(format!("{host}:{port}"))
    }
}

// ============================================================================
// Auth source
// ============================================================================

/// Ready-to-use credential for outgoing requests
#[derive(Clone)]
pub enum AuthSource {
    /// Static token sent as `Authorization: Bearer`
    Bearer(String),
    /// CI job token sent in the [`JOB_TOKEN_HEADER`] header
    JobToken(String),
    /// HTTP basic authentication
    Basic {
        /// Username
        username: String,
        /// Password
        password: String,
    },
    /// OAuth2 access tokens, refreshed on expiry
    OAuth2(Arc<ReuseTokenSource>),
}

impl fmt::Debug for AuthSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bearer(_) => f.write_str("Bearer(<redacted>)"),
            Self::JobToken(_) => f.write_str("JobToken(<redacted>)"),
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::OAuth2(source) => f.debug_tuple("OAuth2").field(source).finish(),
        }
    }
}

impl AuthSource {
    /// Attach the credential to `request`
    ///
    /// # Errors
    ///
    /// Returns the token source error if an OAuth2 token cannot be refreshed.
    /// A refreshed token that could not be persisted is reported as
    /// [`AuthError::NotPersisted`]; the request is not built in that case,
    /// but the next call reuses the in-memory token.
    pub async fn apply(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        Ok(match self {
            Self::Bearer(token) => request.bearer_auth(token),
            Self::JobToken(token) => request.header(JOB_TOKEN_HEADER, token),
            Self::Basic { username, password } => request.basic_auth(username, Some(password)),
            Self::OAuth2(source) => {
                let token = source.token().await?;
                request.header(AUTHORIZATION, token.authorization_header())
            }
        })
    }
}

// ============================================================================
// Auth resolver
// ============================================================================

/// Resolves [`Auth`] entries into [`AuthSource`]s
#[derive(Debug)]
pub struct AuthResolver {
    credentials: CredentialResolver,
    oauth2: Option<OAuth2Settings>,
    // Keyed by auth name, with the fields each store was created from
    stores: Mutex<HashMap<String, (OAuth2Credentials, TokenStore)>>,
}

impl AuthResolver {
    /// Create a resolver without OAuth2 support
    #[must_use]
    pub fn new(credentials: CredentialResolver) -> Self {
        Self {
            credentials,
            oauth2: None,
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Enable OAuth2 identities with the given client settings
    #[must_use]
    pub fn with_oauth2(mut self, settings: OAuth2Settings) -> Self {
        self.oauth2 = Some(settings);
        self
    }

    /// The underlying credential resolver
    #[must_use]
    pub fn credentials(&self) -> &CredentialResolver {
        &self.credentials
    }

    /// Token store of an OAuth2 identity
    ///
    /// Stores are created on first use and shared by every later resolution
    /// of the same auth name. An entry whose token fields differ from the
    /// ones the store was created from, such as one from a reloaded
    /// document, replaces the cached store. Use [`TokenStore::credentials`] to save the
    /// current token fields back into the configuration document.
    #[must_use]
    pub fn token_store(&self, auth: &Auth) -> Option<TokenStore> {
        match &auth.auth_info {
            AuthInfo::OAuth2(credentials) => Some(self.store_for(&auth.name, credentials)),
            _ => None,
        }
    }

    fn store_for(&self, name: &str, credentials: &OAuth2Credentials) -> TokenStore {
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((origin, store)) = stores.get(name) {
            if origin == credentials {
                return store.clone();
            }
            tracing::debug!(auth = name, "OAuth2 token fields changed, replacing token store");
        }

        let store = TokenStore::new(self.credentials.clone(), credentials.clone());
        stores.insert(name.to_string(), (credentials.clone(), store.clone()));
        store
    }

    /// Resolve `auth` for the instance at `base_url`
    ///
    /// # Errors
    ///
    /// See [`AuthResolver::resolve_auth_source_with_cancel`].
    pub async fn resolve_auth_source(&self, auth: &Auth, base_url: &Url) -> Result<AuthSource> {
        self.resolve_auth_source_with_cancel(auth, base_url, &CancellationToken::new())
            .await
    }

    /// Resolve `auth`, aborting an interactive authorization when `cancel`
    /// fires
    ///
    /// # Errors
    ///
    /// - credential errors unchanged, including not-found
    /// - [`AuthError::InvalidConfig`] for an OAuth2 identity without
    ///   [`OAuth2Settings`]
    /// - any [`PkceFlow::get_token`] error when the browser flow runs
    /// - [`AuthError::NotPersisted`] if the flow's token could not be saved
    pub async fn resolve_auth_source_with_cancel(
        &self,
        auth: &Auth,
        base_url: &Url,
        cancel: &CancellationToken,
    ) -> Result<AuthSource> {
        tracing::debug!(
            auth = %auth.name,
            method = auth.auth_info.method(),
            "Resolving auth source"
        );

        match &auth.auth_info {
            AuthInfo::PersonalAccessToken(token) => Ok(AuthSource::Bearer(
                self.credentials.resolve_secret(&token.token).await?,
            )),
            AuthInfo::JobToken(token) => Ok(AuthSource::JobToken(
                self.credentials.resolve_secret(&token.token).await?,
            )),
            AuthInfo::BasicAuth(basic) => Ok(AuthSource::Basic {
                username: self.credentials.resolve_secret(&basic.username).await?,
                password: self.credentials.resolve_secret(&basic.password).await?,
            }),
            AuthInfo::OAuth2(credentials) => {
                self.resolve_oauth2(auth, credentials, base_url, cancel)
                    .await
            }
        }
    }

    async fn resolve_oauth2(
        &self,
        auth: &Auth,
        credentials: &OAuth2Credentials,
        base_url: &Url,
        cancel: &CancellationToken,
    ) -> Result<AuthSource> {
        let settings = self.oauth2.as_ref().ok_or_else(|| {
            AuthError::invalid_config(format!(
                "auth `{}` uses OAuth2 but no OAuth2 client settings were provided",
                auth.name
            ))
        })?;
        let client = OAuthClient::new(settings.oauth_config(base_url)?)?;
        let store = self.store_for(&auth.name, credentials);

        let mut token = store.read_token(true).await?;
        if token.refresh_token.is_none() {
            if !settings.interactive {
                return Err(CredentialError::NotFound(format!(
                    "OAuth2 refresh token for `{}`",
                    auth.name
                ))
                .into());
            }

            tracing::info!(
                auth = %auth.name,
                "No stored OAuth2 token, starting browser authorization"
            );
            let flow = PkceFlow::new(
                client.clone(),
                settings.callback_listen_addr()?,
                Arc::clone(&settings.launcher),
            )
            .timeout(settings.authorization_timeout)
            .shutdown_grace(settings.shutdown_grace);

            token = flow.get_token(cancel).await?;
            if let Err(e) = store.write_token(&token).await {
                tracing::warn!(
                    auth = %auth.name,
                    error = %e,
                    "OAuth2 token could not be persisted"
                );
                return Err(AuthError::not_persisted(token, e));
            }
        }

        let refreshing = Arc::new(RefreshingTokenSource::new(store, client));
        Ok(AuthSource::OAuth2(Arc::new(ReuseTokenSource::new(
            Some(token),
            refreshing,
        ))))
    }
}
