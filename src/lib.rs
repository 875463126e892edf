//! # API Credentials
//!
//! Credential sources and OAuth2 authentication for remote API clients.
//! Async/await, strong typing, tokio-based.
//!
//! ## Quick Start
//!
//! Resolve an auth entry from the configuration document and attach it to a
//! request:
//!
//! ```no_run
//! use api_credentials::{Auth, AuthResolver, CredentialResolver};
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let auth: Auth = serde_json::from_str(
//!         r#"{
//!             "name": "work",
//!             "auth-info": {
//!                 "personal-access-token": { "token-source": { "env-var": "GITLAB_TOKEN" } }
//!             }
//!         }"#,
//!     )?;
//!
//!     let resolver = AuthResolver::new(CredentialResolver::default());
//!     let base_url = Url::parse("https://gitlab.example.com")?;
//!     let source = resolver.resolve_auth_source(&auth, &base_url).await?;
//!
//!     let request = reqwest::Client::new().get(base_url.join("api/v4/user")?);
//!     let response = source.apply(request).await?.send().await?;
//!     println!("{}", response.status());
//!     Ok(())
//! }
//! ```
//!
//! ## Core Features
//!
//! ### 1. Credential Sources
//!
//! A [`CredentialSource`] says where a secret lives: inline, in an
//! environment variable, in a file, in the OS keyring, or behind an external
//! command. [`CredentialResolver`] reads and writes them:
//!
//! ```no_run
//! # use api_credentials::{CredentialResolver, CredentialSource};
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let resolver = CredentialResolver::default();
//! let mut source = CredentialSource::file("~/.config/glab/token");
//!
//! resolver.persist(&mut source, "glpat-xxxx").await?;
//! match resolver.resolve(&source).await {
//!     Ok(token) => println!("token has {} bytes", token.len()),
//!     Err(e) if e.is_not_found() => println!("no token stored yet"),
//!     Err(e) => return Err(e.into()),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! `exec` sources are disabled unless enabled through [`ResolverConfig`].
//!
//! ### 2. OAuth2 with PKCE
//!
//! OAuth2 identities need [`OAuth2Settings`]. When no refresh token is stored
//! and interactive authorization is allowed, the browser flow runs with a
//! local callback listener; afterwards tokens are refreshed under a lock per
//! identity:
//!
//! ```no_run
//! # use api_credentials::{Auth, AuthResolver, CredentialResolver, OAuth2Settings};
//! # use url::Url;
//! # async fn example(auth: Auth) -> Result<(), Box<dyn std::error::Error>> {
//! let settings = OAuth2Settings::builder()
//!     .client_id("my-client-id")
//!     .redirect_url(Url::parse("http://localhost:7171/auth/redirect")?)
//!     .scopes(vec!["api".to_string()])
//!     .interactive(true)
//!     .build();
//!
//! let resolver = AuthResolver::new(CredentialResolver::default()).with_oauth2(settings);
//! let source = resolver
//!     .resolve_auth_source(&auth, &Url::parse("https://gitlab.example.com")?)
//!     .await?;
//!
//! // Save literal token fields back into the configuration document
//! if let Some(store) = resolver.token_store(&auth) {
//!     let fields = store.credentials().await;
//!     println!("{}", serde_json::to_string(&fields)?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`types`]: Configuration document types
//! - [`credential`]: Credential source backends
//! - [`auth`]: Auth sources, token store and the PKCE flow
//! - [`error`]: Error types and handling
//!
//! ## Feature Flags
//!
//! - `keyring` (default) - OS credential store backend via the
//!   [keyring](https://crates.io/crates/keyring) crate
//!
//! ## Logging
//!
//! This crate uses [`tracing`](https://crates.io/crates/tracing) for structured logging.
//! Tracing events are always emitted but are zero-cost when no subscriber is attached.
//! Secret values are never logged. To see logs, attach a tracing subscriber in your
//! application:
//!
//! ```rust,ignore
//! tracing_subscriber::fmt::init();
//! ```
//!
//! ## Error Handling
//!
//! Auth operations return [`Result<T, AuthError>`](Result). A missing
//! credential is the one recoverable condition:
//!
//! ```no_run
//! # use api_credentials::{Auth, AuthError, AuthResolver, CredentialResolver};
//! # use url::Url;
//! # async fn example(auth: Auth, base_url: Url) {
//! let resolver = AuthResolver::new(CredentialResolver::default());
//! match resolver.resolve_auth_source(&auth, &base_url).await {
//!     Ok(source) => { /* ... */ }
//!     Err(e) if e.is_not_found() => {
//!         eprintln!("No credential stored: {}", e);
//!     }
//!     Err(AuthError::NotPersisted { token, .. }) => {
//!         eprintln!("Token valid until {:?} but not saved", token.expires_at);
//!     }
//!     Err(e) => {
//!         eprintln!("Error: {}", e);
//!     }
//! }
//! # }
//! ```
//!
//! ## Security
//!
//! - **File permissions** - File sources are written with mode 0600
//! - **PKCE and state** - Fresh per flow, the state is checked before any exchange
//! - **Redaction** - `Debug` output never contains secret values
//! - **Timeouts** - External commands and the browser flow are bounded

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod credential;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use auth::{
    AuthResolver, AuthSource, BrowserLauncher, OAuth2Settings, OAuthClient, OAuthConfig,
    PkceFlow, TokenInfo, TokenSource, TokenStore,
};
pub use credential::{CredentialError, CredentialResolver, ResolverConfig};
pub use error::{AuthError, Result};
pub use types::{
    Auth, AuthInfo, BasicAuth, CredentialSource, ExecCommand, KeyringEntry, OAuth2Credentials,
    Secret, TokenAuth,
};

/// Version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
