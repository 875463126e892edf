//! Interactive authorization code flow with PKCE
//!
//! [`PkceFlow::get_token`] runs one authorization attempt:
//!
//! 1. Generate a fresh `state` and code verifier
//! 2. Bind a one-route HTTP listener on the redirect path
//! 3. Hand the authorization URL to the browser launcher
//! 4. Wait for the callback, a failure, cancellation or the timeout
//! 5. Shut the listener down, whatever the outcome
//!
//! The callback handler checks for a provider `error`, then the `state`, then
//! the `code`, and only then exchanges the code. At most one result is ever
//! delivered; later callbacks are answered with `409 Conflict`.

use axum::Router;
use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::BrowserLauncher;
use super::oauth::OAuthClient;
use super::token::TokenInfo;
use crate::error::{AuthError, Result};

/// Default time to wait for the user to finish authorizing
pub const DEFAULT_AUTHORIZATION_TIMEOUT: Duration = Duration::from_secs(300);

/// Default time the callback server gets to stop after the flow ends
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

const SUCCESS_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Authentication complete</title></head>
<body style="font-family: system-ui; text-align: center; padding-top: 80px;">
<h2>Authentication successful!</h2>
<p>You can close this tab and return to the terminal.</p>
</body>
</html>"#;

const FAILURE_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Authentication failed</title></head>
<body style="font-family: system-ui; text-align: center; padding-top: 80px;">
<h2>Authentication failed</h2>
<p>Return to the terminal for details.</p>
</body>
</html>"#;

const ALREADY_HANDLED_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Already handled</title></head>
<body style="font-family: system-ui; text-align: center; padding-top: 80px;">
<h2>This authorization request has already been handled.</h2>
</body>
</html>"#;

// ============================================================================
// PKCE and state generation
// ============================================================================

/// PKCE code challenge data
#[derive(Clone)]
pub struct PkceChallenge {
    /// Code verifier (random string)
    pub verifier: String,
    /// Code challenge (SHA-256 hash of verifier, base64url encoded)
    pub challenge: String,
}

impl PkceChallenge {
    /// Generate a new S256 challenge pair from 256 random bits
    #[must_use]
    pub fn generate() -> Self {
        let verifier = random_token();
        let challenge = Self::challenge_for(&verifier);
        Self {
            verifier,
            challenge,
        }
    }

    /// `BASE64URL(SHA256(verifier))`
    #[must_use]
    pub fn challenge_for(verifier: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }
}

impl fmt::Debug for PkceChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PkceChallenge")
            .field("verifier", &"<redacted>")
            .field("challenge", &self.challenge)
            .finish()
    }
}

/// Generate a random state parameter (256 bits, base64url)
#[must_use]
pub fn generate_state() -> String {
    random_token()
}

fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

// ============================================================================
// Callback handling
// ============================================================================

type Delivery = oneshot::Sender<Result<TokenInfo>>;

struct CallbackState {
    expected_state: String,
    verifier: String,
    client: OAuthClient,
    delivery: Mutex<Option<Delivery>>,
}

#[derive(Debug, Default)]
struct CallbackParams {
    code: String,
    state: String,
    error: String,
    error_description: String,
}

impl CallbackParams {
    // Lenient: bad encodings decode lossily, repeated keys keep the first
    fn parse(query: &str) -> Self {
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let slot = match key.as_ref() {
                "code" => &mut params.code,
                "state" => &mut params.state,
                "error" => &mut params.error,
                "error_description" => &mut params.error_description,
                _ => continue,
            };
            if slot.is_empty() {
                *slot = value.into_owned();
            }
        }
        params
    }
}

async fn handle_callback(
    State(callback): State<Arc<CallbackState>>,
    RawQuery(query): RawQuery,
) -> (StatusCode, Html<&'static str>) {
    let delivery = callback
        .delivery
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    let Some(delivery) = delivery else {
        tracing::warn!("Ignoring repeated OAuth callback");
        return (StatusCode::CONFLICT, Html(ALREADY_HANDLED_PAGE));
    };

    let params = CallbackParams::parse(query.as_deref().unwrap_or_default());

    // The exchange owns the delivery sender, so it completes and reports
    // even if the browser disconnects and this handler is dropped
    let (page_tx, page_rx) = oneshot::channel();
    let exchange = Arc::clone(&callback);
    tokio::spawn(async move {
        let outcome = complete_authorization(&exchange, params).await;
        if let Err(e) = &outcome {
            tracing::warn!(error = %e, "OAuth callback rejected");
        }
        let _ = page_tx.send(outcome.is_ok());
        // The flow may already have given up
        let _ = delivery.send(outcome);
    });

    match page_rx.await {
        Ok(true) => (StatusCode::OK, Html(SUCCESS_PAGE)),
        _ => (StatusCode::BAD_REQUEST, Html(FAILURE_PAGE)),
    }
}

async fn complete_authorization(
    callback: &CallbackState,
    params: CallbackParams,
) -> Result<TokenInfo> {
    if !params.error.is_empty() {
        let msg = if params.error_description.is_empty() {
            params.error
        } else {
            format!("{}: {}", params.error, params.error_description)
        };
        return Err(AuthError::Provider(msg));
    }

    if params.state.as_bytes() != callback.expected_state.as_bytes() {
        return Err(AuthError::InvalidState);
    }

    if params.code.is_empty() {
        return Err(AuthError::MissingCode);
    }

    callback
        .client
        .exchange_code(&params.code, &callback.verifier)
        .await
}

// ============================================================================
// Flow driver
// ============================================================================

/// One-shot browser authorization with a local redirect listener
#[derive(Clone)]
pub struct PkceFlow {
    client: OAuthClient,
    listen_addr: String,
    launcher: BrowserLauncher,
    timeout: Duration,
    shutdown_grace: Duration,
}

impl fmt::Debug for PkceFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PkceFlow")
            .field("client", &self.client)
            .field("listen_addr", &self.listen_addr)
            .field("timeout", &self.timeout)
            .field("shutdown_grace", &self.shutdown_grace)
            .finish_non_exhaustive()
    }
}

impl PkceFlow {
    /// Create a flow listening on `listen_addr` (`host:port`)
    pub fn new(
        client: OAuthClient,
        listen_addr: impl Into<String>,
        launcher: BrowserLauncher,
    ) -> Self {
        Self {
            client,
            listen_addr: listen_addr.into(),
            launcher,
            timeout: DEFAULT_AUTHORIZATION_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// Set how long to wait for the callback
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set how long the listener gets to stop
    #[must_use]
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    fn callback_path(&self) -> String {
        let path = self.client.config().redirect_url.path();
        if path.is_empty() {
            "/".to_string()
        } else {
            path.to_string()
        }
    }

    /// Run one authorization attempt and return the exchanged token
    ///
    /// # Errors
    ///
    /// - [`AuthError::ServerStart`] if the listener cannot bind
    /// - [`AuthError::BrowserOpen`] if the launcher fails
    /// - [`AuthError::Provider`], [`AuthError::InvalidState`],
    ///   [`AuthError::MissingCode`] or an exchange error from the callback
    /// - [`AuthError::Cancelled`] if `cancel` fires first
    /// - [`AuthError::Timeout`] if nothing arrives in time
    pub async fn get_token(&self, cancel: &CancellationToken) -> Result<TokenInfo> {
        let state = generate_state();
        let pkce = PkceChallenge::generate();
        let auth_url = self.client.authorization_url(&state, &pkce.challenge);

        let listener = TcpListener::bind(&self.listen_addr).await.map_err(|e| {
            AuthError::server_start(format!("cannot listen on {}: {e}", self.listen_addr))
        })?;

        let (delivery_tx, mut delivery_rx) = oneshot::channel();
        let callback = Arc::new(CallbackState {
            expected_state: state,
            verifier: pkce.verifier,
            client: self.client.clone(),
            delivery: Mutex::new(Some(delivery_tx)),
        });
        let app = Router::new()
            .route(&self.callback_path(), get(handle_callback))
            .with_state(callback);

        let shutdown = CancellationToken::new();
        let mut server = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move { shutdown.cancelled().await })
                    .await
            }
        });
        tracing::info!(addr = %self.listen_addr, "Listening for OAuth callback");

        // Fire and forget; only a failure is reported back
        let (launch_tx, mut launch_rx) = oneshot::channel::<AuthError>();
        let launcher = Arc::clone(&self.launcher);
        let url = auth_url.to_string();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = launcher(&url) {
                let _ = launch_tx.send(e);
            }
        });
        tracing::info!("Launching browser for authorization");
        tracing::debug!(url = %auth_url, "Authorization URL");

        let mut server_finished = false;
        let outcome = tokio::select! {
            biased;
            delivered = &mut delivery_rx => delivered.unwrap_or_else(|_| {
                Err(AuthError::server("callback handler dropped without a result"))
            }),
            Ok(e) = &mut launch_rx => Err(e),
            joined = &mut server => {
                server_finished = true;
                Err(match joined {
                    Ok(Ok(())) => AuthError::server("listener stopped unexpectedly"),
                    Ok(Err(e)) => AuthError::server(e.to_string()),
                    Err(e) => AuthError::server(e.to_string()),
                })
            }
            () = cancel.cancelled() => Err(AuthError::Cancelled),
            () = tokio::time::sleep(self.timeout) => Err(AuthError::Timeout(self.timeout)),
        };

        shutdown.cancel();
        if !server_finished {
            match tokio::time::timeout(self.shutdown_grace, &mut server).await {
                Ok(_) => tracing::debug!("OAuth callback server stopped"),
                Err(_) => {
                    tracing::warn!(
                        grace = ?self.shutdown_grace,
                        "OAuth callback server did not stop in time, aborting"
                    );
                    server.abort();
                }
            }
        }

        match &outcome {
            Ok(_) => tracing::info!("Authorization completed"),
            Err(e) => tracing::debug!(error = %e, "Authorization did not complete"),
        }
        outcome
    }
}
