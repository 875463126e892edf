//! OAuth 2.0 client: authorization URL, code exchange and refresh

use serde::Deserialize;
use std::time::Duration;
use typed_builder::TypedBuilder;
use url::Url;

use super::token::TokenInfo;
use crate::error::{AuthError, Result};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// OAuth endpoints and client identity
#[derive(Debug, Clone, TypedBuilder)]
pub struct OAuthConfig {
    /// OAuth client ID
    #[builder(setter(into))]
    pub client_id: String,
    /// Authorization endpoint URL
    pub authorize_url: Url,
    /// Token endpoint URL
    pub token_url: Url,
    /// Redirect URI registered for the client
    pub redirect_url: Url,
    /// Scopes to request
    #[builder(default)]
    pub scopes: Vec<String>,
}

/// OAuth response from token endpoint
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Error response from token endpoint
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// OAuth client for a single provider
#[derive(Debug, Clone)]
pub struct OAuthClient {
    config: OAuthConfig,
    http_client: reqwest::Client,
}

impl OAuthClient {
    /// Create a client for the given endpoints
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: OAuthConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    /// Get the OAuth configuration
    #[must_use]
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Build the authorization URL with state and PKCE challenge
    #[must_use]
    pub fn authorization_url(&self, state: &str, code_challenge: &str) -> Url {
        let mut url = self.config.authorize_url.clone();
        {
            let mut params = url.query_pairs_mut();
            params.append_pair("client_id", &self.config.client_id);
            params.append_pair("response_type", "code");
            params.append_pair("redirect_uri", self.config.redirect_url.as_str());
            if !self.config.scopes.is_empty() {
                params.append_pair("scope", &self.config.scopes.join(" "));
            }
            params.append_pair("state", state);
            params.append_pair("code_challenge", code_challenge);
            params.append_pair("code_challenge_method", "S256");
        }
        url
    }

    /// Exchange authorization code for access token
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the endpoint rejects the code.
    pub async fn exchange_code(&self, code: &str, code_verifier: &str) -> Result<TokenInfo> {
        tracing::debug!(token_url = %self.config.token_url, "Exchanging authorization code");

        let response = self
            .token_request(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.config.redirect_url.as_str()),
                ("client_id", &self.config.client_id),
                ("code_verifier", code_verifier),
            ])
            .await?;

        Ok(response.into_token(None))
    }

    /// Obtain a fresh access token from a refresh token
    ///
    /// The old refresh token is kept when the endpoint does not rotate it.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the endpoint rejects the
    /// refresh token.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenInfo> {
        tracing::debug!(token_url = %self.config.token_url, "Refreshing access token");

        let response = self
            .token_request(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", &self.config.client_id),
            ])
            .await?;

        Ok(response.into_token(Some(refresh_token)))
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .http_client
            .post(self.config.token_url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(params)
            .send()
            .await?;

        let status = response.status();
        let response_text = response.text().await?;

        // Try to parse as error first
        if let Ok(error) = serde_json::from_str::<ErrorResponse>(&response_text) {
            let msg = match error.error_description {
                Some(description) => format!("{}: {description}", error.error),
                None => error.error,
            };
            return Err(AuthError::exchange(msg));
        }

        if !status.is_success() {
            return Err(AuthError::exchange(format!(
                "token endpoint returned {status}"
            )));
        }

        serde_json::from_str(&response_text).map_err(|e| {
            AuthError::invalid_response(format!("Failed to parse token response: {e}"))
        })
    }
}

impl TokenResponse {
    fn into_token(self, previous_refresh_token: Option<&str>) -> TokenInfo {
        let refresh_token = self
            .refresh_token
            .filter(|token| !token.is_empty())
            .or_else(|| previous_refresh_token.map(str::to_string));

        let mut token = TokenInfo::new(self.access_token, refresh_token, self.expires_in);
        if let Some(token_type) = self.token_type.filter(|t| !t.is_empty()) {
            token.token_type = normalize_token_type(token_type);
        }
        token
    }
}

// Providers answer "bearer" but the header scheme is conventionally "Bearer"
fn normalize_token_type(token_type: String) -> String {
    if token_type.eq_ignore_ascii_case("bearer") {
        "Bearer".to_string()
    } else {
        token_type
    }
}

/// Open URL in default browser
///
/// # Errors
///
/// Returns [`AuthError::BrowserOpen`] if the platform opener cannot be
/// started.
pub fn open_browser(url: &str) -> Result<()> {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open")
            .arg(url)
            .spawn()
            .map_err(|e| AuthError::browser_open(e.to_string()))?;
    }

    #[cfg(target_os = "linux")]
    {
        std::process::Command::new("xdg-open")
            .arg(url)
            .spawn()
            .map_err(|e| AuthError::browser_open(e.to_string()))?;
    }

    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("cmd")
            .args(["/C", "start", "", url])
            .spawn()
            .map_err(|e| AuthError::browser_open(e.to_string()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(token_url: &str) -> OAuthConfig {
        OAuthConfig::builder()
            .client_id("client-123")
            .authorize_url(Url::parse("https://example.com/oauth/authorize").unwrap())
            .token_url(Url::parse(token_url).unwrap())
            .redirect_url(Url::parse("http://localhost:7171/auth/redirect").unwrap())
            .scopes(vec!["api".to_string(), "read_user".to_string()])
            .build()
    }

    #[test]
    fn test_authorization_url_parameters() {
        let client = OAuthClient::new(config("https://example.com/oauth/token")).unwrap();
        let url = client.authorization_url("state-abc", "challenge-xyz");

        assert_eq!(url.path(), "/oauth/authorize");
        let params: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params["client_id"], "client-123");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["redirect_uri"], "http://localhost:7171/auth/redirect");
        assert_eq!(params["scope"], "api read_user");
        assert_eq!(params["state"], "state-abc");
        assert_eq!(params["code_challenge"], "challenge-xyz");
        assert_eq!(params["code_challenge_method"], "S256");
    }

    #[tokio::test]
    async fn test_exchange_code_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=the-code"))
            .and(body_string_contains("code_verifier=the-verifier"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "t1",
                "refresh_token": "r1",
                "token_type": "bearer",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = OAuthClient::new(config(&format!("{}/oauth/token", server.uri()))).unwrap();
        let token = client.exchange_code("the-code", "the-verifier").await.unwrap();

        assert_eq!(token.access_token, "t1");
        assert_eq!(token.refresh_token.as_deref(), Some("r1"));
        assert_eq!(token.token_type, "Bearer");
        assert!(!token.is_expired());
    }

    #[tokio::test]
    async fn test_exchange_error_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "code expired"
            })))
            .mount(&server)
            .await;

        let client = OAuthClient::new(config(&format!("{}/oauth/token", server.uri()))).unwrap();
        let err = client.exchange_code("c", "v").await.unwrap_err();

        assert!(matches!(err, AuthError::Exchange(ref msg) if msg.contains("invalid_grant")));
    }

    #[tokio::test]
    async fn test_exchange_non_json_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let client = OAuthClient::new(config(&format!("{}/oauth/token", server.uri()))).unwrap();
        let err = client.exchange_code("c", "v").await.unwrap_err();

        assert!(matches!(err, AuthError::Exchange(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_refresh_keeps_refresh_token_when_not_rotated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=r0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "t2",
                "expires_in": 7200
            })))
            .mount(&server)
            .await;

        let client = OAuthClient::new(config(&format!("{}/oauth/token", server.uri()))).unwrap();
        let token = client.refresh_token("r0").await.unwrap();

        assert_eq!(token.access_token, "t2");
        assert_eq!(token.refresh_token.as_deref(), Some("r0"));
    }
}
