//! Auth entries as they appear in the configuration document

use serde::{Deserialize, Serialize};

use super::credential::{CredentialSource, Secret};

// ============================================================================
// Auth entity
// ============================================================================

/// A named identity from the configuration document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Auth {
    /// Name the identity is referenced by
    pub name: String,
    /// How this identity authenticates
    pub auth_info: AuthInfo,
}

impl Auth {
    /// Create a named auth entry
    pub fn new(name: impl Into<String>, auth_info: AuthInfo) -> Self {
        Self {
            name: name.into(),
            auth_info,
        }
    }
}

/// Authentication method of an [`Auth`] entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthInfo {
    /// Personal access token
    PersonalAccessToken(TokenAuth),
    /// CI job token
    JobToken(TokenAuth),
    /// OAuth2 authorization code flow with refreshable tokens
    #[serde(rename = "oauth2")]
    OAuth2(OAuth2Credentials),
    /// HTTP basic authentication
    BasicAuth(BasicAuth),
}

impl AuthInfo {
    /// Short method name, used in logs
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::PersonalAccessToken(_) => "personal-access-token",
            Self::JobToken(_) => "job-token",
            Self::OAuth2(_) => "oauth2",
            Self::BasicAuth(_) => "basic-auth",
        }
    }
}

// ============================================================================
// Static token
// ============================================================================

/// A single static token (`token` or `token-source`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTokenAuth", into = "RawTokenAuth")]
pub struct TokenAuth {
    /// The token
    pub token: Secret,
}

impl TokenAuth {
    /// Create from a literal or sourced secret
    pub fn new(token: impl Into<Secret>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawTokenAuth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token_source: Option<CredentialSource>,
}

impl TryFrom<RawTokenAuth> for TokenAuth {
    type Error = String;

    fn try_from(raw: RawTokenAuth) -> Result<Self, Self::Error> {
        Ok(Self {
            token: Secret::required_pair("token", raw.token, raw.token_source)?,
        })
    }
}

impl From<TokenAuth> for RawTokenAuth {
    fn from(auth: TokenAuth) -> Self {
        let (token, token_source) = Secret::into_pair(Some(auth.token));
        Self {
            token,
            token_source,
        }
    }
}

// ============================================================================
// Basic auth
// ============================================================================

/// Username and password, each literal or sourced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawBasicAuth", into = "RawBasicAuth")]
pub struct BasicAuth {
    /// Username
    pub username: Secret,
    /// Password
    pub password: Secret,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawBasicAuth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    username_source: Option<CredentialSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password_source: Option<CredentialSource>,
}

impl TryFrom<RawBasicAuth> for BasicAuth {
    type Error = String;

    fn try_from(raw: RawBasicAuth) -> Result<Self, Self::Error> {
        Ok(Self {
            username: Secret::required_pair("username", raw.username, raw.username_source)?,
            password: Secret::required_pair("password", raw.password, raw.password_source)?,
        })
    }
}

impl From<BasicAuth> for RawBasicAuth {
    fn from(auth: BasicAuth) -> Self {
        let (username, username_source) = Secret::into_pair(Some(auth.username));
        let (password, password_source) = Secret::into_pair(Some(auth.password));
        Self {
            username,
            username_source,
            password,
            password_source,
        }
    }
}

// ============================================================================
// OAuth2 token fields
// ============================================================================

/// Where the OAuth2 token fields of an identity live
///
/// Every field is optional: before the first authorization none of them
/// exist. A field without a source is written back as a literal, which is
/// only durable once the caller saves the owning document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawOAuth2Credentials", into = "RawOAuth2Credentials")]
pub struct OAuth2Credentials {
    /// Access token
    pub access_token: Option<Secret>,
    /// Refresh token
    pub refresh_token: Option<Secret>,
    /// Access token expiry, RFC 3339
    pub expiry: Option<Secret>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawOAuth2Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token_source: Option<CredentialSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token_source: Option<CredentialSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expiry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expiry_source: Option<CredentialSource>,
}

impl TryFrom<RawOAuth2Credentials> for OAuth2Credentials {
    type Error = String;

    fn try_from(raw: RawOAuth2Credentials) -> Result<Self, Self::Error> {
        Ok(Self {
            access_token: Secret::from_pair(
                "access-token",
                raw.access_token,
                raw.access_token_source,
            )?,
            refresh_token: Secret::from_pair(
                "refresh-token",
                raw.refresh_token,
                raw.refresh_token_source,
            )?,
            expiry: Secret::from_pair("expiry", raw.expiry, raw.expiry_source)?,
        })
    }
}

impl From<OAuth2Credentials> for RawOAuth2Credentials {
    fn from(creds: OAuth2Credentials) -> Self {
        let (access_token, access_token_source) = Secret::into_pair(creds.access_token);
        let (refresh_token, refresh_token_source) = Secret::into_pair(creds.refresh_token);
        let (expiry, expiry_source) = Secret::into_pair(creds.expiry);
        Self {
            access_token,
            access_token_source,
            refresh_token,
            refresh_token_source,
            expiry,
            expiry_source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_personal_access_token_source() {
        let info: AuthInfo = serde_json::from_str(
            r#"{"personal-access-token": {"token-source": {"env-var": "TOK"}}}"#,
        )
        .unwrap();

        assert_eq!(
            info,
            AuthInfo::PersonalAccessToken(TokenAuth::new(CredentialSource::env_var("TOK")))
        );
        assert_eq!(info.method(), "personal-access-token");
    }

    #[test]
    fn test_token_requires_exactly_one_form() {
        let neither = serde_json::from_str::<AuthInfo>(r#"{"job-token": {}}"#);
        assert!(neither.is_err());

        let both = serde_json::from_str::<AuthInfo>(
            r#"{"job-token": {"token": "a", "token-source": {"env-var": "B"}}}"#,
        );
        assert!(both.is_err());
    }

    #[test]
    fn test_basic_auth_mixed_forms() {
        let info: AuthInfo = serde_json::from_str(
            r#"{"basic-auth": {"username": "me", "password-source": {"file": "~/.pw"}}}"#,
        )
        .unwrap();

        let AuthInfo::BasicAuth(basic) = info else {
            panic!("expected basic auth");
        };
        assert_eq!(basic.username, Secret::literal("me"));
        assert_eq!(basic.password, Secret::source(CredentialSource::file("~/.pw")));
    }

    #[test]
    fn test_oauth2_fields_optional() {
        let info: AuthInfo = serde_json::from_str(r#"{"oauth2": {}}"#).unwrap();
        assert_eq!(info, AuthInfo::OAuth2(OAuth2Credentials::default()));
    }

    #[test]
    fn test_oauth2_serializes_back_to_pairs() {
        let creds = OAuth2Credentials {
            access_token: Some(Secret::literal("a")),
            refresh_token: Some(Secret::source(CredentialSource::keyring("svc", "me"))),
            expiry: None,
        };
        let auth = Auth::new("work", AuthInfo::OAuth2(creds));

        let json = serde_json::to_value(&auth).unwrap();
        assert_eq!(json["name"], "work");
        assert_eq!(json["auth-info"]["oauth2"]["access-token"], "a");
        assert_eq!(
            json["auth-info"]["oauth2"]["refresh-token-source"]["keyring"]["service"],
            "svc"
        );
        assert!(json["auth-info"]["oauth2"].get("expiry").is_none());

        let back: Auth = serde_json::from_value(json).unwrap();
        assert_eq!(back, auth);
    }
}
