//! End-to-end resolution of auth entries parsed from configuration JSON

use api_credentials::credential::MemoryKeyring;
use api_credentials::{
    Auth, AuthResolver, AuthSource, CredentialError, CredentialResolver, CredentialSource,
    ResolverConfig,
};
use std::sync::Arc;
use url::Url;

fn resolver(config: ResolverConfig) -> AuthResolver {
    AuthResolver::new(CredentialResolver::new(config).with_keyring(Arc::new(MemoryKeyring::new())))
}

fn base_url() -> Url {
    Url::parse("https://gitlab.example.com").unwrap()
}

#[tokio::test]
async fn test_personal_access_token_from_env() {
    let auth: Auth = serde_json::from_value(serde_json::json!({
        "name": "work",
        "auth-info": {
            "personal-access-token": { "token-source": { "env-var": "TOK" } }
        }
    }))
    .unwrap();
    let resolver = resolver(ResolverConfig::default());

    // SAFETY: no other test in this binary touches TOK
    unsafe { std::env::set_var("TOK", "abc123") };
    let source = resolver.resolve_auth_source(&auth, &base_url()).await.unwrap();
    assert!(matches!(source, AuthSource::Bearer(ref token) if token == "abc123"));

    unsafe { std::env::remove_var("TOK") };
    let err = resolver.resolve_auth_source(&auth, &base_url()).await.unwrap_err();
    assert!(err.is_not_found(), "got {err:?}");
}

#[tokio::test]
async fn test_file_source_with_variable_expansion() {
    let dir = tempfile::TempDir::new().unwrap();
    // SAFETY: the variable is unique to this test
    unsafe { std::env::set_var("API_CREDS_IT_DIR", dir.path()) };

    let credentials = CredentialResolver::default();
    let mut source = CredentialSource::file("${API_CREDS_IT_DIR}/nested/job-token");
    credentials.persist(&mut source, "job-secret\n").await.unwrap();

    let path = dir.path().join("nested/job-token");
    assert!(path.exists());
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    let auth: Auth = serde_json::from_value(serde_json::json!({
        "name": "ci",
        "auth-info": {
            "job-token": { "token-source": { "file": "$API_CREDS_IT_DIR/nested/job-token" } }
        }
    }))
    .unwrap();
    let source = resolver(ResolverConfig::default())
        .resolve_auth_source(&auth, &base_url())
        .await
        .unwrap();
    assert!(matches!(source, AuthSource::JobToken(ref token) if token == "job-secret"));
}

#[tokio::test]
async fn test_missing_keyring_entry_is_not_found() {
    let auth: Auth = serde_json::from_value(serde_json::json!({
        "name": "basic",
        "auth-info": {
            "basic-auth": {
                "username": "alice",
                "password-source": { "keyring": { "service": "gitlab", "user": "alice" } }
            }
        }
    }))
    .unwrap();

    let err = resolver(ResolverConfig::default())
        .resolve_auth_source(&auth, &base_url())
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "got {err:?}");
}

#[test]
fn test_conflicting_fields_are_rejected() {
    let result = serde_json::from_value::<Auth>(serde_json::json!({
        "name": "bad",
        "auth-info": {
            "personal-access-token": {
                "token": "abc",
                "token-source": { "env-var": "TOK" }
            }
        }
    }));
    assert!(result.is_err());
}

#[cfg(unix)]
mod exec {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn helper(dir: &Path, body: &str) -> serde_json::Value {
        let path = dir.join("credential-helper");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        serde_json::json!({ "exec": { "command": path.to_str().unwrap(), "args": ["get"] } })
    }

    fn pat(token_source: serde_json::Value) -> Auth {
        serde_json::from_value(serde_json::json!({
            "name": "helper",
            "auth-info": { "personal-access-token": { "token-source": token_source } }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_exec_source_when_enabled() {
        let dir = tempfile::TempDir::new().unwrap();
        let auth = pat(helper(dir.path(), "[ \"$1\" = get ] && echo helper-token"));
        let enabled = ResolverConfig::builder().exec_enabled(true).build();

        let source = resolver(enabled)
            .resolve_auth_source(&auth, &base_url())
            .await
            .unwrap();
        assert!(matches!(source, AuthSource::Bearer(ref token) if token == "helper-token"));
    }

    #[tokio::test]
    async fn test_exec_exit_two_is_not_found() {
        let dir = tempfile::TempDir::new().unwrap();
        let auth = pat(helper(dir.path(), "exit 2"));
        let enabled = ResolverConfig::builder().exec_enabled(true).build();

        let err = resolver(enabled)
            .resolve_auth_source(&auth, &base_url())
            .await
            .unwrap_err();
        assert!(err.is_not_found(), "got {err:?}");
    }

    #[tokio::test]
    async fn test_exec_disabled_is_unsupported() {
        let dir = tempfile::TempDir::new().unwrap();
        let auth = pat(helper(dir.path(), "echo never"));

        let err = resolver(ResolverConfig::default())
            .resolve_auth_source(&auth, &base_url())
            .await
            .unwrap_err();
        assert!(
            matches!(
                err,
                api_credentials::AuthError::Credential(CredentialError::Unsupported(_))
            ),
            "got {err:?}"
        );
    }
}
