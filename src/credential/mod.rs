//! Credential source resolution
//!
//! [`CredentialResolver`] reads and writes secret values behind a
//! [`CredentialSource`]. Every backend reports a missing value as
//! [`CredentialError::NotFound`], which callers may treat as a cue to fall
//! back to an interactive flow. All other errors are fatal for the call.
//!
//! The resolver does no locking of its own. Callers needing atomicity across
//! a read and a write must provide it.
//!
//! # Example
//!
//! ```no_run
//! use api_credentials::credential::CredentialResolver;
//! use api_credentials::types::CredentialSource;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let resolver = CredentialResolver::default();
//! let token = resolver
//!     .resolve(&CredentialSource::file("~/.config/api/token"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod exec;
mod file;
mod keyring;
mod path;

pub use exec::{EXIT_NOT_FOUND, WRITE_FLAG};
pub use self::keyring::{KeyringBackend, MemoryKeyring, OsKeyring};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use typed_builder::TypedBuilder;

use crate::types::{CredentialSource, KeyringEntry, Secret};

/// Errors from reading or writing a credential source
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The backend has no value for this source
    #[error("Credential not found in {0}")]
    NotFound(String),

    /// The source kind is disabled or unavailable in this build
    #[error("Unsupported credential source: {0}")]
    Unsupported(String),

    /// Filesystem error
    #[error("Credential I/O error on {}: {source}", .path.display())]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// OS credential store error
    #[error("Keyring error: {0}")]
    Keyring(String),

    /// Credential helper failed
    #[error("Credential command `{command}` failed: {message}")]
    Exec {
        /// Command as configured
        command: String,
        /// What went wrong
        message: String,
    },

    /// Credential helper did not finish in time
    #[error("Credential command `{command}` timed out after {}s", .after.as_secs())]
    Timeout {
        /// Command as configured
        command: String,
        /// Timeout that elapsed
        after: Duration,
    },

    /// The stored value is unusable
    #[error("Invalid credential value: {0}")]
    Invalid(String),
}

impl CredentialError {
    /// Whether this is the recoverable "no value" condition
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Create an unsupported-source error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub(crate) fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub(crate) fn exec(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Exec {
            command: command.into(),
            message: message.into(),
        }
    }
}

/// Resolver settings
#[derive(Debug, Clone, Default, TypedBuilder, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResolverConfig {
    /// Allow `exec` sources. When off, both reads and writes of an exec
    /// source return [`CredentialError::Unsupported`].
    #[builder(default)]
    #[serde(default)]
    pub exec_enabled: bool,
}

/// Reads and writes secret values from credential sources
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    config: ResolverConfig,
    keyring: Arc<dyn KeyringBackend>,
}

impl Default for CredentialResolver {
    fn default() -> Self {
        Self::new(ResolverConfig::default())
    }
}

impl CredentialResolver {
    /// Create a resolver backed by the OS keyring
    #[must_use]
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            config,
            keyring: Arc::new(OsKeyring),
        }
    }

    /// Replace the keyring backend
    #[must_use]
    pub fn with_keyring(mut self, keyring: Arc<dyn KeyringBackend>) -> Self {
        self.keyring = keyring;
        self
    }

    /// Resolver settings
    #[must_use]
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Read the secret value behind `source`
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::NotFound`] when the backend has no value,
    /// [`CredentialError::Unsupported`] for a disabled exec source, and
    /// backend-specific errors otherwise.
    pub async fn resolve(&self, source: &CredentialSource) -> Result<String, CredentialError> {
        tracing::debug!(kind = source.kind(), "Resolving credential");

        match source {
            CredentialSource::Value(value) => Ok(value.clone()),
            CredentialSource::EnvVar(name) => match std::env::var(name) {
                Ok(value) => Ok(value),
                Err(std::env::VarError::NotPresent) => Err(CredentialError::NotFound(format!(
                    "environment variable {name}"
                ))),
                Err(std::env::VarError::NotUnicode(_)) => Err(CredentialError::Invalid(format!(
                    "environment variable {name} is not valid UTF-8"
                ))),
            },
            CredentialSource::File(path) => file::read(path),
            CredentialSource::Keyring(entry) => self.keyring_get(entry.clone()).await,
            CredentialSource::Exec(cmd) => {
                self.ensure_exec_enabled()?;
                exec::read(cmd).await
            }
        }
    }

    /// Store `value` in the backend behind `source`
    ///
    /// A `value` source is updated in place and is only durable once the
    /// owning document is saved. An `env-var` source lives as long as this
    /// process.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Unsupported`] for a disabled exec source and
    /// backend-specific errors otherwise.
    pub async fn persist(
        &self,
        source: &mut CredentialSource,
        value: &str,
    ) -> Result<(), CredentialError> {
        tracing::debug!(kind = source.kind(), "Persisting credential");

        match source {
            CredentialSource::Value(current) => {
                *current = value.to_string();
                Ok(())
            }
            CredentialSource::EnvVar(name) => {
                // SAFETY: the variable is process-wide state. Callers must not
                // persist env-var sources while other threads read the
                // environment.
                unsafe { std::env::set_var(name.as_str(), value) };
                Ok(())
            }
            CredentialSource::File(path) => file::write(path, value),
            CredentialSource::Keyring(entry) => {
                self.keyring_set(entry.clone(), value.to_string()).await
            }
            CredentialSource::Exec(cmd) => {
                self.ensure_exec_enabled()?;
                exec::write(cmd, value).await
            }
        }
    }

    /// Read a literal-or-sourced secret
    ///
    /// # Errors
    ///
    /// Same as [`CredentialResolver::resolve`] for sourced secrets.
    pub async fn resolve_secret(&self, secret: &Secret) -> Result<String, CredentialError> {
        match secret {
            Secret::Literal(value) => Ok(value.clone()),
            Secret::Source(source) => self.resolve(source).await,
        }
    }

    /// Write a literal-or-sourced secret
    ///
    /// # Errors
    ///
    /// Same as [`CredentialResolver::persist`] for sourced secrets.
    pub async fn persist_secret(
        &self,
        secret: &mut Secret,
        value: &str,
    ) -> Result<(), CredentialError> {
        match secret {
            Secret::Literal(current) => {
                *current = value.to_string();
                Ok(())
            }
            Secret::Source(source) => self.persist(source, value).await,
        }
    }

    fn ensure_exec_enabled(&self) -> Result<(), CredentialError> {
        if self.config.exec_enabled {
            Ok(())
        } else {
            Err(CredentialError::unsupported("exec credential sources are disabled"))
        }
    }

    // Keyring calls block on platform IPC
    async fn keyring_get(&self, entry: KeyringEntry) -> Result<String, CredentialError> {
        let keyring = Arc::clone(&self.keyring);
        tokio::task::spawn_blocking(move || keyring.get(&entry))
            .await
            .map_err(|e| CredentialError::Keyring(e.to_string()))?
    }

    async fn keyring_set(&self, entry: KeyringEntry, value: String) -> Result<(), CredentialError> {
        let keyring = Arc::clone(&self.keyring);
        tokio::task::spawn_blocking(move || keyring.set(&entry, &value))
            .await
            .map_err(|e| CredentialError::Keyring(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExecCommand;
    use tempfile::TempDir;

    fn resolver() -> CredentialResolver {
        CredentialResolver::default().with_keyring(Arc::new(MemoryKeyring::new()))
    }

    #[tokio::test]
    async fn test_value_round_trip() {
        let resolver = resolver();
        let mut source = CredentialSource::value("old");

        assert_eq!(resolver.resolve(&source).await.unwrap(), "old");
        resolver.persist(&mut source, "new").await.unwrap();
        assert_eq!(resolver.resolve(&source).await.unwrap(), "new");
    }

    #[tokio::test]
    async fn test_env_var_unset_is_not_found() {
        let source = CredentialSource::env_var("API_CREDS_TEST_UNSET_VARIABLE");

        let err = resolver().resolve(&source).await.unwrap_err();
        assert!(err.is_not_found(), "got {err:?}");
    }

    #[tokio::test]
    async fn test_env_var_round_trip() {
        let resolver = resolver();
        let mut source = CredentialSource::env_var("API_CREDS_TEST_ROUND_TRIP");

        resolver.persist(&mut source, "from-env").await.unwrap();
        assert_eq!(resolver.resolve(&source).await.unwrap(), "from-env");
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let resolver = resolver();
        let mut source = CredentialSource::file(temp_dir.path().join("token").to_str().unwrap());

        assert!(resolver.resolve(&source).await.unwrap_err().is_not_found());
        resolver.persist(&mut source, "file-secret").await.unwrap();
        assert_eq!(resolver.resolve(&source).await.unwrap(), "file-secret");
    }

    #[tokio::test]
    async fn test_keyring_round_trip() {
        let resolver = resolver();
        let mut source = CredentialSource::keyring("api", "me");

        assert!(resolver.resolve(&source).await.unwrap_err().is_not_found());
        resolver.persist(&mut source, "kr-secret").await.unwrap();
        assert_eq!(resolver.resolve(&source).await.unwrap(), "kr-secret");
    }

    #[tokio::test]
    async fn test_exec_disabled_by_default() {
        let resolver = resolver();
        let mut source = CredentialSource::Exec(ExecCommand::new("true"));

        let err = resolver.resolve(&source).await.unwrap_err();
        assert!(matches!(err, CredentialError::Unsupported(_)));

        let err = resolver.persist(&mut source, "x").await.unwrap_err();
        assert!(matches!(err, CredentialError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_literal_secret_persist_in_place() {
        let resolver = resolver();
        let mut secret = Secret::literal("a");

        resolver.persist_secret(&mut secret, "b").await.unwrap();
        assert_eq!(secret, Secret::literal("b"));
        assert_eq!(resolver.resolve_secret(&secret).await.unwrap(), "b");
    }
}
