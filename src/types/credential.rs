//! Credential source references
//!
//! A [`CredentialSource`] names *where* a secret lives, independent of its
//! current value. A [`Secret`] is the two-level form used inside auth
//! entries: either a literal value or a reference to a source.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Default timeout for exec-based credential sources
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// Credential Source
// ============================================================================

/// Where a secret value is stored
///
/// Serialized externally tagged with kebab-case names, e.g.
/// `{"env-var": "TOKEN"}` or `{"keyring": {"service": "s", "user": "u"}}`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CredentialSource {
    /// Inline value held in the document itself
    Value(String),
    /// Process environment variable
    EnvVar(String),
    /// File path, expanded for `$VAR`, `${VAR}` and a leading `~`
    File(String),
    /// OS credential store entry
    Keyring(KeyringEntry),
    /// External command printing the secret on stdout
    Exec(ExecCommand),
}

impl CredentialSource {
    /// Inline value source
    pub fn value(value: impl Into<String>) -> Self {
        Self::Value(value.into())
    }

    /// Environment variable source
    pub fn env_var(name: impl Into<String>) -> Self {
        Self::EnvVar(name.into())
    }

    /// File source
    pub fn file(path: impl Into<String>) -> Self {
        Self::File(path.into())
    }

    /// Keyring source
    pub fn keyring(service: impl Into<String>, user: impl Into<String>) -> Self {
        Self::Keyring(KeyringEntry {
            service: service.into(),
            user: user.into(),
        })
    }

    /// Short kind name, used in logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Value(_) => "value",
            Self::EnvVar(_) => "env-var",
            Self::File(_) => "file",
            Self::Keyring(_) => "keyring",
            Self::Exec(_) => "exec",
        }
    }
}

// Never print inline values
impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(_) => f.write_str("Value(<redacted>)"),
            Self::EnvVar(name) => f.debug_tuple("EnvVar").field(name).finish(),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Keyring(entry) => f.debug_tuple("Keyring").field(entry).finish(),
            Self::Exec(cmd) => f.debug_tuple("Exec").field(cmd).finish(),
        }
    }
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(_) => write!(f, "inline value"),
            Self::EnvVar(name) => write!(f, "environment variable {name}"),
            Self::File(path) => write!(f, "file {path}"),
            Self::Keyring(entry) => write!(f, "keyring entry {}/{}", entry.service, entry.user),
            Self::Exec(cmd) => write!(f, "command {}", cmd.command),
        }
    }
}

/// OS keyring entry, keyed by service and user
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyringEntry {
    /// Service name
    pub service: String,
    /// User (account) name
    pub user: String,
}

/// External command used as a credential source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecCommand {
    /// Program to run, looked up on `PATH` when not a path
    pub command: String,
    /// Arguments passed on every invocation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Extra environment layered over the inherited one
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Timeout in seconds (default 60)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl ExecCommand {
    /// Create a command source with no arguments
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            timeout: None,
        }
    }

    /// Effective timeout for one invocation
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_EXEC_TIMEOUT)
    }
}

// ============================================================================
// Secret (literal or source)
// ============================================================================

/// A secret field: either a literal value or a reference to a source
#[derive(Clone, PartialEq, Eq)]
pub enum Secret {
    /// Value stored directly in the document
    Literal(String),
    /// Value stored behind a credential source
    Source(CredentialSource),
}

impl Secret {
    /// Literal secret
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    /// Secret read from a source
    #[must_use]
    pub fn source(source: CredentialSource) -> Self {
        Self::Source(source)
    }

    /// Build from the `field` / `field-source` pair of a document.
    ///
    /// Exactly one side may be set; "neither" yields `None`.
    pub(crate) fn from_pair(
        field: &str,
        literal: Option<String>,
        source: Option<CredentialSource>,
    ) -> Result<Option<Self>, String> {
        match (literal, source) {
            (Some(_), Some(_)) => Err(format!(
                "only one of `{field}` and `{field}-source` may be set"
            )),
            (Some(value), None) => Ok(Some(Self::Literal(value))),
            (None, Some(source)) => Ok(Some(Self::Source(source))),
            (None, None) => Ok(None),
        }
    }

    /// Like [`Secret::from_pair`] but the field is mandatory
    pub(crate) fn required_pair(
        field: &str,
        literal: Option<String>,
        source: Option<CredentialSource>,
    ) -> Result<Self, String> {
        Self::from_pair(field, literal, source)?
            .ok_or_else(|| format!("one of `{field}` or `{field}-source` must be set"))
    }

    /// Split back into the `field` / `field-source` pair
    pub(crate) fn into_pair(secret: Option<Self>) -> (Option<String>, Option<CredentialSource>) {
        match secret {
            Some(Self::Literal(value)) => (Some(value), None),
            Some(Self::Source(source)) => (None, Some(source)),
            None => (None, None),
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(_) => f.write_str("Literal(<redacted>)"),
            Self::Source(source) => f.debug_tuple("Source").field(source).finish(),
        }
    }
}

impl From<CredentialSource> for Secret {
    fn from(source: CredentialSource) -> Self {
        Self::Source(source)
    }
}
