//! Keyring-backed credentials

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use super::CredentialError;
use crate::types::KeyringEntry;

/// Minimal read/write access to a credential store keyed by service and user
///
/// `get` must report a missing entry as [`CredentialError::NotFound`].
pub trait KeyringBackend: Send + Sync + fmt::Debug {
    /// Read the secret stored for `entry`
    ///
    /// # Errors
    /// `NotFound` when no entry exists, `Keyring` on any other failure.
    fn get(&self, entry: &KeyringEntry) -> Result<String, CredentialError>;

    /// Create or replace the secret stored for `entry`
    ///
    /// # Errors
    /// `Keyring` when the store rejects the write.
    fn set(&self, entry: &KeyringEntry, value: &str) -> Result<(), CredentialError>;
}

fn not_found(entry: &KeyringEntry) -> CredentialError {
    CredentialError::NotFound(format!("keyring entry {}/{}", entry.service, entry.user))
}

/// The platform credential store (macOS Keychain, Windows Credential
/// Manager, Linux kernel keyring)
#[derive(Debug, Clone, Copy, Default)]
pub struct OsKeyring;

#[cfg(feature = "keyring")]
impl KeyringBackend for OsKeyring {
    fn get(&self, entry: &KeyringEntry) -> Result<String, CredentialError> {
        let os_entry = keyring::Entry::new(&entry.service, &entry.user)
            .map_err(|e| CredentialError::Keyring(e.to_string()))?;

        match os_entry.get_password() {
            Ok(value) => Ok(value),
            Err(keyring::Error::NoEntry) => Err(not_found(entry)),
            Err(e) => Err(CredentialError::Keyring(e.to_string())),
        }
    }

    fn set(&self, entry: &KeyringEntry, value: &str) -> Result<(), CredentialError> {
        keyring::Entry::new(&entry.service, &entry.user)
            .and_then(|os_entry| os_entry.set_password(value))
            .map_err(|e| CredentialError::Keyring(e.to_string()))
    }
}

#[cfg(not(feature = "keyring"))]
impl KeyringBackend for OsKeyring {
    fn get(&self, _entry: &KeyringEntry) -> Result<String, CredentialError> {
        Err(CredentialError::unsupported("built without the `keyring` feature"))
    }

    fn set(&self, _entry: &KeyringEntry, _value: &str) -> Result<(), CredentialError> {
        Err(CredentialError::unsupported("built without the `keyring` feature"))
    }
}

/// Process-local keyring, for tests and for hosts without a credential store
#[derive(Debug, Default)]
pub struct MemoryKeyring {
    entries: Mutex<HashMap<KeyringEntry, String>>,
}

impl MemoryKeyring {
    /// Create an empty keyring
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyringBackend for MemoryKeyring {
    fn get(&self, entry: &KeyringEntry) -> Result<String, CredentialError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(entry).cloned().ok_or_else(|| not_found(entry))
    }

    fn set(&self, entry: &KeyringEntry, value: &str) -> Result<(), CredentialError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(entry.clone(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> KeyringEntry {
        KeyringEntry {
            service: "api-credentials-test".to_string(),
            user: "someone".to_string(),
        }
    }

    #[test]
    fn test_memory_keyring_missing_entry() {
        let keyring = MemoryKeyring::new();
        assert!(keyring.get(&entry()).unwrap_err().is_not_found());
    }

    #[test]
    fn test_memory_keyring_upsert() {
        let keyring = MemoryKeyring::new();
        keyring.set(&entry(), "one").unwrap();
        keyring.set(&entry(), "two").unwrap();
        assert_eq!(keyring.get(&entry()).unwrap(), "two");
    }
}
