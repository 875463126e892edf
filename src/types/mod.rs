//! Type definitions for credential and auth configuration
//!
//! These are the parts of the configuration document this crate reads and
//! writes: credential source references and the auth entries built on them.

// Module declarations
pub mod auth;
pub mod credential;

pub use auth::{Auth, AuthInfo, BasicAuth, OAuth2Credentials, TokenAuth};
pub use credential::{CredentialSource, DEFAULT_EXEC_TIMEOUT, ExecCommand, KeyringEntry, Secret};
