//! Integration credentials.
//!
//! The plaintext only leaves this type through [`Credential::expose`], which
//! is called when the child process environment is built. `Debug` and
//! `Display` are redacted; the SHA-256 fingerprint is the only form shown.

use std::fmt;

use sha2::{Digest, Sha256};

#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Hex SHA-256 of the secret.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        hex::encode(digest)
    }

    /// First 12 hex digits of the fingerprint, for display.
    pub fn short_fingerprint(&self) -> String {
        short_fingerprint(&self.fingerprint())
    }
}

pub fn short_fingerprint(fingerprint: &str) -> String {
    fingerprint.chars().take(12).collect()
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.short_fingerprint())
    }
}

/// A credential plus the environment variable it is passed through.
#[derive(Debug, Clone)]
pub struct CredentialBinding {
    pub env_var: String,
    pub credential: Credential,
}

/// Environment variable names a child process may receive a secret through.
pub fn is_valid_env_var(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
