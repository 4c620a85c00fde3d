//! HMAC signing key material.

use std::fmt;

use rand::RngCore;
use thiserror::Error;

pub const MIN_SECRET_BYTES: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SecretError {
    #[error("environment variable {0} is not set")]
    Missing(String),
    #[error("signing secret must be at least {min} bytes, got {0}", min = MIN_SECRET_BYTES)]
    TooShort(usize),
    #[error("signing secret rejected by the HMAC implementation")]
    InvalidKey,
}

/// Signing key. Never printed.
#[derive(Clone)]
pub struct SigningSecret(Vec<u8>);

impl SigningSecret {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, SecretError> {
        let bytes = bytes.into();
        if bytes.len() < MIN_SECRET_BYTES {
            return Err(SecretError::TooShort(bytes.len()));
        }
        Ok(Self(bytes))
    }

    /// Parse a configured value. Even-length hex decodes to raw bytes;
    /// anything else is used verbatim.
    pub fn parse(value: &str) -> Result<Self, SecretError> {
        let value = value.trim();
        match hex::decode(value) {
            Ok(bytes) if !bytes.is_empty() => Self::from_bytes(bytes),
            _ => Self::from_bytes(value.as_bytes()),
        }
    }

    /// Read from the named environment variable.
    pub fn from_env(var: &str) -> Result<Self, SecretError> {
        let value = std::env::var(var).map_err(|_| SecretError::Missing(var.to_string()))?;
        Self::parse(&value)
    }

    /// Random key for processes that do not need tokens to outlive them.
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; MIN_SECRET_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub(crate) fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningSecret([REDACTED])")
    }
}
