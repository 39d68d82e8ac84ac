//! AES-256 key material
//!
//! A `Secret` is the raw 256-bit key used for collection content encryption.
//! The same type carries the keyring master key and the secret shared with the
//! publishing agent; what differs is only which component holds it.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Size of an AES-256 key in bytes
pub const SECRET_SIZE: usize = 32;

/// Errors that can occur while building a secret
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("secret error: {0}")]
    Default(#[from] anyhow::Error),
}

/// A 256-bit symmetric key
///
/// The all-zero value (`Secret::default()`) stands for "no key" and is
/// rejected by every keyring cache.
///
/// # Examples
///
/// ```ignore
/// let key = Secret::generate();
/// let encoded = key.to_base64();
/// assert_eq!(Secret::from_base64(&encoded)?, key);
/// ```
#[derive(PartialEq, Eq, Clone, Default, Serialize, Deserialize)]
pub struct Secret([u8; SECRET_SIZE]);

/// A collection's content key.
pub type CollectionKey = Secret;

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // never print key material
        f.debug_tuple("Secret").field(&"..").finish()
    }
}

impl From<[u8; SECRET_SIZE]> for Secret {
    fn from(bytes: [u8; SECRET_SIZE]) -> Self {
        Secret(bytes)
    }
}

impl Secret {
    /// Generate a new random secret using the system RNG
    pub fn generate() -> Self {
        let mut buff = [0; SECRET_SIZE];
        getrandom::getrandom(&mut buff).expect("failed to generate random bytes");
        Self(buff)
    }

    /// Create a secret from a byte slice
    ///
    /// # Errors
    ///
    /// Returns an error if the slice length is not exactly `SECRET_SIZE` bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self, SecretError> {
        if data.len() != SECRET_SIZE {
            return Err(anyhow::anyhow!(
                "invalid secret size, expected {}, got {}",
                SECRET_SIZE,
                data.len()
            )
            .into());
        }
        let mut buff = [0; SECRET_SIZE];
        buff.copy_from_slice(data);
        Ok(buff.into())
    }

    /// Parse a secret from standard base64
    pub fn from_base64(encoded: &str) -> Result<Self, SecretError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| anyhow::anyhow!("secret base64 decode error: {}", e))?;
        Self::from_slice(&bytes)
    }

    /// Encode the secret as standard base64
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Get a reference to the key bytes
    pub fn bytes(&self) -> &[u8] {
        self.0.as_ref()
    }

    /// Whether this is the all-zero placeholder key
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}
