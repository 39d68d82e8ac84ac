//! Handing a collection key to the publishing agent
//!
//! The coordinator never sends a raw collection key. Instead it wraps the key
//! with AES Key Wrap (RFC 3394) under a key-encryption key that is derived,
//! per transaction, from the secret shared with the publishing agent:
//!
//! ```text
//! salt = random(16)
//! kek  = HKDF-SHA256(ikm = agent secret, salt = salt, info = WRAP_INFO)
//! wrapped_key = AES-KW(kek, collection key)      // 40 bytes
//! ```
//!
//! The agent holds the same secret, so `(wrapped_key, salt)` is all it needs to
//! recover the collection key and decrypt the content it receives.

use aes_kw::KekAes256 as Kek;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::secret::{Secret, SecretError, SECRET_SIZE};

/// Size of the per-transaction salt in bytes
pub const SALT_SIZE: usize = 16;
/// Size of AES Key Wrap integrity block in bytes
pub const KW_NONCE_SIZE: usize = 8;
/// Size of a wrapped collection key
pub const WRAPPED_KEY_SIZE: usize = SECRET_SIZE + KW_NONCE_SIZE;

const WRAP_INFO: &[u8] = b"press/transaction-key-wrap/v1";

/// Errors that can occur while wrapping or unwrapping a key
#[derive(Debug, thiserror::Error)]
pub enum KeyWrapError {
    #[error("key wrap error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("secret error: {0}")]
    Secret(#[from] SecretError),
}

/// A collection key wrapped for one transaction, base64 encoded for the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrappedKey {
    pub wrapped_key: String,
    pub salt: String,
}

fn derive_kek(agent_secret: &Secret, salt: &[u8]) -> Result<Kek, KeyWrapError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), agent_secret.bytes());
    let mut okm = [0u8; SECRET_SIZE];
    hk.expand(WRAP_INFO, &mut okm)
        .map_err(|_| anyhow::anyhow!("hkdf expand error"))?;
    Ok(Kek::from(okm))
}

impl WrappedKey {
    /// Wrap `key` under a fresh salt and the agent secret.
    pub fn wrap(key: &Secret, agent_secret: &Secret) -> Result<Self, KeyWrapError> {
        let mut salt = [0u8; SALT_SIZE];
        getrandom::getrandom(&mut salt)
            .map_err(|e| anyhow::anyhow!("failed to generate salt: {}", e))?;

        let kek = derive_kek(agent_secret, &salt)?;
        let wrapped = kek
            .wrap_vec(key.bytes())
            .map_err(|_| anyhow::anyhow!("AES-KW wrap error"))?;

        if wrapped.len() != WRAPPED_KEY_SIZE {
            return Err(anyhow::anyhow!("expected wrapped key size is incorrect").into());
        }

        Ok(Self {
            wrapped_key: BASE64.encode(wrapped),
            salt: BASE64.encode(salt),
        })
    }

    /// Recover the collection key with the agent secret.
    ///
    /// # Errors
    ///
    /// Fails if either field is not valid base64, if the salt has the wrong
    /// size, or if AES-KW integrity checking fails (wrong secret or tampering).
    pub fn unwrap(&self, agent_secret: &Secret) -> Result<Secret, KeyWrapError> {
        let salt = BASE64
            .decode(&self.salt)
            .map_err(|_| anyhow::anyhow!("salt base64 decode error"))?;
        if salt.len() != SALT_SIZE {
            return Err(anyhow::anyhow!("invalid salt size {}", salt.len()).into());
        }
        let wrapped = BASE64
            .decode(&self.wrapped_key)
            .map_err(|_| anyhow::anyhow!("wrapped key base64 decode error"))?;

        let kek = derive_kek(agent_secret, &salt)?;
        let unwrapped = kek
            .unwrap_vec(&wrapped)
            .map_err(|_| anyhow::anyhow!("AES-KW unwrap error"))?;

        Ok(Secret::from_slice(&unwrapped)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_wrap_unwrap() {
        let key = Secret::generate();
        let agent_secret = Secret::generate();
        let wrapped = WrappedKey::wrap(&key, &agent_secret).unwrap();
        assert_eq!(wrapped.unwrap(&agent_secret).unwrap(), key);
    }

    #[test]
    fn test_salt_differs_per_wrap() {
        let key = Secret::generate();
        let agent_secret = Secret::generate();
        let a = WrappedKey::wrap(&key, &agent_secret).unwrap();
        let b = WrappedKey::wrap(&key, &agent_secret).unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.wrapped_key, b.wrapped_key);
    }

    #[test]
    fn test_wrong_secret_fails() {
        let key = Secret::generate();
        let wrapped = WrappedKey::wrap(&key, &Secret::generate()).unwrap();
        assert!(wrapped.unwrap(&Secret::generate()).is_err());
    }

    #[test]
    fn test_tampered_salt_fails() {
        let key = Secret::generate();
        let agent_secret = Secret::generate();
        let mut wrapped = WrappedKey::wrap(&key, &agent_secret).unwrap();
        wrapped.salt = BASE64.encode([0u8; SALT_SIZE]);
        assert!(wrapped.unwrap(&agent_secret).is_err());
        wrapped.salt = BASE64.encode([0u8; 3]);
        assert!(wrapped.unwrap(&agent_secret).is_err());
    }

    #[test]
    fn test_wire_format() {
        let wrapped = WrappedKey::wrap(&Secret::generate(), &Secret::generate()).unwrap();
        let json = serde_json::to_value(&wrapped).unwrap();
        assert!(json.get("wrappedKey").is_some());
        assert!(json.get("salt").is_some());
    }
}
