//! Cryptographic primitives for Press
//!
//! - **Content encryption**: AES-256-CBC with PKCS#7 padding and a random IV
//!   per stream, see [`EncryptingReader`] / [`DecryptingReader`]
//! - **Keys at rest**: collection keys are wrapped under the keyring master
//!   key with the same cipher and a per-record IV
//! - **Keys in transit**: [`WrappedKey`] wraps a collection key with AES-KW
//!   under a per-transaction key derived (HKDF-SHA256) from the secret shared
//!   with the publishing agent

mod cipher;
mod key_wrap;
mod secret;

pub use cipher::{
    decrypt_with_iv, encrypt_with_iv, generate_iv, CipherError, DecryptingReader,
    EncryptingReader, BLOCK_SIZE, IV_SIZE,
};
pub use key_wrap::{KeyWrapError, WrappedKey, SALT_SIZE, WRAPPED_KEY_SIZE};
pub use secret::{CollectionKey, Secret, SecretError, SECRET_SIZE};
