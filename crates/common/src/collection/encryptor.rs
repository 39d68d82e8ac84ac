use std::io::{Read, Write};
use std::sync::Arc;

use super::descriptor::CollectionDescription;
use crate::crypto::{CipherError, CollectionKey, DecryptingReader, EncryptingReader};
use crate::keyring::{KeyringCache, KeyringError};

#[derive(Debug, thiserror::Error)]
pub enum EncryptorError {
    #[error("no key found for encrypted collection {0}")]
    MissingKey(String),
    #[error("keyring error: {0}")]
    Keyring(#[from] KeyringError),
    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stream-wise encryption of a collection's content.
///
/// Keys always come from the keyring. Collections that are not flagged
/// `encrypted` pass straight through.
#[derive(Debug, Clone)]
pub struct CollectionEncryptor {
    keyring: Arc<dyn KeyringCache>,
}

impl CollectionEncryptor {
    pub fn new(keyring: Arc<dyn KeyringCache>) -> Self {
        Self { keyring }
    }

    pub fn keyring(&self) -> &Arc<dyn KeyringCache> {
        &self.keyring
    }

    /// The key for `collection`, `None` when it is not encrypted.
    ///
    /// An encrypted collection without a key is an error, never a fallback to
    /// plaintext.
    pub fn key(
        &self,
        collection: &CollectionDescription,
    ) -> Result<Option<CollectionKey>, EncryptorError> {
        if !collection.encrypted {
            return Ok(None);
        }
        match self.keyring.get(&collection.id)? {
            Some(key) => Ok(Some(key)),
            None => Err(EncryptorError::MissingKey(collection.id.clone())),
        }
    }

    pub fn encrypting_reader<R>(
        &self,
        collection: &CollectionDescription,
        inner: R,
    ) -> Result<Box<dyn Read + Send>, EncryptorError>
    where
        R: Read + Send + 'static,
    {
        Ok(match self.key(collection)? {
            Some(key) => Box::new(EncryptingReader::new(inner, &key)?),
            None => Box::new(inner),
        })
    }

    pub fn decrypting_reader<R>(
        &self,
        collection: &CollectionDescription,
        inner: R,
    ) -> Result<Box<dyn Read + Send>, EncryptorError>
    where
        R: Read + Send + 'static,
    {
        Ok(match self.key(collection)? {
            Some(key) => Box::new(DecryptingReader::new(inner, &key)?),
            None => Box::new(inner),
        })
    }

    /// Copy `plain` into `out`, encrypting if the collection requires it
    pub fn encrypt_into<R, W>(
        &self,
        collection: &CollectionDescription,
        plain: R,
        out: &mut W,
    ) -> Result<u64, EncryptorError>
    where
        R: Read + Send + 'static,
        W: Write,
    {
        let mut reader = self.encrypting_reader(collection, plain)?;
        Ok(std::io::copy(&mut reader, out)?)
    }
}
