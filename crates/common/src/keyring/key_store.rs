//! Durable storage of wrapped collection keys.
//!
//! One JSON record per collection under the store root:
//!
//! ```text
//! <root>/<collection id>.key.json  =>  { "iv": <base64>, "key": <base64> }
//! ```
//!
//! `key` is the collection key encrypted with AES-256-CBC under the master
//! key and the record's own random IV. Clear keys never reach the disk.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::crypto::{
    decrypt_with_iv, encrypt_with_iv, generate_iv, CipherError, CollectionKey, Secret,
    SecretError, IV_SIZE,
};

const RECORD_SUFFIX: &str = ".key.json";

#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    #[error("key store error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("key store i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("key store record error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),
    #[error("secret error: {0}")]
    Secret(#[from] SecretError),
    #[error("invalid collection id: {0:?}")]
    InvalidId(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct WrappedRecord {
    iv: String,
    key: String,
}

#[derive(Debug)]
pub struct KeyStore {
    root: PathBuf,
    master: Secret,
}

impl KeyStore {
    /// Open (creating if needed) a key store rooted at `root`.
    pub fn open(root: impl AsRef<Path>, master: Secret) -> Result<Self, KeyStoreError> {
        if master.is_empty() {
            return Err(anyhow::anyhow!("key store master key must not be empty").into());
        }
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root, master })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, collection_id: &str) -> Result<PathBuf, KeyStoreError> {
        if collection_id.is_empty()
            || collection_id.starts_with('.')
            || collection_id.contains(&['/', '\\'][..])
        {
            return Err(KeyStoreError::InvalidId(collection_id.to_string()));
        }
        Ok(self.root.join(format!("{}{}", collection_id, RECORD_SUFFIX)))
    }

    /// Wrap and persist `key`, replacing any previous record.
    pub fn write(&self, collection_id: &str, key: &CollectionKey) -> Result<(), KeyStoreError> {
        let path = self.record_path(collection_id)?;
        let iv = generate_iv()?;
        let wrapped = encrypt_with_iv(&self.master, &iv, key.bytes())?;
        let record = WrappedRecord {
            iv: BASE64.encode(iv),
            key: BASE64.encode(wrapped),
        };

        // write then rename so readers never see a half-written record;
        // each writer gets its own temp file
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        tmp.write_all(&serde_json::to_vec(&record)?)?;
        tmp.persist(&path).map_err(|e| e.error)?;
        tracing::debug!("KEY STORE: wrote key for collection {}", collection_id);
        Ok(())
    }

    /// Read and unwrap the key for `collection_id`, if one is stored.
    pub fn read(&self, collection_id: &str) -> Result<Option<CollectionKey>, KeyStoreError> {
        let path = self.record_path(collection_id)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: WrappedRecord = serde_json::from_slice(&bytes)?;

        let iv_bytes = BASE64
            .decode(&record.iv)
            .map_err(|_| anyhow::anyhow!("iv base64 decode error"))?;
        let iv: [u8; IV_SIZE] = iv_bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("invalid iv size {}", iv_bytes.len()))?;
        let wrapped = BASE64
            .decode(&record.key)
            .map_err(|_| anyhow::anyhow!("wrapped key base64 decode error"))?;

        let clear = decrypt_with_iv(&self.master, &iv, &wrapped)?;
        Ok(Some(CollectionKey::from_slice(&clear)?))
    }

    /// Remove the record for `collection_id`; a missing record is not an error.
    pub fn delete(&self, collection_id: &str) -> Result<(), KeyStoreError> {
        let path = self.record_path(collection_id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Ids of all collections with a stored key
    pub fn list(&self) -> Result<Vec<String>, KeyStoreError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let name = entry?.file_name();
            if let Some(id) = name.to_string_lossy().strip_suffix(RECORD_SUFFIX) {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}
