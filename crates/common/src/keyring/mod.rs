//! Collection key lookup
//!
//! Keys are being migrated from an in-process map ([`LegacyKeyCache`]) to a
//! durable, wrapped-at-rest store ([`CentralKeyCache`]). [`MigrationCache`]
//! sits in front of both and decides which one is read and which ones are
//! written, so the cutover can be switched on and off without losing keys:
//!
//! ```text
//!            get                          add
//!  migration on:  central -> legacy       legacy, then central
//!  migration off: legacy                  legacy
//! ```
//!
//! Caches are plain values: build them at startup and pass them down as
//! `Arc<dyn KeyringCache>`.

mod central;
mod key_store;
mod legacy;
mod migration;

pub use central::CentralKeyCache;
pub use key_store::{KeyStore, KeyStoreError};
pub use legacy::LegacyKeyCache;
pub use migration::MigrationCache;

use std::fmt::Debug;

use crate::crypto::CollectionKey;

#[derive(Debug, thiserror::Error)]
pub enum KeyringError {
    #[error("collection id must not be empty")]
    CollectionIdEmpty,
    #[error("collection key must not be empty")]
    KeyEmpty,
    #[error("key store error: {0}")]
    KeyStore(#[from] KeyStoreError),
}

/// Lookup of a collection's active key.
///
/// A missing key is `Ok(None)`, not an error. Argument checks happen before
/// any backend is touched, so a rejected call leaves every cache unchanged.
pub trait KeyringCache: Send + Sync + Debug {
    /// Get the key for `collection_id`
    fn get(&self, collection_id: &str) -> Result<Option<CollectionKey>, KeyringError>;

    /// Store `key` as the key for `collection_id`
    fn add(&self, collection_id: &str, key: &CollectionKey) -> Result<(), KeyringError>;

    /// Forget the key for `collection_id`. Removing an absent key is a no-op.
    fn remove(&self, collection_id: &str) -> Result<(), KeyringError>;
}

pub(crate) fn check_collection_id(collection_id: &str) -> Result<(), KeyringError> {
    if collection_id.trim().is_empty() {
        return Err(KeyringError::CollectionIdEmpty);
    }
    Ok(())
}

pub(crate) fn check_add(collection_id: &str, key: &CollectionKey) -> Result<(), KeyringError> {
    check_collection_id(collection_id)?;
    if key.is_empty() {
        return Err(KeyringError::KeyEmpty);
    }
    Ok(())
}
