use moka::sync::Cache;

use super::key_store::KeyStore;
use super::{check_add, check_collection_id, KeyringCache, KeyringError};
use crate::crypto::CollectionKey;

/// Durable keyring backed by a [`KeyStore`]
///
/// Unwrapped keys are memoised in memory after the first read; writes go to
/// the store first so a failed write never leaves a key only in memory.
#[derive(Debug)]
pub struct CentralKeyCache {
    store: KeyStore,
    keys: Cache<String, CollectionKey>,
}

impl CentralKeyCache {
    pub fn new(store: KeyStore) -> Self {
        Self {
            store,
            keys: Cache::builder().build(),
        }
    }

    pub fn store(&self) -> &KeyStore {
        &self.store
    }
}

impl KeyringCache for CentralKeyCache {
    fn get(&self, collection_id: &str) -> Result<Option<CollectionKey>, KeyringError> {
        check_collection_id(collection_id)?;
        if let Some(key) = self.keys.get(collection_id) {
            return Ok(Some(key));
        }

        let key = self.store.read(collection_id)?;
        if let Some(key) = &key {
            self.keys.insert(collection_id.to_string(), key.clone());
        }
        Ok(key)
    }

    fn add(&self, collection_id: &str, key: &CollectionKey) -> Result<(), KeyringError> {
        check_add(collection_id, key)?;
        self.store.write(collection_id, key)?;
        self.keys.insert(collection_id.to_string(), key.clone());
        Ok(())
    }

    fn remove(&self, collection_id: &str) -> Result<(), KeyringError> {
        check_collection_id(collection_id)?;
        self.store.delete(collection_id)?;
        self.keys.invalidate(collection_id);
        Ok(())
    }
}
