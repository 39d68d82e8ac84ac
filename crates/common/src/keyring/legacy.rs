use moka::sync::Cache;

use super::{check_add, check_collection_id, KeyringCache, KeyringError};
use crate::crypto::CollectionKey;

/// In-memory keyring, the pre-migration backend
///
/// Unbounded: entries are never evicted, only removed.
#[derive(Debug, Clone)]
pub struct LegacyKeyCache {
    keys: Cache<String, CollectionKey>,
}

impl Default for LegacyKeyCache {
    fn default() -> Self {
        Self::new()
    }
}

impl LegacyKeyCache {
    pub fn new() -> Self {
        Self {
            keys: Cache::builder().build(),
        }
    }

    /// Number of collections with a cached key
    pub fn len(&self) -> usize {
        self.keys.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyringCache for LegacyKeyCache {
    fn get(&self, collection_id: &str) -> Result<Option<CollectionKey>, KeyringError> {
        check_collection_id(collection_id)?;
        Ok(self.keys.get(collection_id))
    }

    fn add(&self, collection_id: &str, key: &CollectionKey) -> Result<(), KeyringError> {
        check_add(collection_id, key)?;
        self.keys.insert(collection_id.to_string(), key.clone());
        Ok(())
    }

    fn remove(&self, collection_id: &str) -> Result<(), KeyringError> {
        check_collection_id(collection_id)?;
        self.keys.invalidate(collection_id);
        Ok(())
    }
}
