use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{check_add, check_collection_id, KeyringCache, KeyringError};
use crate::crypto::CollectionKey;

/// Routes keyring traffic between the legacy and central backends.
///
/// Legacy is always written so that switching migration off again loses
/// nothing; central is only written (and read) while migration is enabled.
/// Removal always reaches both backends, so a key removed while migration is
/// off cannot resurface from central once it is switched back on.
/// The two backend calls are not made atomic with respect to each other.
#[derive(Debug)]
pub struct MigrationCache {
    legacy: Arc<dyn KeyringCache>,
    central: Arc<dyn KeyringCache>,
    migration_enabled: AtomicBool,
}

impl MigrationCache {
    pub fn new(
        legacy: Arc<dyn KeyringCache>,
        central: Arc<dyn KeyringCache>,
        migration_enabled: bool,
    ) -> Self {
        Self {
            legacy,
            central,
            migration_enabled: AtomicBool::new(migration_enabled),
        }
    }

    pub fn migration_enabled(&self) -> bool {
        self.migration_enabled.load(Ordering::Acquire)
    }

    /// Flip the cutover at runtime
    pub fn set_migration_enabled(&self, enabled: bool) {
        tracing::info!("KEYRING: central keyring migration enabled = {}", enabled);
        self.migration_enabled.store(enabled, Ordering::Release);
    }
}

impl KeyringCache for MigrationCache {
    fn get(&self, collection_id: &str) -> Result<Option<CollectionKey>, KeyringError> {
        check_collection_id(collection_id)?;
        if self.migration_enabled() {
            if let Some(key) = self.central.get(collection_id)? {
                return Ok(Some(key));
            }
            tracing::debug!(
                "KEYRING: no central key for {}, falling back to legacy",
                collection_id
            );
        }
        self.legacy.get(collection_id)
    }

    fn add(&self, collection_id: &str, key: &CollectionKey) -> Result<(), KeyringError> {
        check_add(collection_id, key)?;
        self.legacy.add(collection_id, key)?;
        if self.migration_enabled() {
            self.central.add(collection_id, key)?;
        }
        Ok(())
    }

    fn remove(&self, collection_id: &str) -> Result<(), KeyringError> {
        check_collection_id(collection_id)?;
        self.legacy.remove(collection_id)?;
        self.central.remove(collection_id)
    }
}
