//! Shared test utilities for keyring integration tests
#![allow(dead_code)]

use std::sync::Arc;

use common::crypto::Secret;
use common::keyring::{CentralKeyCache, KeyStore, LegacyKeyCache, MigrationCache};
use tempfile::TempDir;

pub struct Keyrings {
    pub legacy: Arc<LegacyKeyCache>,
    pub central: Arc<CentralKeyCache>,
    pub migration: Arc<MigrationCache>,
    pub master: Secret,
    pub dir: TempDir,
}

/// Set up legacy and central keyrings behind a migration cache
pub fn setup_keyrings(migration_enabled: bool) -> Keyrings {
    let dir = TempDir::new().unwrap();
    let master = Secret::generate();
    let store = KeyStore::open(dir.path().join("keyring"), master.clone()).unwrap();

    let legacy = Arc::new(LegacyKeyCache::new());
    let central = Arc::new(CentralKeyCache::new(store));
    let migration = Arc::new(MigrationCache::new(
        legacy.clone(),
        central.clone(),
        migration_enabled,
    ));

    Keyrings {
        legacy,
        central,
        migration,
        master,
        dir,
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
