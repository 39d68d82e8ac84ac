//! Integration tests for the legacy to central keyring migration

mod common;

use ::common::crypto::Secret;
use ::common::keyring::{CentralKeyCache, KeyStore, KeyringCache, KeyringError};

#[test]
fn test_add_then_get_both_modes() {
    common::init_tracing();
    for enabled in [true, false] {
        let rings = common::setup_keyrings(enabled);
        for i in 0..16 {
            let id = format!("collection-{}", i);
            let key = Secret::generate();
            rings.migration.add(&id, &key).unwrap();
            assert_eq!(rings.migration.get(&id).unwrap(), Some(key));
        }
    }
}

#[test]
fn test_central_wins_over_stale_legacy() {
    let rings = common::setup_keyrings(true);
    let stale = Secret::generate();
    let fresh = Secret::generate();
    rings.legacy.add("budget-2024", &stale).unwrap();
    rings.central.add("budget-2024", &fresh).unwrap();

    assert_eq!(rings.migration.get("budget-2024").unwrap(), Some(fresh));
}

#[test]
fn test_legacy_only_key_still_visible_when_enabled() {
    let rings = common::setup_keyrings(true);
    let key = Secret::generate();
    rings.legacy.add("old-collection", &key).unwrap();

    assert_eq!(rings.migration.get("old-collection").unwrap(), Some(key));
}

#[test]
fn test_flip_migration_without_loss() {
    let rings = common::setup_keyrings(false);
    let before = Secret::generate();
    rings.migration.add("c-before", &before).unwrap();

    rings.migration.set_migration_enabled(true);
    let during = Secret::generate();
    rings.migration.add("c-during", &during).unwrap();
    assert_eq!(rings.migration.get("c-before").unwrap(), Some(before.clone()));
    assert_eq!(rings.migration.get("c-during").unwrap(), Some(during.clone()));

    // rolling back keeps everything readable from legacy
    rings.migration.set_migration_enabled(false);
    assert_eq!(rings.migration.get("c-before").unwrap(), Some(before));
    assert_eq!(rings.migration.get("c-during").unwrap(), Some(during));
}

#[test]
fn test_central_keys_durable_across_restart() {
    let rings = common::setup_keyrings(true);
    let key = Secret::generate();
    rings.migration.add("budget-2024", &key).unwrap();

    let store = KeyStore::open(rings.dir.path().join("keyring"), rings.master.clone()).unwrap();
    let reopened = CentralKeyCache::new(store);
    assert_eq!(reopened.get("budget-2024").unwrap(), Some(key));
}

#[test]
fn test_empty_arguments_leave_caches_unchanged() {
    let rings = common::setup_keyrings(true);
    rings.migration.add("c1", &Secret::generate()).unwrap();
    assert_eq!(rings.legacy.len(), 1);

    assert!(matches!(
        rings.migration.add("", &Secret::generate()),
        Err(KeyringError::CollectionIdEmpty)
    ));
    assert!(matches!(
        rings.legacy.add("", &Secret::generate()),
        Err(KeyringError::CollectionIdEmpty)
    ));
    assert!(matches!(
        rings.legacy.add("c2", &Secret::default()),
        Err(KeyringError::KeyEmpty)
    ));
    assert_eq!(rings.legacy.len(), 1);
    assert_eq!(rings.central.store().list().unwrap().len(), 1);
}

#[test]
fn test_concurrent_adds() {
    let rings = common::setup_keyrings(true);
    std::thread::scope(|s| {
        for t in 0..8 {
            let cache = rings.migration.clone();
            s.spawn(move || {
                for i in 0..8 {
                    cache
                        .add(&format!("c-{}-{}", t, i), &Secret::generate())
                        .unwrap();
                }
            });
        }
    });
    assert_eq!(rings.legacy.len(), 64);
    assert_eq!(rings.central.store().list().unwrap().len(), 64);
}

#[test]
fn test_removed_key_does_not_return_after_reenable() {
    let rings = common::setup_keyrings(true);
    let deleted = Secret::generate();
    rings.migration.add("c1", &deleted).unwrap();

    rings.migration.set_migration_enabled(false);
    rings.migration.remove("c1").unwrap();
    assert!(rings.central.store().list().unwrap().is_empty());

    let recreated = Secret::generate();
    rings.migration.add("c1", &recreated).unwrap();
    rings.migration.set_migration_enabled(true);

    assert_eq!(rings.migration.get("c1").unwrap(), Some(recreated));
}

#[test]
fn test_concurrent_adds_same_collection() {
    let rings = common::setup_keyrings(true);
    let failures = std::sync::atomic::AtomicUsize::new(0);
    std::thread::scope(|s| {
        for _ in 0..8 {
            let central = rings.central.clone();
            let failures = &failures;
            s.spawn(move || {
                for _ in 0..50 {
                    if central.add("shared", &Secret::generate()).is_err() {
                        failures.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    }
                }
            });
        }
    });
    assert_eq!(failures.into_inner(), 0);
    assert_eq!(rings.central.store().list().unwrap(), vec!["shared".to_string()]);

    let reopened = CentralKeyCache::new(
        KeyStore::open(rings.dir.path().join("keyring"), rings.master.clone()).unwrap(),
    );
    assert!(reopened.get("shared").unwrap().is_some());
}
