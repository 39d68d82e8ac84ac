//! Collection publishing service for Press.
//!
//! This crate wires the collection model from `common` to the outside world:
//! - Config (TOML file plus environment overrides)
//! - Collections store (locked, one JSON file per collection)
//! - Publishing agent client (transactional upload/commit/rollback)
//! - Transaction coordinator and post-publish verification
//! - Collection publisher (the full publish flow)

pub mod agent;
pub mod config;
pub mod logging;
pub mod publisher;
pub mod store;
pub mod verify;

// Re-export key types for convenience
pub use agent::{AgentError, BeginRequest, HttpPublishingAgent, PublishingAgent, UploadBody};
pub use config::{Config, ConfigError, VerifyConfig};
pub use publisher::{build_keyring, CollectionPublisher, PublishError, TransactionCoordinator};
pub use store::{CollectionsStore, Record, StoreError};
pub use verify::{
    HttpVerificationTarget, Observed, VerificationEngine, VerificationTarget, VerifyError,
    VerifySummary,
};
