//! The collection publishing pipeline
//!
//! ```text
//! collections store --> keyring --> encryptor --> coordinator --> agent
//!                                                     |
//!                                          verification (opt-in)
//!                                                     |
//!                                   published collections store
//! ```

mod coordinator;
mod progress;

pub use coordinator::TransactionCoordinator;
pub use progress::VerifyProgress;

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use common::collection::{
    CollectionDescription, CollectionEncryptor, DirectoryContentSource, PublishResult,
    PublishedCollection, VerifyCounters,
};
use common::crypto::Secret;
use common::keyring::{
    CentralKeyCache, KeyStore, KeyStoreError, KeyringCache, KeyringError, LegacyKeyCache,
    MigrationCache,
};

use crate::agent::{AgentError, HttpPublishingAgent, PublishingAgent};
use crate::config::{Config, ConfigError};
use crate::logging;
use crate::store::{CollectionsStore, StoreError};
use crate::verify::{HttpVerificationTarget, VerificationEngine, VerificationTarget, VerifyError};

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("keyring error: {0}")]
    Keyring(#[from] KeyringError),
    #[error("key store error: {0}")]
    KeyStore(#[from] KeyStoreError),
    #[error("publishing agent error: {0}")]
    Agent(#[from] AgentError),
    #[error("verification error: {0}")]
    Verify(#[from] VerifyError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("collection {0} has not been published successfully")]
    NotPublished(String),
    #[error("publish error: {0}")]
    Default(#[from] anyhow::Error),
}

/// Runs collections through the full publish flow and keeps their records
pub struct CollectionPublisher {
    collections: CollectionsStore<CollectionDescription>,
    published: CollectionsStore<PublishedCollection>,
    keyring: Arc<dyn KeyringCache>,
    encryptor: CollectionEncryptor,
    coordinator: TransactionCoordinator,
    verifier: Option<VerificationEngine>,
    content_dir: PathBuf,
    progress: VerifyProgress,
}

impl CollectionPublisher {
    /// Install logging, then build the keyring, agent client and
    /// verification target from `config`
    pub async fn from_config(config: &Config) -> Result<Self, PublishError> {
        logging::init(config.log_level);
        let keyring = build_keyring(config)?;
        let agent = Arc::new(HttpPublishingAgent::new(&config.publishing_agent_url)?);
        let target = Arc::new(HttpVerificationTarget::new(&config.public_website_url)?);
        Self::new(config, keyring, agent, target).await
    }

    pub async fn new(
        config: &Config,
        keyring: Arc<dyn KeyringCache>,
        agent: Arc<dyn PublishingAgent>,
        target: Arc<dyn VerificationTarget>,
    ) -> Result<Self, PublishError> {
        let collections = CollectionsStore::open(config.collections_dir()).await?;
        let published = CollectionsStore::open(config.published_dir()).await?;
        let encryptor = CollectionEncryptor::new(keyring.clone());
        let coordinator = TransactionCoordinator::new(
            agent,
            encryptor.clone(),
            config.publishing_agent_secret.clone(),
        );
        let verifier = config
            .verify
            .enabled
            .then(|| VerificationEngine::new(target, config.verify.clone()));

        Ok(Self {
            collections,
            published,
            keyring,
            encryptor,
            coordinator,
            verifier,
            content_dir: config.content_dir(),
            progress: VerifyProgress::default(),
        })
    }

    pub fn collections(&self) -> &CollectionsStore<CollectionDescription> {
        &self.collections
    }

    pub fn published(&self) -> &CollectionsStore<PublishedCollection> {
        &self.published
    }

    pub fn keyring(&self) -> &Arc<dyn KeyringCache> {
        &self.keyring
    }

    /// Store a new collection, generating its key if it is encrypted
    pub async fn create_collection(
        &self,
        collection: &CollectionDescription,
    ) -> Result<(), PublishError> {
        self.collections.create(collection).await?;
        if collection.encrypted {
            if let Err(e) = self.keyring.add(&collection.id, &Secret::generate()) {
                // roll back the descriptor
                self.collections.delete(&collection.id).await?;
                return Err(e.into());
            }
        }
        tracing::info!("PUBLISHER: created collection {}", collection.id);
        Ok(())
    }

    /// Remove a collection, its key and its content
    pub async fn delete_collection(&self, id: &str) -> Result<(), PublishError> {
        self.collections.delete(id).await?;
        self.discard(id).await?;
        tracing::info!("PUBLISHER: deleted collection {}", id);
        Ok(())
    }

    /// Drop a successfully published collection's draft state and key.
    /// The published record is kept.
    pub async fn purge(&self, id: &str) -> Result<(), PublishError> {
        let published = self.published.get(id).await?;
        let succeeded = published
            .publish_results()
            .last()
            .map(|result| !result.error)
            .unwrap_or(false);
        if !succeeded {
            return Err(PublishError::NotPublished(id.to_string()));
        }
        match self.collections.delete(id).await {
            Ok(()) | Err(StoreError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.discard(id).await?;
        tracing::info!("PUBLISHER: purged collection {}", id);
        Ok(())
    }

    /// Content of a collection; write drafts through this
    pub async fn content(&self, id: &str) -> Result<DirectoryContentSource, PublishError> {
        let collection = self.collections.get(id).await?;
        let published_uris = self.published_uris(id).await?;
        Ok(DirectoryContentSource::new(
            self.content_dir.join(id),
            collection,
            self.encryptor.clone(),
        )
        .with_published(published_uris))
    }

    /// Verification counters of the most recently started publish of `id`
    /// that is still verifying
    pub fn progress(&self, id: &str) -> Option<VerifyCounters> {
        self.progress.get(id)
    }

    /// Publish collection `id` and record the result
    pub async fn publish(&self, id: &str) -> Result<PublishedCollection, PublishError> {
        let collection = self.collections.get(id).await?;
        let source = Arc::new(self.content(id).await?);

        let transaction = self.coordinator.publish(&collection, source).await;

        let mut published = match self.published.get(id).await {
            Ok(published) => published,
            Err(StoreError::NotFound(_)) => PublishedCollection::from(&collection),
            Err(e) => return Err(e.into()),
        };

        let (transaction_id, succeeded) = {
            let tx = transaction.lock();
            (tx.id.clone(), !tx.has_errors())
        };
        match &self.verifier {
            Some(verifier) if succeeded => {
                let counters = published.counters();
                self.progress.start(id, &transaction_id, counters.clone());
                verifier.verify(&transaction, &counters).await;
                self.progress.finish(id, &transaction_id);
            }
            Some(_) => {
                tracing::warn!("PUBLISHER: skipping verification of {}, publish had errors", id);
            }
            None => {}
        }

        let snapshot = transaction.lock().clone();
        published.add_result(PublishResult::from_transaction(snapshot));
        self.persist(&published).await?;
        Ok(published)
    }

    async fn persist(&self, published: &PublishedCollection) -> Result<(), PublishError> {
        match self.published.create(published).await {
            Ok(()) => Ok(()),
            Err(StoreError::AlreadyExists(_)) => Ok(self.published.save(published).await?),
            Err(e) => Err(e.into()),
        }
    }

    /// Uris committed by earlier publishes of `id`
    async fn published_uris(&self, id: &str) -> Result<BTreeSet<String>, PublishError> {
        let published = match self.published.get(id).await {
            Ok(published) => published,
            Err(StoreError::NotFound(_)) => return Ok(BTreeSet::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(published
            .publish_results()
            .iter()
            .flat_map(|result| result.transaction.uri_infos())
            .filter(|info| info.is_committed())
            .map(|info| info.uri.clone())
            .collect())
    }

    async fn discard(&self, id: &str) -> Result<(), PublishError> {
        self.keyring.remove(id)?;
        match tokio::fs::remove_dir_all(self.content_dir.join(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Legacy keyring alone, or legacy and central behind a migration cache when
/// a master key is configured
pub fn build_keyring(config: &Config) -> Result<Arc<dyn KeyringCache>, PublishError> {
    let legacy = Arc::new(LegacyKeyCache::new());
    let Some(master) = config.keyring_master_key.clone() else {
        if config.central_keyring_enabled {
            return Err(
                anyhow::anyhow!("central keyring enabled without a keyring master key").into(),
            );
        }
        tracing::info!("PUBLISHER: no keyring master key, using legacy keyring only");
        return Ok(legacy);
    };

    let store = KeyStore::open(config.keyring_dir(), master)?;
    let central = Arc::new(CentralKeyCache::new(store));
    Ok(Arc::new(MigrationCache::new(
        legacy,
        central,
        config.central_keyring_enabled,
    )))
}
