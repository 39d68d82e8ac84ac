use std::io::{self, Read};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use common::collection::{
    Action, CollectionDescription, CollectionEncryptor, ContentError, ContentSource,
    HashingReader, Transaction, TransitionError, UriInfo, UriStatus,
};
use common::crypto::{CollectionKey, EncryptingReader, Secret, WrappedKey};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::agent::{BeginRequest, PublishingAgent, UploadBody, UPLOAD_CHUNK_SIZE};

const UPLOAD_BUFFER_CHUNKS: usize = 4;

/// Drives one publish transaction against the publishing agent.
///
/// Failures are recorded on the transaction rather than returned: a file
/// that fails does not stop its siblings, and files that were already
/// committed stay committed. Callers look at [`Transaction::has_errors`] to
/// decide what to do next.
#[derive(Debug, Clone)]
pub struct TransactionCoordinator {
    agent: Arc<dyn PublishingAgent>,
    encryptor: CollectionEncryptor,
    agent_secret: Option<Secret>,
}

impl TransactionCoordinator {
    pub fn new(
        agent: Arc<dyn PublishingAgent>,
        encryptor: CollectionEncryptor,
        agent_secret: Option<Secret>,
    ) -> Self {
        Self {
            agent,
            encryptor,
            agent_secret,
        }
    }

    /// Publish every file `source` provides for `collection`
    pub async fn publish(
        &self,
        collection: &CollectionDescription,
        source: Arc<dyn ContentSource>,
    ) -> Arc<Mutex<Transaction>> {
        let transaction = Arc::new(Mutex::new(Transaction::new()));
        let transaction_id = transaction.lock().id.clone();
        tracing::info!(
            "PUBLISH: starting transaction {} for collection {}",
            transaction_id,
            collection.id
        );

        let key = match self.prepare_key(collection, &transaction) {
            Ok(key) => key,
            Err(message) => return self.abort(&transaction, message),
        };

        let listing = {
            let source = source.clone();
            tokio::task::spawn_blocking(move || {
                Ok::<_, ContentError>((source.files()?, source.listing()?))
            })
            .await
        };
        let (files, on_disk) = match listing {
            Ok(Ok(listing)) => listing,
            Ok(Err(e)) => {
                return self.abort(&transaction, format!("could not list content: {}", e))
            }
            Err(e) => {
                return self.abort(&transaction, format!("could not list content: {}", e))
            }
        };
        transaction
            .lock()
            .set_files(on_disk.iter().map(String::as_str));

        let begin = {
            let tx = transaction.lock();
            BeginRequest {
                transaction_id: tx.id.clone(),
                collection_id: collection.id.clone(),
                wrapped_key: tx.wrapped_key.clone(),
                salt: tx.salt.clone(),
            }
        };
        if let Err(e) = self.agent.begin(&begin).await {
            return self.abort(&transaction, format!("could not begin transaction: {}", e));
        }

        self.delete_pending(collection, &transaction, &transaction_id)
            .await;

        let mut tasks = JoinSet::new();
        for file in files {
            let transfer = FileTransfer {
                agent: self.agent.clone(),
                source: source.clone(),
                transaction: transaction.clone(),
                transaction_id: transaction_id.clone(),
                key: key.clone(),
                uri: file.uri,
                action: file.action,
            };
            tasks.spawn(transfer.run());
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("PUBLISH: transfer task failed to complete: {}", e);
                transaction
                    .lock()
                    .add_error(format!("transfer task failed: {}", e));
            }
        }

        self.reconcile(&transaction);

        if let Err(e) = self.agent.end(&transaction_id).await {
            transaction
                .lock()
                .add_error(format!("could not end transaction: {}", e));
        }

        {
            let mut tx = transaction.lock();
            tx.end();
            if tx.has_errors() {
                tracing::error!(
                    "PUBLISH: transaction {} for collection {} finished with errors",
                    tx.id,
                    collection.id
                );
            } else {
                tracing::info!(
                    "PUBLISH: transaction {} for collection {} committed {} file(s)",
                    tx.id,
                    collection.id,
                    tx.uri_infos().len()
                );
            }
        }
        transaction
    }

    /// Fetch the collection key and attach it, wrapped, to the transaction
    fn prepare_key(
        &self,
        collection: &CollectionDescription,
        transaction: &Mutex<Transaction>,
    ) -> Result<Option<CollectionKey>, String> {
        let key = self
            .encryptor
            .key(collection)
            .map_err(|e| format!("could not get collection key: {}", e))?;
        let Some(key) = key else {
            return Ok(None);
        };

        let agent_secret = self.agent_secret.as_ref().ok_or_else(|| {
            "no publishing agent secret configured for encrypted collection".to_string()
        })?;
        let wrapped = WrappedKey::wrap(&key, agent_secret)
            .map_err(|e| format!("could not wrap collection key: {}", e))?;
        transaction.lock().set_wrapped_key(wrapped);
        Ok(Some(key))
    }

    async fn delete_pending(
        &self,
        collection: &CollectionDescription,
        transaction: &Mutex<Transaction>,
        transaction_id: &str,
    ) {
        for uri in &collection.pending_deletes {
            match self.agent.delete(transaction_id, uri).await {
                Ok(()) => {
                    tracing::debug!("PUBLISH: deleted {}", uri);
                    transaction.lock().uri_deletes.push(uri.clone());
                }
                Err(e) => {
                    tracing::warn!("PUBLISH: could not delete {}: {}", uri, e);
                    transaction
                        .lock()
                        .add_error(format!("could not delete {}: {}", uri, e));
                }
            }
        }
    }

    /// Record any listed file that never made it onto the transaction
    fn reconcile(&self, transaction: &Mutex<Transaction>) {
        let mut tx = transaction.lock();
        for uri in tx.file_uris() {
            if tx.uri_info(&uri).is_none() {
                tracing::warn!("PUBLISH: {} missing from transaction {}", uri, tx.id);
                tx.add_uri_info(UriInfo::unknown(uri));
            }
        }
    }

    fn abort(
        &self,
        transaction: &Arc<Mutex<Transaction>>,
        message: String,
    ) -> Arc<Mutex<Transaction>> {
        let mut tx = transaction.lock();
        tracing::error!("PUBLISH: transaction {} failed: {}", tx.id, message);
        tx.add_error(message);
        tx.end();
        drop(tx);
        transaction.clone()
    }
}

/// Upload and commit of a single file
struct FileTransfer {
    agent: Arc<dyn PublishingAgent>,
    source: Arc<dyn ContentSource>,
    transaction: Arc<Mutex<Transaction>>,
    transaction_id: String,
    key: Option<CollectionKey>,
    uri: String,
    action: Action,
}

impl FileTransfer {
    async fn run(self) {
        self.transaction
            .lock()
            .add_uri_info(UriInfo::new(self.uri.clone(), self.action));

        if AssertUnwindSafe(self.transfer()).catch_unwind().await.is_err() {
            tracing::error!("PUBLISH: transfer of {} panicked", self.uri);
            let message = format!("unexpected failure transferring {}", self.uri);
            let mut tx = self.transaction.lock();
            tx.update_uri_info(&self.uri, |info| {
                info.error = Some(message.clone());
                info.stop();
            });
            tx.add_error(message);
        }
    }

    async fn transfer(&self) {
        let (chunks, body) = UploadBody::channel(UPLOAD_BUFFER_CHUNKS);
        let producer = {
            let source = self.source.clone();
            let key = self.key.clone();
            let uri = self.uri.clone();
            tokio::task::spawn_blocking(move || {
                stream_content(source.as_ref(), &uri, key.as_ref(), chunks)
            })
        };
        let uploaded = self.agent.upload(&self.transaction_id, &self.uri, body).await;

        let streamed = match producer.await {
            Ok(Ok(streamed)) => streamed,
            Ok(Err(e)) => {
                let message = format!("could not read {}: {}", self.uri, e);
                return self.fail(UriStatus::UploadFailed, message);
            }
            Err(e) => {
                let message = format!("could not read {}: {}", self.uri, e);
                return self.fail(UriStatus::UploadFailed, message);
            }
        };
        if let Err(e) = uploaded {
            let message = format!("could not upload {}: {}", self.uri, e);
            return self.fail(UriStatus::UploadFailed, message);
        }
        let Some((sha, size)) = streamed else {
            let message = format!("could not upload {}: agent stopped reading", self.uri);
            return self.fail(UriStatus::UploadFailed, message);
        };
        self.update(|info| {
            info.record_content(sha, size);
            Ok(())
        });
        self.update(|info| info.advance(UriStatus::Uploaded));
        tracing::debug!("PUBLISH: uploaded {}", self.uri);

        if let Err(e) = self.agent.commit(&self.transaction_id, &self.uri).await {
            let message = format!("could not commit {}: {}", self.uri, e);
            self.fail(UriStatus::CommitFailed, message);
            match self.agent.rollback(&self.transaction_id, &self.uri).await {
                Ok(()) => self.update(|info| info.advance(UriStatus::RolledBack)),
                Err(e) => {
                    let message = format!("could not roll back {}: {}", self.uri, e);
                    tracing::error!("PUBLISH: {}", message);
                    self.transaction.lock().add_error(message);
                }
            }
            return;
        }
        self.update(|info| info.advance(UriStatus::Committed));
        tracing::debug!("PUBLISH: committed {}", self.uri);
    }

    fn fail(&self, status: UriStatus, message: String) {
        tracing::warn!("PUBLISH: {}", message);
        self.update(|info| info.fail(status, message.clone()));
        self.transaction.lock().add_error(message);
    }

    fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut UriInfo) -> Result<(), TransitionError>,
    {
        let mut result = Ok(());
        self.transaction
            .lock()
            .update_uri_info(&self.uri, |info| result = f(info));
        if let Err(e) = result {
            tracing::warn!("PUBLISH: {}: {}", self.uri, e);
        }
    }
}

/// Stream `uri` into `chunks`, encrypting if `key` is set, and return the
/// SHA-256 and size of the plaintext. `None` if the receiving side went away
/// before the whole file was sent.
fn stream_content(
    source: &dyn ContentSource,
    uri: &str,
    key: Option<&CollectionKey>,
    chunks: mpsc::Sender<io::Result<Bytes>>,
) -> Result<Option<(String, u64)>, ContentError> {
    let mut hashing = HashingReader::new(source.open(uri)?);
    {
        let mut reader: Box<dyn Read + '_> = match key {
            Some(key) => Box::new(
                EncryptingReader::new(&mut hashing, key)
                    .map_err(|e| ContentError::Default(e.into()))?,
            ),
            None => Box::new(&mut hashing),
        };
        let mut buf = vec![0u8; UPLOAD_CHUNK_SIZE];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let _ = chunks.blocking_send(Err(io::Error::new(e.kind(), e.to_string())));
                    return Err(e.into());
                }
            };
            if chunks
                .blocking_send(Ok(Bytes::copy_from_slice(&buf[..n])))
                .is_err()
            {
                return Ok(None);
            }
        }
    }
    Ok(Some(hashing.finish()))
}
