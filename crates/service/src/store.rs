//! File-backed collection storage
//!
//! One JSON document per record under the store root, named `<id>.json`.
//! Each store instance owns a single reader/writer lock: reads run
//! concurrently, writes are exclusive. Only individual operations are
//! atomic; use [`CollectionsStore::create`] rather than `exists` followed by
//! `save` when the record must not already exist.

use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use common::collection::{CollectionDescription, PublishedCollection};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;

const RECORD_EXTENSION: &str = "json";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Something the store can persist
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    fn id(&self) -> &str;
}

impl Record for CollectionDescription {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for PublishedCollection {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug)]
pub struct CollectionsStore<T> {
    root: PathBuf,
    lock: RwLock<()>,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> CollectionsStore<T> {
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            lock: RwLock::new(()),
            _record: PhantomData,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, StoreError> {
        if id.trim().is_empty() {
            return Err(StoreError::InvalidArgument(
                "collection id must not be blank".to_string(),
            ));
        }
        if id.starts_with('.') || id.contains(&['/', '\\'][..]) {
            return Err(StoreError::InvalidArgument(format!(
                "collection id {:?} is not a valid file name",
                id
            )));
        }
        Ok(self.root.join(format!("{}.{}", id, RECORD_EXTENSION)))
    }

    pub async fn list(&self) -> Result<Vec<T>, StoreError> {
        let _guard = self.lock.read().await;
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            records.push(serde_json::from_slice(&bytes)?);
        }
        records.sort_by(|a: &T, b: &T| a.id().cmp(b.id()));
        Ok(records)
    }

    pub async fn get(&self, id: &str) -> Result<T, StoreError> {
        let path = self.path_for(id)?;
        let _guard = self.lock.read().await;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn exists(&self, id: &str) -> Result<bool, StoreError> {
        let path = self.path_for(id)?;
        let _guard = self.lock.read().await;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    /// Write a new record; fails if one with the same id exists
    pub async fn create(&self, record: &T) -> Result<(), StoreError> {
        let path = self.path_for(record.id())?;
        let _guard = self.lock.write().await;
        if tokio::fs::try_exists(&path).await? {
            return Err(StoreError::AlreadyExists(record.id().to_string()));
        }
        self.write(&path, record).await
    }

    /// Overwrite an existing record
    pub async fn save(&self, record: &T) -> Result<(), StoreError> {
        let path = self.path_for(record.id())?;
        let _guard = self.lock.write().await;
        if !tokio::fs::try_exists(&path).await? {
            return Err(StoreError::NotFound(record.id().to_string()));
        }
        self.write(&path, record).await
    }

    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let path = self.path_for(id)?;
        let _guard = self.lock.write().await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    // caller holds the write lock
    async fn write(&self, path: &Path, record: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(record)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}
