use std::collections::HashSet;
use std::fmt::Debug;
use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};

use super::descriptor::CollectionDescription;
use super::encryptor::{CollectionEncryptor, EncryptorError};
use super::transaction::Action;

#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("content error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("encryptor error: {0}")]
    Encryptor(#[from] EncryptorError),
    #[error("invalid uri: {0:?}")]
    InvalidUri(String),
    #[error("no such file: {0}")]
    NotFound(String),
}

/// A file to transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub uri: String,
    pub action: Action,
}

/// Provides a collection's files as plaintext byte streams
pub trait ContentSource: Send + Sync + Debug {
    /// Every file in the collection, sorted by uri
    fn files(&self) -> Result<Vec<SourceFile>, ContentError>;

    /// Open `uri` for reading. Content is always plaintext.
    fn open(&self, uri: &str) -> Result<Box<dyn Read + Send>, ContentError>;

    /// Every uri present in the collection, whether offered for transfer or not
    fn listing(&self) -> Result<Vec<String>, ContentError> {
        Ok(self.files()?.into_iter().map(|f| f.uri).collect())
    }
}

/// Collection content kept on local disk, one file per uri under `root`.
///
/// Encrypted collections are encrypted at rest; [`ContentSource::open`]
/// decrypts on the way out.
#[derive(Debug, Clone)]
pub struct DirectoryContentSource {
    root: PathBuf,
    collection: CollectionDescription,
    encryptor: CollectionEncryptor,
    published: HashSet<String>,
}

impl DirectoryContentSource {
    pub fn new(
        root: impl Into<PathBuf>,
        collection: CollectionDescription,
        encryptor: CollectionEncryptor,
    ) -> Self {
        Self {
            root: root.into(),
            collection,
            encryptor,
            published: HashSet::new(),
        }
    }

    /// Uris already live on the website; these are transferred as updates
    pub fn with_published<I, S>(mut self, uris: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.published.extend(uris.into_iter().map(Into::into));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store `content` at `uri`, encrypting if the collection requires it
    pub fn write(&self, uri: &str, content: &[u8]) -> Result<(), ContentError> {
        let path = self.path_for(uri)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&path)?;
        self.encryptor
            .encrypt_into(&self.collection, io::Cursor::new(content.to_vec()), &mut file)?;
        Ok(())
    }

    fn path_for(&self, uri: &str) -> Result<PathBuf, ContentError> {
        let relative = Path::new(uri.trim_start_matches('/'));
        let clean = !uri.trim().is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(ContentError::InvalidUri(uri.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn walk(&self, dir: &Path, uris: &mut Vec<String>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                self.walk(&path, uris)?;
                continue;
            }
            if let Ok(relative) = path.strip_prefix(&self.root) {
                let parts: Vec<_> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                uris.push(format!("/{}", parts.join("/")));
            }
        }
        Ok(())
    }
}

impl ContentSource for DirectoryContentSource {
    fn files(&self) -> Result<Vec<SourceFile>, ContentError> {
        let mut uris = Vec::new();
        if self.root.exists() {
            self.walk(&self.root, &mut uris)?;
        }
        uris.sort();
        Ok(uris
            .into_iter()
            .map(|uri| {
                let action = if self.published.contains(&uri) {
                    Action::Updated
                } else {
                    Action::Created
                };
                SourceFile { uri, action }
            })
            .collect())
    }

    fn open(&self, uri: &str) -> Result<Box<dyn Read + Send>, ContentError> {
        let path = self.path_for(uri)?;
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ContentError::NotFound(uri.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(self.encryptor.decrypting_reader(&self.collection, file)?)
    }
}

/// Pass-through reader that hashes (SHA-256) and counts what it reads
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    size: u64,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            size: 0,
        }
    }

    /// Hex digest and byte count of everything read so far
    pub fn finish(self) -> (String, u64) {
        (hex::encode(self.hasher.finalize()), self.size)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.size += n as u64;
        Ok(n)
    }
}

/// Hex SHA-256 and length of `data`
pub fn digest(data: &[u8]) -> (String, u64) {
    (hex::encode(Sha256::digest(data)), data.len() as u64)
}
