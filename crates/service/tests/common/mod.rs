//! Shared test utilities for publishing integration tests
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use common::collection::{digest, ContentError, ContentSource, SourceFile};
use common::crypto::{DecryptingReader, Secret, WrappedKey};
use parking_lot::Mutex;
use reqwest::StatusCode;
use service::{
    build_keyring, AgentError, BeginRequest, CollectionPublisher, Config, Observed,
    PublishingAgent, UploadBody, VerificationTarget, VerifyConfig, VerifyError,
};
use tempfile::TempDir;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Default)]
pub struct AgentState {
    pub begins: Vec<BeginRequest>,
    pub keys: HashMap<String, Secret>,
    pub staged: HashMap<(String, String), Bytes>,
    /// what the website serves, plaintext
    pub published: HashMap<String, Vec<u8>>,
    pub deleted: Vec<String>,
    pub rolled_back: Vec<String>,
    pub ended: Vec<String>,
}

/// In-memory publishing agent. Committed files become visible on the
/// agent's "website", decrypted with the key unwrapped from the begin
/// request.
#[derive(Debug)]
pub struct MemoryAgent {
    secret: Secret,
    pub state: Mutex<AgentState>,
    fail_begin: Mutex<bool>,
    fail_upload: Mutex<HashSet<String>>,
    fail_commit: Mutex<HashSet<String>>,
    fail_rollback: Mutex<HashSet<String>>,
    fail_delete: Mutex<HashSet<String>>,
}

fn refused(what: &str) -> AgentError {
    AgentError::HttpStatus(StatusCode::INTERNAL_SERVER_ERROR, format!("{} refused", what))
}

impl MemoryAgent {
    pub fn new(secret: Secret) -> Self {
        Self {
            secret,
            state: Mutex::new(AgentState::default()),
            fail_begin: Mutex::new(false),
            fail_upload: Mutex::new(HashSet::new()),
            fail_commit: Mutex::new(HashSet::new()),
            fail_rollback: Mutex::new(HashSet::new()),
            fail_delete: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_begin(&self) {
        *self.fail_begin.lock() = true;
    }

    pub fn fail_upload_of(&self, uri: &str) {
        self.fail_upload.lock().insert(uri.to_string());
    }

    pub fn fail_commit_of(&self, uri: &str) {
        self.fail_commit.lock().insert(uri.to_string());
    }

    pub fn fail_rollback_of(&self, uri: &str) {
        self.fail_rollback.lock().insert(uri.to_string());
    }

    pub fn fail_delete_of(&self, uri: &str) {
        self.fail_delete.lock().insert(uri.to_string());
    }

    pub fn published(&self, uri: &str) -> Option<Vec<u8>> {
        self.state.lock().published.get(uri).cloned()
    }

    /// Pretend the website serves something else at `uri`
    pub fn tamper(&self, uri: &str, content: &[u8]) {
        self.state
            .lock()
            .published
            .insert(uri.to_string(), content.to_vec());
    }
}

#[async_trait]
impl PublishingAgent for MemoryAgent {
    async fn begin(&self, request: &BeginRequest) -> Result<(), AgentError> {
        if *self.fail_begin.lock() {
            return Err(refused("begin"));
        }
        let mut state = self.state.lock();
        if let (Some(wrapped_key), Some(salt)) = (&request.wrapped_key, &request.salt) {
            let wrapped = WrappedKey {
                wrapped_key: wrapped_key.clone(),
                salt: salt.clone(),
            };
            let key = wrapped
                .unwrap(&self.secret)
                .map_err(|e| AgentError::Default(e.into()))?;
            state.keys.insert(request.transaction_id.clone(), key);
        }
        state.begins.push(request.clone());
        Ok(())
    }

    async fn upload(
        &self,
        transaction_id: &str,
        uri: &str,
        content: UploadBody,
    ) -> Result<(), AgentError> {
        if self.fail_upload.lock().contains(uri) {
            return Err(refused("upload"));
        }
        let content = content
            .into_bytes()
            .await
            .map_err(|e| AgentError::Default(e.into()))?;
        self.state
            .lock()
            .staged
            .insert((transaction_id.to_string(), uri.to_string()), content);
        Ok(())
    }

    async fn commit(&self, transaction_id: &str, uri: &str) -> Result<(), AgentError> {
        if self.fail_commit.lock().contains(uri) {
            return Err(refused("commit"));
        }
        let mut state = self.state.lock();
        let staged = state
            .staged
            .remove(&(transaction_id.to_string(), uri.to_string()))
            .ok_or_else(|| refused("commit of unstaged file"))?;
        let plain = match state.keys.get(transaction_id) {
            Some(key) => {
                let mut plain = Vec::new();
                DecryptingReader::new(Cursor::new(staged.to_vec()), key)
                    .map_err(|e| AgentError::Default(e.into()))?
                    .read_to_end(&mut plain)
                    .map_err(|e| AgentError::Default(e.into()))?;
                plain
            }
            None => staged.to_vec(),
        };
        state.published.insert(uri.to_string(), plain);
        Ok(())
    }

    async fn rollback(&self, transaction_id: &str, uri: &str) -> Result<(), AgentError> {
        if self.fail_rollback.lock().contains(uri) {
            return Err(refused("rollback"));
        }
        let mut state = self.state.lock();
        state
            .staged
            .remove(&(transaction_id.to_string(), uri.to_string()));
        state.rolled_back.push(uri.to_string());
        Ok(())
    }

    async fn delete(&self, _transaction_id: &str, uri: &str) -> Result<(), AgentError> {
        if self.fail_delete.lock().contains(uri) {
            return Err(refused("delete"));
        }
        let mut state = self.state.lock();
        state.published.remove(uri);
        state.deleted.push(uri.to_string());
        Ok(())
    }

    async fn end(&self, transaction_id: &str) -> Result<(), AgentError> {
        self.state.lock().ended.push(transaction_id.to_string());
        Ok(())
    }
}

/// Serves whatever the agent has published
#[derive(Debug)]
pub struct AgentWebsite {
    pub agent: Arc<MemoryAgent>,
    pub requests: Mutex<usize>,
}

impl AgentWebsite {
    pub fn new(agent: Arc<MemoryAgent>) -> Self {
        Self {
            agent,
            requests: Mutex::new(0),
        }
    }
}

#[async_trait]
impl VerificationTarget for AgentWebsite {
    async fn fetch(&self, uri: &str) -> Result<Option<Observed>, VerifyError> {
        *self.requests.lock() += 1;
        Ok(self.agent.published(uri).map(|content| {
            let (sha, size) = digest(&content);
            Observed { sha, size }
        }))
    }
}

/// Serves the right content only from the `good_from`th request per uri on
#[derive(Debug)]
pub struct FlakyWebsite {
    pub content: HashMap<String, Vec<u8>>,
    pub good_from: usize,
    pub requests: Mutex<HashMap<String, usize>>,
}

impl FlakyWebsite {
    pub fn new(content: HashMap<String, Vec<u8>>, good_from: usize) -> Self {
        Self {
            content,
            good_from,
            requests: Mutex::new(HashMap::new()),
        }
    }

    pub fn requests_for(&self, uri: &str) -> usize {
        self.requests.lock().get(uri).copied().unwrap_or(0)
    }
}

#[async_trait]
impl VerificationTarget for FlakyWebsite {
    async fn fetch(&self, uri: &str) -> Result<Option<Observed>, VerifyError> {
        let attempt = {
            let mut requests = self.requests.lock();
            let n = requests.entry(uri.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        if attempt < self.good_from {
            let (sha, size) = digest(b"stale content");
            return Ok(Some(Observed { sha, size }));
        }
        Ok(self.content.get(uri).map(|content| {
            let (sha, size) = digest(content);
            Observed { sha, size }
        }))
    }
}

/// Plaintext content held in memory, with an optional on-disk listing that
/// differs from what is offered for transfer
#[derive(Debug, Default)]
pub struct MemorySource {
    pub files: Vec<(String, Vec<u8>)>,
    pub extra_listing: Vec<String>,
    pub panic_on: Option<String>,
}

impl MemorySource {
    pub fn with_files(files: &[(&str, &[u8])]) -> Self {
        Self {
            files: files
                .iter()
                .map(|(uri, content)| (uri.to_string(), content.to_vec()))
                .collect(),
            ..Default::default()
        }
    }
}

impl ContentSource for MemorySource {
    fn files(&self) -> Result<Vec<SourceFile>, ContentError> {
        Ok(self
            .files
            .iter()
            .map(|(uri, _)| SourceFile {
                uri: uri.clone(),
                action: common::collection::Action::Created,
            })
            .collect())
    }

    fn open(&self, uri: &str) -> Result<Box<dyn Read + Send>, ContentError> {
        if self.panic_on.as_deref() == Some(uri) {
            panic!("content source exploded on {}", uri);
        }
        self.files
            .iter()
            .find(|(u, _)| u == uri)
            .map(|(_, content)| Box::new(Cursor::new(content.clone())) as Box<dyn Read + Send>)
            .ok_or_else(|| ContentError::NotFound(uri.to_string()))
    }

    fn listing(&self) -> Result<Vec<String>, ContentError> {
        let mut uris: Vec<String> = self.files.iter().map(|(uri, _)| uri.clone()).collect();
        uris.extend(self.extra_listing.iter().cloned());
        Ok(uris)
    }
}

pub struct Harness {
    pub publisher: CollectionPublisher,
    pub agent: Arc<MemoryAgent>,
    pub website: Arc<AgentWebsite>,
    pub config: Config,
    pub dir: TempDir,
}

pub fn test_config(dir: &TempDir, verify: bool) -> Config {
    Config {
        data_dir: dir.path().to_path_buf(),
        publishing_agent_secret: Some(Secret::generate()),
        keyring_master_key: Some(Secret::generate()),
        central_keyring_enabled: true,
        verify: VerifyConfig {
            enabled: verify,
            retry_delay: Duration::from_millis(10),
            retry_count: 3,
        },
        ..Config::default()
    }
}

/// Set up a publisher over an in-memory agent and its website
pub async fn setup_publisher(verify: bool) -> Harness {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir, verify);
    let agent = Arc::new(MemoryAgent::new(
        config.publishing_agent_secret.clone().unwrap(),
    ));
    let website = Arc::new(AgentWebsite::new(agent.clone()));
    let keyring = build_keyring(&config).unwrap();
    let publisher = CollectionPublisher::new(&config, keyring, agent.clone(), website.clone())
        .await
        .unwrap();

    Harness {
        publisher,
        agent,
        website,
        config,
        dir,
    }
}
