//! The remote publishing agent
//!
//! A transaction is opened with [`PublishingAgent::begin`], each file is
//! uploaded then committed (or rolled back), and the transaction is closed
//! with [`PublishingAgent::end`]. Encrypted collections are uploaded as
//! ciphertext; the agent unwraps the collection key from the begin request
//! with the secret it shares with us.

mod body;
mod client;
mod error;

pub use body::{UploadBody, UPLOAD_CHUNK_SIZE};
pub use client::HttpPublishingAgent;
pub use error::AgentError;

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Opens a transaction on the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginRequest {
    pub transaction_id: String,
    pub collection_id: String,
    #[serde(default)]
    pub wrapped_key: Option<String>,
    #[serde(default)]
    pub salt: Option<String>,
}

#[async_trait]
pub trait PublishingAgent: Send + Sync + Debug {
    async fn begin(&self, request: &BeginRequest) -> Result<(), AgentError>;

    /// Stage `content` at `uri`; not visible until committed
    async fn upload(
        &self,
        transaction_id: &str,
        uri: &str,
        content: UploadBody,
    ) -> Result<(), AgentError>;

    async fn commit(&self, transaction_id: &str, uri: &str) -> Result<(), AgentError>;

    async fn rollback(&self, transaction_id: &str, uri: &str) -> Result<(), AgentError>;

    /// Remove a previously published uri
    async fn delete(&self, transaction_id: &str, uri: &str) -> Result<(), AgentError>;

    async fn end(&self, transaction_id: &str) -> Result<(), AgentError>;
}
