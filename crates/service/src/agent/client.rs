use async_trait::async_trait;
use reqwest::{header::HeaderMap, header::HeaderValue, Client, RequestBuilder};
use url::Url;

use super::error::AgentError;
use super::{BeginRequest, PublishingAgent, UploadBody};

/// [`PublishingAgent`] over HTTP
///
/// ```text
/// POST {base}/begin                             json BeginRequest
/// POST {base}/publish?transactionId=..&uri=..   file bytes, streamed
/// POST {base}/commit?transactionId=..&uri=..
/// POST {base}/rollback?transactionId=..&uri=..
/// POST {base}/delete?transactionId=..&uri=..
/// POST {base}/end?transactionId=..
/// ```
#[derive(Debug, Clone)]
pub struct HttpPublishingAgent {
    pub remote: Url,
    client: Client,
}

impl HttpPublishingAgent {
    pub fn new(remote: &Url) -> Result<Self, AgentError> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        let client = Client::builder().default_headers(default_headers).build()?;

        Ok(Self {
            remote: remote.clone(),
            client,
        })
    }

    /// Get the base URL for agent requests
    pub fn base_url(&self) -> &Url {
        &self.remote
    }

    fn endpoint(&self, path: &str) -> Result<Url, AgentError> {
        let base = self.remote.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{}/{}", base, path))?)
    }

    fn post(&self, path: &str, query: &[(&str, &str)]) -> Result<RequestBuilder, AgentError> {
        let mut url = self.endpoint(path)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(self.client.post(url))
    }

    async fn send(&self, request: RequestBuilder) -> Result<(), AgentError> {
        let response = request.send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(AgentError::HttpStatus(
                response.status(),
                response.text().await?,
            ))
        }
    }
}

#[async_trait]
impl PublishingAgent for HttpPublishingAgent {
    async fn begin(&self, request: &BeginRequest) -> Result<(), AgentError> {
        self.send(self.post("begin", &[])?.json(request)).await
    }

    async fn upload(
        &self,
        transaction_id: &str,
        uri: &str,
        content: UploadBody,
    ) -> Result<(), AgentError> {
        let request = self
            .post("publish", &[("transactionId", transaction_id), ("uri", uri)])?
            .header("Content-Type", "application/octet-stream")
            .body(reqwest::Body::from(content));
        self.send(request).await
    }

    async fn commit(&self, transaction_id: &str, uri: &str) -> Result<(), AgentError> {
        self.send(self.post("commit", &[("transactionId", transaction_id), ("uri", uri)])?)
            .await
    }

    async fn rollback(&self, transaction_id: &str, uri: &str) -> Result<(), AgentError> {
        self.send(self.post("rollback", &[("transactionId", transaction_id), ("uri", uri)])?)
            .await
    }

    async fn delete(&self, transaction_id: &str, uri: &str) -> Result<(), AgentError> {
        self.send(self.post("delete", &[("transactionId", transaction_id), ("uri", uri)])?)
            .await
    }

    async fn end(&self, transaction_id: &str) -> Result<(), AgentError> {
        self.send(self.post("end", &[("transactionId", transaction_id)])?)
            .await
    }
}
