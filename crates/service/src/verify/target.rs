use std::fmt::Debug;

use async_trait::async_trait;
use common::collection::digest;
use reqwest::{Client, StatusCode};
use url::Url;

use super::VerifyError;

/// What the destination serves for a uri
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observed {
    /// hex SHA-256
    pub sha: String,
    pub size: u64,
}

/// Where published content can be observed
#[async_trait]
pub trait VerificationTarget: Send + Sync + Debug {
    /// `Ok(None)` when `uri` is not (yet) served
    async fn fetch(&self, uri: &str) -> Result<Option<Observed>, VerifyError>;
}

/// Reads published files back from the public website
#[derive(Debug, Clone)]
pub struct HttpVerificationTarget {
    pub remote: Url,
    client: Client,
}

impl HttpVerificationTarget {
    pub fn new(remote: &Url) -> Result<Self, VerifyError> {
        let client = Client::builder().build()?;
        Ok(Self {
            remote: remote.clone(),
            client,
        })
    }

    fn url_for(&self, uri: &str) -> Result<Url, VerifyError> {
        let base = self.remote.as_str().trim_end_matches('/');
        let uri = uri.trim_start_matches('/');
        Ok(Url::parse(&format!("{}/{}", base, uri))?)
    }
}

#[async_trait]
impl VerificationTarget for HttpVerificationTarget {
    async fn fetch(&self, uri: &str) -> Result<Option<Observed>, VerifyError> {
        let response = self.client.get(self.url_for(uri)?).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body = response.bytes().await?;
                let (sha, size) = digest(&body);
                Ok(Some(Observed { sha, size }))
            }
            status => Err(VerifyError::HttpStatus(status, response.text().await?)),
        }
    }
}
