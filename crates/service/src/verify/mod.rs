//! Post-publish verification
//!
//! Every committed file of a transaction is checked against what the
//! destination actually serves. Each file runs as its own task: a mismatch
//! (or a failed request) is retried after a fixed delay until the attempt
//! budget is spent. Results land on the file's [`UriInfo`] and on the
//! collection's shared [`VerifyCounters`]; a failed verification never
//! changes the outcome of the publish itself.

mod target;

pub use target::{HttpVerificationTarget, Observed, VerificationTarget};

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use common::collection::{Transaction, UriInfo, VerificationStatus, VerifyCounters};
use futures::FutureExt;
use parking_lot::Mutex;
use reqwest::StatusCode;
use tokio::task::JoinSet;

use crate::config::VerifyConfig;

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("HTTP request failed: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("HTTP status {0}: {1}")]
    HttpStatus(StatusCode, String),
    #[error("verification error: {0}")]
    Default(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifySummary {
    pub verified: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct VerificationEngine {
    target: Arc<dyn VerificationTarget>,
    policy: VerifyConfig,
}

impl VerificationEngine {
    pub fn new(target: Arc<dyn VerificationTarget>, policy: VerifyConfig) -> Self {
        Self { target, policy }
    }

    pub fn policy(&self) -> &VerifyConfig {
        &self.policy
    }

    /// Verify every committed file in `transaction`, returning once all of
    /// them are either verified or out of attempts.
    pub async fn verify(
        &self,
        transaction: &Arc<Mutex<Transaction>>,
        counters: &VerifyCounters,
    ) -> VerifySummary {
        let (transaction_id, pending) = {
            let tx = transaction.lock();
            let pending: Vec<(String, Option<String>, u64)> = tx
                .uri_infos()
                .iter()
                .filter(|info| info.is_committed())
                .map(|info| (info.uri.clone(), info.sha.clone(), info.size))
                .collect();
            (tx.id.clone(), pending)
        };
        tracing::info!(
            "VERIFY: verifying {} file(s) for transaction {} (max {} attempts, {:?} apart)",
            pending.len(),
            transaction_id,
            self.policy.max_attempts(),
            self.policy.retry_delay
        );

        let mut tasks = JoinSet::new();
        for (uri, sha, size) in pending {
            let verifier = FileVerifier {
                target: self.target.clone(),
                transaction: transaction.clone(),
                counters: counters.clone(),
                max_attempts: self.policy.max_attempts(),
                retry_delay: self.policy.retry_delay,
                uri,
                sha,
                size,
            };
            tasks.spawn(verifier.run());
        }

        let mut summary = VerifySummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(VerificationStatus::Verified) => summary.verified += 1,
                Ok(_) => summary.failed += 1,
                Err(e) => {
                    tracing::error!("VERIFY: verification task failed to complete: {}", e);
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            "VERIFY: transaction {} verified {} file(s), {} failed",
            transaction_id,
            summary.verified,
            summary.failed
        );
        summary
    }
}

struct FileVerifier {
    target: Arc<dyn VerificationTarget>,
    transaction: Arc<Mutex<Transaction>>,
    counters: VerifyCounters,
    max_attempts: u32,
    retry_delay: Duration,
    uri: String,
    sha: Option<String>,
    size: u64,
}

impl FileVerifier {
    async fn run(self) -> VerificationStatus {
        self.counters.increment_verify_inprogress();
        self.update(UriInfo::begin_verify);

        let status = match AssertUnwindSafe(self.attempts()).catch_unwind().await {
            Ok(status) => status,
            Err(_) => {
                tracing::error!("VERIFY: verification of {} panicked", self.uri);
                self.update(|info| info.verify_mismatch("unexpected verification failure", 1));
                VerificationStatus::Failed
            }
        };

        self.counters.decrement_verify_inprogress();
        match status {
            VerificationStatus::Verified => self.counters.increment_verified(),
            _ => self.counters.increment_verify_failed(),
        }
        status
    }

    async fn attempts(&self) -> VerificationStatus {
        loop {
            let message = match self.target.fetch(&self.uri).await {
                Ok(Some(observed)) if self.matches(&observed) => {
                    self.update(UriInfo::verified);
                    tracing::debug!("VERIFY: {} verified", self.uri);
                    return VerificationStatus::Verified;
                }
                Ok(Some(observed)) => format!(
                    "expected sha {} ({} bytes), found sha {} ({} bytes)",
                    self.sha.as_deref().unwrap_or("<none>"),
                    self.size,
                    observed.sha,
                    observed.size
                ),
                Ok(None) => "not found at destination".to_string(),
                Err(e) => format!("verification request failed: {}", e),
            };

            let status = self
                .update(|info| info.verify_mismatch(message.clone(), self.max_attempts))
                .unwrap_or(VerificationStatus::Failed);
            if status == VerificationStatus::Failed {
                tracing::warn!(
                    "VERIFY: giving up on {} after {} attempt(s): {}",
                    self.uri,
                    self.max_attempts,
                    message
                );
                return status;
            }

            tracing::debug!("VERIFY: {} not verified yet, retrying: {}", self.uri, message);
            tokio::time::sleep(self.retry_delay).await;
            self.update(UriInfo::begin_verify);
        }
    }

    fn matches(&self, observed: &Observed) -> bool {
        self.sha.as_deref() == Some(observed.sha.as_str()) && self.size == observed.size
    }

    fn update<R>(&self, f: impl FnOnce(&mut UriInfo) -> R) -> Option<R> {
        let mut out = None;
        self.transaction
            .lock()
            .update_uri_info(&self.uri, |info| out = Some(f(info)));
        out
    }
}
