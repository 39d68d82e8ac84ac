//! Publish transactions and the per-file state machine
//!
//! A [`Transaction`] records one attempt to push a collection to the
//! publishing agent. Every transferred file gets a [`UriInfo`] that walks the
//! transfer graph:
//!
//! ```text
//! started --upload ok--> uploaded --commit ok--> committed
//! started --upload fails--> upload failed
//! uploaded --commit fails--> commit failed --rollback--> rolled back
//! (file missing from the transaction) --> unknown
//! ```
//!
//! and, once committed, the verification graph:
//!
//! ```text
//! (unset) --> verifying --match--> verified
//! verifying --mismatch, attempts left--> retrying --> verifying
//! verifying --mismatch, no attempts left--> failed
//! ```

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::WrappedKey;

/// Marker status for a file that appears in the collection but was never
/// recorded on the transaction.
pub const UNKNOWN_URI_STATUS: &str = "This URI was not recorded in Transaction info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UriStatus {
    #[serde(rename = "started")]
    Started,
    #[serde(rename = "uploaded")]
    Uploaded,
    #[serde(rename = "upload failed")]
    UploadFailed,
    #[serde(rename = "commit failed")]
    CommitFailed,
    #[serde(rename = "committed")]
    Committed,
    #[serde(rename = "rolled back")]
    RolledBack,
    #[serde(rename = "This URI was not recorded in Transaction info")]
    Unknown,
}

impl UriStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UriStatus::Started => "started",
            UriStatus::Uploaded => "uploaded",
            UriStatus::UploadFailed => "upload failed",
            UriStatus::CommitFailed => "commit failed",
            UriStatus::Committed => "committed",
            UriStatus::RolledBack => "rolled back",
            UriStatus::Unknown => UNKNOWN_URI_STATUS,
        }
    }

    /// Whether `next` is an edge of the transfer graph from `self`
    pub fn can_transition_to(&self, next: UriStatus) -> bool {
        matches!(
            (self, next),
            (UriStatus::Started, UriStatus::Uploaded)
                | (UriStatus::Started, UriStatus::UploadFailed)
                | (UriStatus::Uploaded, UriStatus::Committed)
                | (UriStatus::Uploaded, UriStatus::CommitFailed)
                | (UriStatus::CommitFailed, UriStatus::RolledBack)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UriStatus::Committed
                | UriStatus::UploadFailed
                | UriStatus::RolledBack
                | UriStatus::Unknown
        )
    }
}

impl fmt::Display for UriStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recorded for audit only; it does not change the transfer graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Created,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Verifying,
    Retrying,
    Failed,
    Verified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid uri status transition {from} -> {to}")]
pub struct TransitionError {
    pub from: UriStatus,
    pub to: UriStatus,
}

/// Transfer and verification record for one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UriInfo {
    pub status: UriStatus,
    pub action: Action,
    pub uri: String,
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    /// milliseconds between `start` and `end`
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub verification_status: Option<VerificationStatus>,
    #[serde(default)]
    pub verification_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub verification_retry_count: u32,
    #[serde(default)]
    pub verify_message: Option<String>,
    #[serde(default)]
    pub sha: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub error: Option<String>,
}

impl UriInfo {
    pub fn new(uri: impl Into<String>, action: Action) -> Self {
        Self {
            status: UriStatus::Started,
            action,
            uri: uri.into(),
            start: Utc::now(),
            end: None,
            duration: 0,
            verification_status: None,
            verification_end: None,
            verification_retry_count: 0,
            verify_message: None,
            sha: None,
            size: 0,
            error: None,
        }
    }

    /// Placeholder for a file that was never recorded on the transaction
    pub fn unknown(uri: impl Into<String>) -> Self {
        let mut info = Self::new(uri, Action::Created);
        info.status = UriStatus::Unknown;
        info.error = Some(UNKNOWN_URI_STATUS.to_string());
        info.stop();
        info
    }

    /// Move along the transfer graph
    pub fn advance(&mut self, next: UriStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.stop();
        }
        Ok(())
    }

    /// Move to a failure status and record why
    pub fn fail(&mut self, next: UriStatus, error: impl Into<String>) -> Result<(), TransitionError> {
        self.advance(next)?;
        self.error = Some(error.into());
        Ok(())
    }

    /// Stamp `end` and `duration`
    pub fn stop(&mut self) {
        let end = Utc::now();
        self.duration = (end - self.start).num_milliseconds();
        self.end = Some(end);
    }

    pub fn record_content(&mut self, sha: impl Into<String>, size: u64) {
        self.sha = Some(sha.into());
        self.size = size;
    }

    pub fn has_error(&self) -> bool {
        self.error
            .as_deref()
            .map(|e| !e.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn is_committed(&self) -> bool {
        self.status == UriStatus::Committed
    }

    /// Start (or restart) a verification attempt
    pub fn begin_verify(&mut self) {
        self.verification_status = Some(VerificationStatus::Verifying);
    }

    /// The published file matched the source
    pub fn verified(&mut self) {
        self.verification_status = Some(VerificationStatus::Verified);
        self.verify_message = None;
        self.verification_end = Some(Utc::now());
    }

    /// Record a failed attempt. Returns `Retrying` while fewer than
    /// `max_attempts` attempts have failed, `Failed` once they all have.
    pub fn verify_mismatch(
        &mut self,
        message: impl Into<String>,
        max_attempts: u32,
    ) -> VerificationStatus {
        self.verification_retry_count += 1;
        self.verify_message = Some(message.into());
        let status = if self.verification_retry_count >= max_attempts {
            self.verification_end = Some(Utc::now());
            VerificationStatus::Failed
        } else {
            VerificationStatus::Retrying
        };
        self.verification_status = Some(status);
        status
    }
}

/// One publish attempt for one collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub wrapped_key: Option<String>,
    #[serde(default)]
    pub salt: Option<String>,
    #[serde(default)]
    uri_infos: Vec<UriInfo>,
    #[serde(default)]
    pub uri_deletes: Vec<String>,
    #[serde(default)]
    errors: Vec<String>,
    /// Collection files on disk, directory -> file names
    #[serde(default)]
    pub files: BTreeMap<String, Vec<String>>,
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            start_date: Utc::now(),
            end_date: None,
            wrapped_key: None,
            salt: None,
            uri_infos: Vec::new(),
            uri_deletes: Vec::new(),
            errors: Vec::new(),
            files: BTreeMap::new(),
        }
    }

    pub fn set_wrapped_key(&mut self, wrapped: WrappedKey) {
        self.wrapped_key = Some(wrapped.wrapped_key);
        self.salt = Some(wrapped.salt);
    }

    pub fn wrapped(&self) -> Option<WrappedKey> {
        match (&self.wrapped_key, &self.salt) {
            (Some(wrapped_key), Some(salt)) => Some(WrappedKey {
                wrapped_key: wrapped_key.clone(),
                salt: salt.clone(),
            }),
            _ => None,
        }
    }

    /// Insert `info`, replacing any record with the same uri
    pub fn add_uri_info(&mut self, info: UriInfo) {
        match self.uri_infos.iter_mut().find(|i| i.uri == info.uri) {
            Some(existing) => *existing = info,
            None => self.uri_infos.push(info),
        }
    }

    /// Apply `f` to the record for `uri`. Returns false if there is none.
    pub fn update_uri_info<F>(&mut self, uri: &str, f: F) -> bool
    where
        F: FnOnce(&mut UriInfo),
    {
        match self.uri_infos.iter_mut().find(|i| i.uri == uri) {
            Some(info) => {
                f(info);
                true
            }
            None => false,
        }
    }

    pub fn uri_info(&self, uri: &str) -> Option<&UriInfo> {
        self.uri_infos.iter().find(|i| i.uri == uri)
    }

    pub fn uri_infos(&self) -> &[UriInfo] {
        &self.uri_infos
    }

    /// Status of `uri`, `Unknown` if it was never recorded
    pub fn status_of(&self, uri: &str) -> UriStatus {
        self.uri_info(uri)
            .map(|i| i.status)
            .unwrap_or(UriStatus::Unknown)
    }

    pub fn add_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty() || self.uri_infos.iter().any(UriInfo::has_error)
    }

    /// No errors and every file committed
    pub fn is_successful(&self) -> bool {
        !self.has_errors() && self.uri_infos.iter().all(UriInfo::is_committed)
    }

    /// Record the on-disk listing from collection uris
    pub fn set_files<'a>(&mut self, uris: impl IntoIterator<Item = &'a str>) {
        let mut files: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for uri in uris {
            let (dir, name) = match uri.rfind('/') {
                Some(0) => ("/", &uri[1..]),
                Some(i) => (&uri[..i], &uri[i + 1..]),
                None => ("", uri),
            };
            files.entry(dir.to_string()).or_default().push(name.to_string());
        }
        for names in files.values_mut() {
            names.sort();
        }
        self.files = files;
    }

    /// Uris of the on-disk listing
    pub fn file_uris(&self) -> Vec<String> {
        self.files
            .iter()
            .flat_map(|(dir, names)| {
                names.iter().map(move |name| match dir.as_str() {
                    "" => name.clone(),
                    "/" => format!("/{}", name),
                    _ => format!("{}/{}", dir, name),
                })
            })
            .collect()
    }

    pub fn end(&mut self) {
        self.end_date = Some(Utc::now());
    }
}
