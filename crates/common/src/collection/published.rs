use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::descriptor::{CollectionDescription, CollectionType};
use super::transaction::Transaction;

/// Outcome of one publish attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishResult {
    pub message: String,
    pub error: bool,
    pub transaction: Transaction,
}

impl PublishResult {
    pub fn from_transaction(transaction: Transaction) -> Self {
        let error = transaction.has_errors();
        let message = if error {
            match transaction.errors().first() {
                Some(first) => format!("publish failed: {}", first),
                None => "publish failed: one or more files were not committed".to_string(),
            }
        } else {
            format!(
                "published {} file(s) in transaction {}",
                transaction.uri_infos().len(),
                transaction.id
            )
        };
        Self {
            message,
            error,
            transaction,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CounterSnapshot {
    #[serde(default)]
    verified_count: u64,
    #[serde(default)]
    verify_failed_count: u64,
    #[serde(default)]
    verify_inprogress_count: u64,
}

/// Verification progress counters.
///
/// Clones share the same atomics, so a clone handed to verification workers
/// updates the collection it came from.
#[derive(Debug, Clone, Default)]
pub struct VerifyCounters {
    verified: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
    in_progress: Arc<AtomicU64>,
}

impl VerifyCounters {
    pub fn increment_verified(&self) {
        self.verified.fetch_add(1, Ordering::AcqRel);
    }

    pub fn increment_verify_failed(&self) {
        self.failed.fetch_add(1, Ordering::AcqRel);
    }

    pub fn increment_verify_inprogress(&self) {
        self.in_progress.fetch_add(1, Ordering::AcqRel);
    }

    /// Never goes below zero
    pub fn decrement_verify_inprogress(&self) {
        let _ = self
            .in_progress
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn verified_count(&self) -> u64 {
        self.verified.load(Ordering::Acquire)
    }

    pub fn verify_failed_count(&self) -> u64 {
        self.failed.load(Ordering::Acquire)
    }

    pub fn verify_inprogress_count(&self) -> u64 {
        self.in_progress.load(Ordering::Acquire)
    }
}

impl From<CounterSnapshot> for VerifyCounters {
    fn from(s: CounterSnapshot) -> Self {
        Self {
            verified: Arc::new(AtomicU64::new(s.verified_count)),
            failed: Arc::new(AtomicU64::new(s.verify_failed_count)),
            in_progress: Arc::new(AtomicU64::new(s.verify_inprogress_count)),
        }
    }
}

impl From<&VerifyCounters> for CounterSnapshot {
    fn from(c: &VerifyCounters) -> Self {
        Self {
            verified_count: c.verified_count(),
            verify_failed_count: c.verify_failed_count(),
            verify_inprogress_count: c.verify_inprogress_count(),
        }
    }
}

impl Serialize for VerifyCounters {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        CounterSnapshot::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for VerifyCounters {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        CounterSnapshot::deserialize(deserializer).map(Into::into)
    }
}

/// Record of a collection after it has been published
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedCollection {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: CollectionType,
    #[serde(default)]
    pub publish_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub publish_start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub publish_end_date: Option<DateTime<Utc>>,
    #[serde(flatten)]
    counters: VerifyCounters,
    #[serde(default)]
    publish_results: Vec<PublishResult>,
}

impl From<&CollectionDescription> for PublishedCollection {
    fn from(desc: &CollectionDescription) -> Self {
        Self {
            id: desc.id.clone(),
            name: desc.name.clone(),
            kind: desc.kind,
            publish_date: desc.publish_date,
            publish_start_date: None,
            publish_end_date: None,
            counters: VerifyCounters::default(),
            publish_results: Vec::new(),
        }
    }
}

impl PublishedCollection {
    /// Shared handle to this collection's counters
    pub fn counters(&self) -> VerifyCounters {
        self.counters.clone()
    }

    pub fn increment_verified(&self) {
        self.counters.increment_verified();
    }

    pub fn increment_verify_failed(&self) {
        self.counters.increment_verify_failed();
    }

    pub fn increment_verify_inprogress(&self) {
        self.counters.increment_verify_inprogress();
    }

    pub fn decrement_verify_inprogress(&self) {
        self.counters.decrement_verify_inprogress();
    }

    pub fn verified_count(&self) -> u64 {
        self.counters.verified_count()
    }

    pub fn verify_failed_count(&self) -> u64 {
        self.counters.verify_failed_count()
    }

    pub fn verify_inprogress_count(&self) -> u64 {
        self.counters.verify_inprogress_count()
    }

    pub fn publish_results(&self) -> &[PublishResult] {
        &self.publish_results
    }

    /// Append the result of an attempt and update the publish window
    pub fn add_result(&mut self, result: PublishResult) {
        let tx = &result.transaction;
        if self.publish_start_date.is_none() {
            self.publish_start_date = Some(tx.start_date);
        }
        if let Some(end) = tx.end_date {
            self.publish_end_date = Some(end);
        }
        self.publish_results.push(result);
    }
}
