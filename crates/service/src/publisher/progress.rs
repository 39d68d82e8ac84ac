use std::collections::HashMap;

use common::collection::VerifyCounters;
use parking_lot::Mutex;

/// Counters of publishes that are currently verifying.
///
/// Entries are tracked per transaction, so overlapping publishes of one
/// collection never clear each other's progress.
#[derive(Debug, Default)]
pub struct VerifyProgress {
    // collection id -> (transaction id, counters), in start order
    running: Mutex<HashMap<String, Vec<(String, VerifyCounters)>>>,
}

impl VerifyProgress {
    pub fn start(&self, collection_id: &str, transaction_id: &str, counters: VerifyCounters) {
        self.running
            .lock()
            .entry(collection_id.to_string())
            .or_default()
            .push((transaction_id.to_string(), counters));
    }

    pub fn finish(&self, collection_id: &str, transaction_id: &str) {
        let mut running = self.running.lock();
        if let Some(entries) = running.get_mut(collection_id) {
            entries.retain(|(id, _)| id != transaction_id);
            if entries.is_empty() {
                running.remove(collection_id);
            }
        }
    }

    /// Counters of the most recently started publish still verifying
    pub fn get(&self, collection_id: &str) -> Option<VerifyCounters> {
        self.running
            .lock()
            .get(collection_id)
            .and_then(|entries| entries.last())
            .map(|(_, counters)| counters.clone())
    }
}
