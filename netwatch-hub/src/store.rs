/**
 * STATE STORE - Latest known state of the observed fleet
 *
 * ROLE: holds, per source, the last accepted snapshot with its derived rates
 * and the hub receipt time. An entry is replaced wholesale on every accepted
 * snapshot; fields are never merged across reports.
 *
 * CONCURRENCY: records are immutable `Arc<LatestState>` values behind a
 * read-write lock. Writers hold the lock only for a map insert, readers only
 * to clone `Arc`s, so a reader always sees a complete record.
 */

use crate::models::{DerivedRates, LatestState, Snapshot};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;

#[derive(Default)]
pub struct StateStore {
    entries: RwLock<HashMap<String, Arc<LatestState>>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the record for `source_id` and returns the stored record.
    pub fn upsert(
        &self,
        source_id: &str,
        snapshot: Snapshot,
        rates: DerivedRates,
        received_at: OffsetDateTime,
    ) -> Arc<LatestState> {
        let record = Arc::new(LatestState { snapshot, rates, received_at });
        self.entries.write().insert(source_id.to_string(), record.clone());
        record
    }

    pub fn get_snapshot(&self, source_id: &str) -> Option<Arc<LatestState>> {
        self.entries.read().get(source_id).cloned()
    }

    /// Point-in-time view of every source, ordered by source id.
    pub fn get_all(&self) -> Vec<Arc<LatestState>> {
        let mut all: Vec<Arc<LatestState>> = self.entries.read().values().cloned().collect();
        all.sort_by(|a, b| a.source_id().cmp(b.source_id()));
        all
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
