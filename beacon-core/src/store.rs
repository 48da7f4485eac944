//! In-memory datum store.
//!
//! The single-writer discipline is split across two entry points: `put`
//! is the owner path and advances the key's logical timestamp; `install`
//! is the replica path and only accepts datums newer than what is held.

use dashmap::DashMap;
use tracing::debug;

use crate::Datum;
use crate::Instances;

#[derive(Default)]
pub struct DataStore {
    data: DashMap<String, Datum>,
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Owner-side write: bumps the logical timestamp past the stored one
    /// and recomputes the checksum. Atomic per key.
    pub fn put(
        &self,
        key: &str,
        value: Instances,
    ) -> Datum {
        let mut entry = self.data.entry(key.to_string()).or_default();
        let next = entry.timestamp + 1;
        *entry = Datum::new(key, value, next);
        entry.clone()
    }

    /// Replica-side write: installs a datum received from the owner.
    /// Returns `false` (and keeps local state) when the incoming logical
    /// timestamp does not advance past the stored one.
    pub fn install(
        &self,
        datum: Datum,
    ) -> bool {
        let mut entry = self.data.entry(datum.key.clone()).or_default();
        if entry.timestamp >= datum.timestamp && !entry.key.is_empty() {
            debug!(
                key = %datum.key,
                local = entry.timestamp,
                received = datum.timestamp,
                "stale datum dropped"
            );
            return false;
        }
        *entry = datum;
        true
    }

    /// Idempotent re-install after listener delivery: accepts a datum
    /// whose timestamp equals the stored one (restoring the value) but
    /// still rejects strictly older datums.
    pub fn reinstall(
        &self,
        datum: Datum,
    ) -> bool {
        let mut entry = self.data.entry(datum.key.clone()).or_default();
        if entry.timestamp > datum.timestamp {
            return false;
        }
        *entry = datum;
        true
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Option<Datum> {
        self.data.get(key).map(|d| d.clone())
    }

    pub fn remove(
        &self,
        key: &str,
    ) -> Option<Datum> {
        self.data.remove(key).map(|(_, d)| d)
    }

    pub fn contains(
        &self,
        key: &str,
    ) -> bool {
        self.data.contains_key(key)
    }

    /// Point-in-time snapshot of the key set.
    pub fn keys(&self) -> Vec<String> {
        self.data.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
