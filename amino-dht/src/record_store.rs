// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Local key/value record storage backing the PUT_VALUE / GET_VALUE handlers.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    error::{DhtError, Result},
    types::Record,
};

/// Configuration for record storage.
#[derive(Clone, Copy, Debug)]
pub struct RecordStoreConfig {
    /// Maximum number of records held.
    pub max_records: usize,
    /// How long a record stays live after it is stored.
    pub record_ttl: Duration,
}

impl Default for RecordStoreConfig {
    fn default() -> Self {
        Self {
            max_records: 1024,
            record_ttl: Duration::from_secs(48 * 60 * 60),
        }
    }
}

/// Counters exposed by a record store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecordStoreStats {
    /// Records currently held.
    pub record_count: usize,
    /// Records accepted since the store was created.
    pub records_added: u64,
    /// Records dropped, by removal or expiry.
    pub records_removed: u64,
}

/// Local storage for DHT records.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// The live record under `key`, if any.
    async fn get(&self, key: &[u8]) -> Result<Option<Record>>;

    /// Store a record, replacing any previous one under the same key.
    async fn put(&self, record: Record) -> Result<()>;

    /// Drop the record under `key`, returning it if present.
    async fn remove(&self, key: &[u8]) -> Result<Option<Record>>;

    /// The keys of every live record.
    async fn keys(&self) -> Result<Vec<Vec<u8>>>;

    /// Purge expired records; returns how many were dropped.
    async fn cleanup(&self) -> Result<usize>;

    /// Current store counters.
    async fn stats(&self) -> RecordStoreStats;
}

#[derive(Clone, Debug)]
struct StoredRecord {
    record: Record,
    stored_at: Instant,
}

/// In-memory record store with TTL expiry enforced on read.
#[derive(Debug)]
pub struct MemoryRecordStore {
    config: RecordStoreConfig,
    records: Mutex<HashMap<Vec<u8>, StoredRecord>>,
    stats: Mutex<RecordStoreStats>,
}

impl MemoryRecordStore {
    /// Create an empty store.
    pub fn new(config: RecordStoreConfig) -> Self {
        Self {
            config,
            records: Mutex::new(HashMap::new()),
            stats: Mutex::new(RecordStoreStats::default()),
        }
    }

    fn is_expired(&self, stored: &StoredRecord, now: Instant) -> bool {
        now.duration_since(stored.stored_at) >= self.config.record_ttl
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new(RecordStoreConfig::default())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Record>> {
        let now = Instant::now();
        let mut records = self.records.lock().await;
        match records.get(key) {
            Some(stored) if !self.is_expired(stored, now) => Ok(Some(stored.record.clone())),
            Some(_) => {
                records.remove(key);
                self.stats.lock().await.records_removed += 1;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, record: Record) -> Result<()> {
        let mut records = self.records.lock().await;
        if records.len() >= self.config.max_records && !records.contains_key(&record.key) {
            return Err(DhtError::Store(format!(
                "record store full ({} records)",
                records.len()
            )));
        }
        let replaced = records.insert(
            record.key.clone(),
            StoredRecord {
                record,
                stored_at: Instant::now(),
            },
        );
        if replaced.is_none() {
            self.stats.lock().await.records_added += 1;
        }
        Ok(())
    }

    async fn remove(&self, key: &[u8]) -> Result<Option<Record>> {
        let mut records = self.records.lock().await;
        let removed = records.remove(key).map(|stored| stored.record);
        if removed.is_some() {
            self.stats.lock().await.records_removed += 1;
        }
        Ok(removed)
    }

    async fn keys(&self) -> Result<Vec<Vec<u8>>> {
        let now = Instant::now();
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .filter(|(_, stored)| !self.is_expired(stored, now))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn cleanup(&self) -> Result<usize> {
        let now = Instant::now();
        let mut records = self.records.lock().await;
        let before = records.len();
        let ttl = self.config.record_ttl;
        records.retain(|_, stored| now.duration_since(stored.stored_at) < ttl);
        let purged = before - records.len();
        self.stats.lock().await.records_removed += purged as u64;
        Ok(purged)
    }

    async fn stats(&self) -> RecordStoreStats {
        let mut stats = *self.stats.lock().await;
        stats.record_count = self.records.lock().await.len();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_remove_round_trip() {
        let store = MemoryRecordStore::default();
        let record = Record::new(b"/v/key".to_vec(), b"value".to_vec());

        store.put(record.clone()).await.unwrap();
        assert_eq!(store.get(b"/v/key").await.unwrap(), Some(record.clone()));

        let removed = store.remove(b"/v/key").await.unwrap();
        assert_eq!(removed, Some(record));
        assert_eq!(store.get(b"/v/key").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_records_vanish_on_read_and_cleanup() {
        let store = MemoryRecordStore::new(RecordStoreConfig {
            max_records: 16,
            record_ttl: Duration::from_millis(0),
        });
        store
            .put(Record::new(b"/v/a".to_vec(), b"x".to_vec()))
            .await
            .unwrap();
        store
            .put(Record::new(b"/v/b".to_vec(), b"y".to_vec()))
            .await
            .unwrap();

        assert_eq!(store.get(b"/v/a").await.unwrap(), None);
        // The read already dropped `/v/a`; cleanup sweeps the rest.
        assert_eq!(store.cleanup().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn keys_and_stats_track_live_records() {
        let store = MemoryRecordStore::default();
        store
            .put(Record::new(b"/v/a".to_vec(), b"x".to_vec()))
            .await
            .unwrap();
        store
            .put(Record::new(b"/v/b".to_vec(), b"y".to_vec()))
            .await
            .unwrap();

        let mut keys = store.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec![b"/v/a".to_vec(), b"/v/b".to_vec()]);

        store.remove(b"/v/a").await.unwrap();
        let stats = store.stats().await;
        assert_eq!(stats.record_count, 1);
        assert_eq!(stats.records_added, 2);
        assert_eq!(stats.records_removed, 1);
    }

    #[tokio::test]
    async fn capacity_bound_rejects_new_keys_but_allows_replacement() {
        let store = MemoryRecordStore::new(RecordStoreConfig {
            max_records: 1,
            record_ttl: Duration::from_secs(60),
        });
        store
            .put(Record::new(b"/v/a".to_vec(), b"x".to_vec()))
            .await
            .unwrap();

        assert!(store
            .put(Record::new(b"/v/b".to_vec(), b"y".to_vec()))
            .await
            .is_err());
        // Replacing the existing key is still allowed.
        store
            .put(Record::new(b"/v/a".to_vec(), b"z".to_vec()))
            .await
            .unwrap();
    }
}
