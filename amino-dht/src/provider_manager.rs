// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Provider manager: an LRU-cached front over a [`ProviderStore`] that keeps
//! the host's address book in sync with announced providers.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use tokio::{sync::Mutex, task::JoinHandle, time::interval};
use tracing::{debug, trace};

use crate::{
    error::{DhtError, Result},
    host::AddressBook,
    provider_store::ProviderStore,
    types::{PeerAddress, PeerId, ProviderRecord},
};

/// Per-content-id collection of provider records, de-duplicated by peer.
/// The latest insertion for a peer wins.
#[derive(Clone, Debug, Default)]
pub struct ProviderSet {
    providers: Vec<ProviderRecord>,
}

impl ProviderSet {
    /// Build a set from store records, de-duplicating as they arrive.
    pub fn from_records(records: Vec<ProviderRecord>) -> Self {
        let mut set = Self::default();
        for record in records {
            set.add(record);
        }
        set
    }

    /// Insert a record, replacing any earlier one for the same peer.
    pub fn add(&mut self, record: ProviderRecord) {
        self.providers.retain(|r| r.peer_id != record.peer_id);
        self.providers.push(record);
    }

    /// The records held, insertion order.
    pub fn providers(&self) -> &[ProviderRecord] {
        &self.providers
    }

    /// True when no providers are held.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Manager tuning knobs.
#[derive(Clone, Copy, Debug)]
pub struct ProviderManagerConfig {
    /// Entries held by the cache before the least recently used is evicted.
    pub cache_size: usize,
    /// How often the cache is flushed wholesale.
    pub cleanup_interval: Duration,
    /// TTL handed to the address book for announced provider addresses.
    pub provider_address_ttl: Duration,
    /// Validity stamped on records added to already-cached sets.
    pub provide_validity: Duration,
}

impl Default for ProviderManagerConfig {
    fn default() -> Self {
        Self {
            cache_size: 256,
            cleanup_interval: Duration::from_secs(60 * 60),
            provider_address_ttl: Duration::from_secs(24 * 60 * 60),
            provide_validity: Duration::from_secs(48 * 60 * 60),
        }
    }
}

struct CacheEntry {
    set: ProviderSet,
    last_accessed: Instant,
}

#[derive(Default)]
struct Cache {
    entries: HashMap<Vec<u8>, CacheEntry>,
}

impl Cache {
    fn get(&mut self, key: &[u8]) -> Option<&mut CacheEntry> {
        let entry = self.entries.get_mut(key)?;
        entry.last_accessed = Instant::now();
        Some(entry)
    }

    fn insert(&mut self, key: Vec<u8>, set: ProviderSet, capacity: usize) {
        self.entries.insert(
            key,
            CacheEntry {
                set,
                last_accessed: Instant::now(),
            },
        );
        while self.entries.len() > capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_accessed)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

/// LRU-cached provider index. See the module docs.
pub struct ProviderManager {
    config: ProviderManagerConfig,
    local_peer: PeerId,
    store: Arc<dyn ProviderStore>,
    address_book: Arc<dyn AddressBook>,
    cache: Arc<Mutex<Cache>>,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl ProviderManager {
    /// Create a manager over `store`, spawning the periodic cache flush.
    pub fn new(
        config: ProviderManagerConfig,
        local_peer: PeerId,
        store: Arc<dyn ProviderStore>,
        address_book: Arc<dyn AddressBook>,
    ) -> Self {
        let cache: Arc<Mutex<Cache>> = Arc::new(Mutex::new(Cache::default()));

        let flush_cache = cache.clone();
        let cleanup_interval = config.cleanup_interval;
        let task = tokio::spawn(async move {
            let mut timer = interval(cleanup_interval);
            timer.tick().await; // the first tick fires immediately
            loop {
                timer.tick().await;
                flush_cache.lock().await.clear();
                trace!("flushed provider cache");
            }
        });

        Self {
            config,
            local_peer,
            store,
            address_book,
            cache,
            cleanup_task: Mutex::new(Some(task)),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(DhtError::Closed)
        } else {
            Ok(())
        }
    }

    /// Record a provider announcement: update the address book, keep any
    /// cached set coherent, and delegate to the backing store.
    pub async fn add_provider(
        &self,
        key: &[u8],
        peer: PeerId,
        addresses: Vec<PeerAddress>,
    ) -> Result<()> {
        self.ensure_open()?;
        debug!("provider add: {peer} for {}", hex::encode(key));

        self.address_book
            .add_addresses(&peer, addresses.clone(), self.config.provider_address_ttl)
            .await;

        {
            let mut cache = self.cache.lock().await;
            if let Some(entry) = cache.get(key) {
                entry.set.add(ProviderRecord {
                    peer_id: peer.clone(),
                    addresses: addresses.clone(),
                    expires_at: Instant::now() + self.config.provide_validity,
                });
            }
        }

        self.store.add_provider(key, peer, addresses).await
    }

    /// The live providers for `key`, with addresses resolved from the address
    /// book. The local peer is always included when it provides; remote peers
    /// appear only while the book still holds an entry for them.
    pub async fn get_providers(&self, key: &[u8]) -> Result<Vec<ProviderRecord>> {
        self.ensure_open()?;

        let set = {
            let mut cache = self.cache.lock().await;
            cache.get(key).map(|entry| entry.set.clone())
        };
        let set = match set {
            Some(set) => set,
            None => {
                let records = self.store.get_providers(key).await?;
                let set = ProviderSet::from_records(records);
                if !set.is_empty() {
                    let mut cache = self.cache.lock().await;
                    cache.insert(key.to_vec(), set.clone(), self.config.cache_size);
                }
                set
            }
        };

        let now = Instant::now();
        let mut resolved = Vec::new();
        for record in set.providers() {
            if record.is_expired(now) {
                continue;
            }
            if record.peer_id == self.local_peer {
                let addresses = self
                    .address_book
                    .addresses(&record.peer_id)
                    .await
                    .unwrap_or_default();
                resolved.push(ProviderRecord {
                    peer_id: record.peer_id.clone(),
                    addresses,
                    expires_at: record.expires_at,
                });
            } else if let Some(addresses) = self.address_book.addresses(&record.peer_id).await {
                resolved.push(ProviderRecord {
                    peer_id: record.peer_id.clone(),
                    addresses,
                    expires_at: record.expires_at,
                });
            }
        }
        Ok(resolved)
    }

    /// Cancel the flush schedule, drop the cache, and close the backing
    /// store. Subsequent operations fail with [`DhtError::Closed`].
    pub async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(task) = self.cleanup_task.lock().await.take() {
            task.abort();
        }
        self.cache.lock().await.clear();
        self.store.close().await
    }
}
