// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Provider-record storage: content-id to set of (peer, expiry) assertions.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    error::{DhtError, Result},
    types::{PeerAddress, PeerId, ProviderRecord},
};

/// Configuration for provider storage.
#[derive(Clone, Copy, Debug)]
pub struct ProviderStoreConfig {
    /// How long a provider assertion stays valid after insertion.
    pub provide_validity: Duration,
}

impl Default for ProviderStoreConfig {
    fn default() -> Self {
        Self {
            provide_validity: Duration::from_secs(48 * 60 * 60),
        }
    }
}

/// Backing storage for provider records.
///
/// Implementations enforce their own TTLs; every record returned by
/// `get_providers` is still live.
#[async_trait]
pub trait ProviderStore: Send + Sync + 'static {
    /// Record that `peer` provides the content under `key`.
    async fn add_provider(
        &self,
        key: &[u8],
        peer: PeerId,
        addresses: Vec<PeerAddress>,
    ) -> Result<()>;

    /// The live providers for `key`.
    async fn get_providers(&self, key: &[u8]) -> Result<Vec<ProviderRecord>>;

    /// Shut the store down; subsequent calls fail with [`DhtError::Closed`].
    async fn close(&self) -> Result<()>;
}

/// In-memory provider store with TTL expiry enforced on every access.
#[derive(Debug)]
pub struct MemoryProviderStore {
    config: ProviderStoreConfig,
    records: Mutex<HashMap<Vec<u8>, Vec<ProviderRecord>>>,
    closed: AtomicBool,
}

impl MemoryProviderStore {
    /// Create an empty store.
    pub fn new(config: ProviderStoreConfig) -> Self {
        Self {
            config,
            records: Mutex::new(HashMap::new()),
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
}

impl Default for MemoryProviderStore {
    fn default() -> Self {
        Self::new(ProviderStoreConfig::default())
    }
}

#[async_trait]
impl ProviderStore for MemoryProviderStore {
    async fn add_provider(
        &self,
        key: &[u8],
        peer: PeerId,
        addresses: Vec<PeerAddress>,
    ) -> Result<()> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut records = self.records.lock().await;
        let providers = records.entry(key.to_vec()).or_default();
        providers.retain(|record| !record.is_expired(now));
        // Latest assertion for a peer wins.
        providers.retain(|record| record.peer_id != peer);
        providers.push(ProviderRecord {
            peer_id: peer,
            addresses,
            expires_at: now + self.config.provide_validity,
        });
        Ok(())
    }

    async fn get_providers(&self, key: &[u8]) -> Result<Vec<ProviderRecord>> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut records = self.records.lock().await;
        let Some(providers) = records.get_mut(key) else {
            return Ok(Vec::new());
        };
        providers.retain(|record| !record.is_expired(now));
        if providers.is_empty() {
            records.remove(key);
            return Ok(Vec::new());
        }
        Ok(providers.clone())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.records.lock().await.clear();
        Ok(())
    }
}
