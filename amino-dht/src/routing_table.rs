// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The Kademlia routing table: an ordered array of k-buckets covering the
//! keyspace.
//!
//! Bucket `i` (for every bucket but the last) holds exactly the peers whose
//! CPL with the local id is `i`; the last bucket is the catch-all for every
//! deeper peer. All mutation and snapshot reads run under a single table-wide
//! lock; admission may suspend inside the diversity filter while holding it.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::{
    diversity::DiversityFilter,
    error::{DhtError, Result},
    host::{LatencyEstimator, NoLatencyEstimator},
    kbucket::{Bucket, PeerEntry},
    keyspace::{self, KadId, KEY_BITS},
    types::PeerId,
};

/// Hook invoked (under the table lock) when a peer joins or leaves the table.
/// Implementations must not re-enter the table.
pub type PeerHook = Box<dyn Fn(&PeerId) + Send + Sync>;

/// Routing-table tuning knobs.
#[derive(Clone, Copy, Debug)]
pub struct RoutingTableConfig {
    /// Soft capacity of each bucket (`k`).
    pub bucket_size: usize,
    /// Peers whose latency EWMA exceeds this are refused admission.
    pub max_latency: Duration,
    /// Highest CPL tracked for refresh bookkeeping.
    pub max_refresh_cpl: u32,
}

impl Default for RoutingTableConfig {
    fn default() -> Self {
        Self {
            bucket_size: 20,
            max_latency: Duration::from_secs(10),
            max_refresh_cpl: 15,
        }
    }
}

struct TableInner {
    buckets: Vec<Bucket>,
    cpl_refreshed_at: Vec<Option<Instant>>,
}

/// Snapshot of the routing table's shape.
#[derive(Clone, Debug)]
pub struct RoutingTableInfo {
    /// Residents per bucket, bucket 0 first.
    pub bucket_sizes: Vec<usize>,
    /// Total residents.
    pub total_peers: usize,
    /// The local node's keyspace position.
    pub local_key: KadId,
}

/// The node directory. See the module docs for the bucket invariants.
pub struct RoutingTable {
    local_peer: PeerId,
    local_key: KadId,
    config: RoutingTableConfig,
    latency: Arc<dyn LatencyEstimator>,
    diversity: Option<Arc<DiversityFilter>>,
    peer_added: Option<PeerHook>,
    peer_removed: Option<PeerHook>,
    inner: Mutex<TableInner>,
}

impl RoutingTable {
    /// Create a table for `local_peer` with no diversity filter, no latency
    /// oracle, and no hooks; attach those with the `with_` builders.
    pub fn new(local_peer: PeerId, config: RoutingTableConfig) -> Self {
        let local_key = KadId::from_peer_id(&local_peer);
        let tracked = config.max_refresh_cpl as usize + 1;
        Self {
            local_peer,
            local_key,
            config,
            latency: Arc::new(NoLatencyEstimator),
            diversity: None,
            peer_added: None,
            peer_removed: None,
            inner: Mutex::new(TableInner {
                buckets: vec![Bucket::new()],
                cpl_refreshed_at: vec![None; tracked],
            }),
        }
    }

    /// Attach the host's latency oracle.
    pub fn with_latency_estimator(mut self, latency: Arc<dyn LatencyEstimator>) -> Self {
        self.latency = latency;
        self
    }

    /// Attach a peer-diversity filter to the admission path.
    pub fn with_diversity_filter(mut self, filter: Arc<DiversityFilter>) -> Self {
        self.diversity = Some(filter);
        self
    }

    /// Invoke `hook` whenever a peer is admitted.
    pub fn with_peer_added_hook(mut self, hook: PeerHook) -> Self {
        self.peer_added = Some(hook);
        self
    }

    /// Invoke `hook` whenever a peer is evicted or removed.
    pub fn with_peer_removed_hook(mut self, hook: PeerHook) -> Self {
        self.peer_removed = Some(hook);
        self
    }

    /// The local node's keyspace position.
    pub fn local_key(&self) -> &KadId {
        &self.local_key
    }

    /// Try to admit a peer.
    ///
    /// `query_peer` marks the admission as resulting from a query the peer
    /// answered; it stamps `last_useful_at`. `replaceable` marks the entry as
    /// eligible for eviction when its bucket fills.
    ///
    /// Returns `Ok(true)` when the peer was newly added, `Ok(false)` when it
    /// was already present (or is the local peer, which is never stored), and
    /// an error when admission was refused.
    pub async fn try_add_peer(
        &self,
        peer: &PeerId,
        query_peer: bool,
        replaceable: bool,
    ) -> Result<bool> {
        if *peer == self.local_peer {
            trace!("refusing to add the local peer to its own table");
            return Ok(false);
        }

        let kad_id = KadId::from_peer_id(peer);
        let cpl = self.local_key.common_prefix_len(&kad_id);
        let now = Instant::now();

        let mut inner = self.inner.lock().await;

        let bucket_idx = Self::bucket_index(&inner, cpl);
        if let Some(entry) = inner.buckets[bucket_idx].get_mut(peer) {
            if query_peer && entry.last_useful_at.is_none() {
                entry.last_useful_at = Some(now);
            }
            return Ok(false);
        }

        if let Some(latency) = self.latency.latency_ewma(peer) {
            if latency > self.config.max_latency {
                debug!("refusing {peer}: latency {latency:?} over ceiling");
                return Err(DhtError::HighLatency {
                    latency,
                    max: self.config.max_latency,
                });
            }
        }

        if let Some(filter) = &self.diversity {
            if !filter.try_add(peer, cpl).await {
                return Err(DhtError::DiversityRejected);
            }
        }

        let mut entry = PeerEntry::new(peer.clone(), replaceable);
        if query_peer {
            entry.last_useful_at = Some(now);
        }

        let mut bucket_idx = bucket_idx;
        if inner.buckets[bucket_idx].len() >= self.config.bucket_size
            && bucket_idx == inner.buckets.len() - 1
        {
            self.unfold_last_bucket(&mut inner);
            bucket_idx = Self::bucket_index(&inner, cpl);
        }

        if inner.buckets[bucket_idx].len() < self.config.bucket_size {
            inner.buckets[bucket_idx].push_front(entry);
            debug!("added {peer} to bucket {bucket_idx} (cpl {cpl})");
            if let Some(hook) = &self.peer_added {
                hook(peer);
            }
            return Ok(true);
        }

        let evictee = inner.buckets[bucket_idx]
            .peers()
            .into_iter()
            .find(|e| e.replaceable)
            .map(|e| e.peer_id);
        if let Some(evictee) = evictee {
            inner.buckets[bucket_idx].remove(&evictee);
            if let Some(filter) = &self.diversity {
                filter.remove(&evictee).await;
            }
            if let Some(hook) = &self.peer_removed {
                hook(&evictee);
            }
            inner.buckets[bucket_idx].push_front(entry);
            debug!("added {peer} to bucket {bucket_idx}, evicted {evictee}");
            if let Some(hook) = &self.peer_added {
                hook(peer);
            }
            return Ok(true);
        }

        // Undo the diversity reservation made above.
        if let Some(filter) = &self.diversity {
            filter.remove(peer).await;
        }
        Err(DhtError::NoCapacity)
    }

    /// Remove a peer, releasing any diversity reservation and trimming empty
    /// trailing buckets. Returns whether the peer was present.
    pub async fn remove_peer(&self, peer: &PeerId) -> bool {
        let kad_id = KadId::from_peer_id(peer);
        let cpl = self.local_key.common_prefix_len(&kad_id);

        let mut inner = self.inner.lock().await;
        let bucket_idx = Self::bucket_index(&inner, cpl);
        if !inner.buckets[bucket_idx].remove(peer) {
            return false;
        }
        if let Some(filter) = &self.diversity {
            filter.remove(peer).await;
        }
        if let Some(hook) = &self.peer_removed {
            hook(peer);
        }
        debug!("removed {peer} from bucket {bucket_idx}");

        // Consolidate: interior buckets hold exactly their CPL; the last
        // bucket is the catch-all and must stay non-empty while others exist.
        while inner.buckets.len() > 1 {
            let n = inner.buckets.len();
            if inner.buckets[n - 1].is_empty() {
                inner.buckets.pop();
            } else if inner.buckets[n - 2].is_empty() {
                let last = inner.buckets.pop().unwrap_or_default();
                inner.buckets[n - 2] = last;
            } else {
                break;
            }
        }
        true
    }

    /// The `count` table residents nearest to `target`, ascending by XOR
    /// distance.
    pub async fn nearest_peers(&self, target: &KadId, count: usize) -> Vec<PeerId> {
        let inner = self.inner.lock().await;
        let cpl = self.local_key.common_prefix_len(target);
        let start = Self::bucket_index(&inner, cpl);

        let mut candidates: Vec<(crate::keyspace::Distance, PeerId)> = Vec::new();
        let collect = |bucket: &Bucket, candidates: &mut Vec<_>| {
            for entry in bucket.peers() {
                candidates.push((entry.kad_id.distance(target), entry.peer_id));
            }
        };

        collect(&inner.buckets[start], &mut candidates);
        let mut above = start + 1;
        while candidates.len() < count && above < inner.buckets.len() {
            collect(&inner.buckets[above], &mut candidates);
            above += 1;
        }
        let mut below = start;
        while candidates.len() < count && below > 0 {
            below -= 1;
            collect(&inner.buckets[below], &mut candidates);
        }

        candidates.sort_by(|(a, _), (b, _)| a.cmp(b));
        candidates.truncate(count);
        candidates.into_iter().map(|(_, peer)| peer).collect()
    }

    /// Whether admitting this peer would change the table: it is absent and
    /// there is room, a replaceable resident, or a split to be had.
    pub async fn useful_new_peer(&self, peer: &PeerId) -> bool {
        let kad_id = KadId::from_peer_id(peer);
        let cpl = self.local_key.common_prefix_len(&kad_id);

        let inner = self.inner.lock().await;
        let bucket_idx = Self::bucket_index(&inner, cpl);
        let bucket = &inner.buckets[bucket_idx];

        if bucket.get(peer).is_some() {
            return false;
        }
        if bucket.len() < self.config.bucket_size {
            return true;
        }
        if bucket.peers().iter().any(|e| e.replaceable) {
            return true;
        }
        if bucket_idx == inner.buckets.len() - 1 {
            // A split helps only if the residents straddle two CPLs.
            let cpls: Vec<u32> = bucket
                .peers()
                .iter()
                .map(|e| e.kad_id.common_prefix_len(&self.local_key))
                .collect();
            if let (Some(min), Some(max)) = (cpls.iter().min(), cpls.iter().max()) {
                return min != max;
            }
        }
        false
    }

    /// Stamp a successful outbound query to `peer`.
    pub async fn update_last_successful_outbound_query(&self, peer: &PeerId, at: Instant) {
        let mut inner = self.inner.lock().await;
        let idx = Self::bucket_index_for_peer(&inner, &self.local_key, peer);
        if let Some(entry) = inner.buckets[idx].get_mut(peer) {
            entry.last_successful_outbound_query_at = at;
        }
    }

    /// Stamp `peer` as having been useful.
    pub async fn update_last_useful(&self, peer: &PeerId, at: Instant) {
        let mut inner = self.inner.lock().await;
        let idx = Self::bucket_index_for_peer(&inner, &self.local_key, peer);
        if let Some(entry) = inner.buckets[idx].get_mut(peer) {
            entry.last_useful_at = Some(at);
        }
    }

    /// Flip the `replaceable` flag on every resident.
    pub async fn set_all_replaceable(&self, replaceable: bool) {
        let mut inner = self.inner.lock().await;
        for bucket in &mut inner.buckets {
            bucket.update_all(|entry| entry.replaceable = replaceable);
        }
    }

    /// Whether the table currently holds `peer`.
    pub async fn contains(&self, peer: &PeerId) -> bool {
        let inner = self.inner.lock().await;
        let idx = Self::bucket_index_for_peer(&inner, &self.local_key, peer);
        inner.buckets[idx].get(peer).is_some()
    }

    /// Total resident count.
    pub async fn len(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.buckets.iter().map(Bucket::len).sum()
    }

    /// True when no peers are held.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Per-bucket sizes, front of the array first.
    pub async fn bucket_sizes(&self) -> Vec<usize> {
        let inner = self.inner.lock().await;
        inner.buckets.iter().map(Bucket::len).collect()
    }

    /// Snapshot of the table's current shape.
    pub async fn info(&self) -> RoutingTableInfo {
        let inner = self.inner.lock().await;
        let bucket_sizes: Vec<usize> = inner.buckets.iter().map(Bucket::len).collect();
        RoutingTableInfo {
            total_peers: bucket_sizes.iter().sum(),
            bucket_sizes,
            local_key: self.local_key,
        }
    }

    /// The tracked "last refreshed" timestamp for each CPL, index = CPL.
    /// `None` means the CPL has never been refreshed.
    pub async fn cpl_refresh_times(&self) -> Vec<Option<Instant>> {
        let inner = self.inner.lock().await;
        inner.cpl_refreshed_at.clone()
    }

    /// Record that a refresh query for `cpl` completed at `at`.
    pub async fn reset_cpl_refreshed_at(&self, cpl: u32, at: Instant) {
        let mut inner = self.inner.lock().await;
        if let Some(slot) = inner.cpl_refreshed_at.get_mut(cpl as usize) {
            *slot = Some(at);
        }
    }

    /// A random keyspace id whose CPL with the local id is exactly `cpl`;
    /// refresh queries for a bucket aim at one of these.
    pub fn random_kad_id_for_cpl(&self, cpl: u32) -> KadId {
        keyspace::random_id_with_cpl(&self.local_key, cpl)
    }

    fn bucket_index(inner: &TableInner, cpl: u32) -> usize {
        (cpl as usize).min(inner.buckets.len() - 1)
    }

    fn bucket_index_for_peer(inner: &TableInner, local: &KadId, peer: &PeerId) -> usize {
        let cpl = local.common_prefix_len(&KadId::from_peer_id(peer));
        Self::bucket_index(inner, cpl)
    }

    /// Split the last bucket until the deepest bucket has room again or the
    /// keyspace is exhausted. Only ever invoked on the catch-all.
    fn unfold_last_bucket(&self, inner: &mut TableInner) {
        while inner.buckets.len() < KEY_BITS as usize {
            let split_cpl = (inner.buckets.len() - 1) as u32;
            let last = inner
                .buckets
                .last_mut()
                .map(|bucket| bucket.split(split_cpl, &self.local_key));
            let Some(new_last) = last else {
                break;
            };
            inner.buckets.push(new_last);
            trace!("split catch-all bucket at cpl {split_cpl}");
            if inner.buckets[inner.buckets.len() - 1].len() < self.config.bucket_size {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        diversity::{DiversityConfig, DiversityFilter},
        host::{AddressBook, MemoryAddressBook, NoAsnResolver},
        types::PeerAddress,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Brute-force peers whose CPL with `local` is exactly `cpl`.
    fn peers_with_cpl(local: &KadId, cpl: u32, count: usize) -> Vec<PeerId> {
        let mut found = Vec::new();
        for hi in 0..=255u8 {
            for lo in 0..=255u8 {
                for sub in 0..=3u8 {
                    let peer = PeerId::new(vec![hi, lo, sub]);
                    if KadId::from_peer_id(&peer).common_prefix_len(local) == cpl {
                        found.push(peer);
                        if found.len() == count {
                            return found;
                        }
                    }
                }
            }
        }
        panic!("could not find {count} peers with cpl {cpl}");
    }

    fn table() -> RoutingTable {
        RoutingTable::new(PeerId::new(b"local node".to_vec()), RoutingTableConfig::default())
    }

    #[tokio::test]
    async fn never_stores_the_local_peer() {
        let local = PeerId::new(b"local node".to_vec());
        let table = table();
        assert_eq!(table.try_add_peer(&local, false, false).await, Ok(false));
        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn re_adding_a_peer_is_not_newly_added() {
        let table = table();
        let peer = PeerId::new(vec![1]);
        assert_eq!(table.try_add_peer(&peer, false, false).await, Ok(true));
        assert_eq!(table.try_add_peer(&peer, false, false).await, Ok(false));
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn query_peer_readd_stamps_usefulness() {
        let table = table();
        let peer = PeerId::new(vec![1]);
        table.try_add_peer(&peer, false, false).await.unwrap();

        let inner = table.inner.lock().await;
        let entry = inner.buckets[0].get(&peer).unwrap();
        assert!(entry.last_useful_at.is_none());
        drop(inner);

        table.try_add_peer(&peer, true, false).await.unwrap();
        let inner = table.inner.lock().await;
        let entry = inner.buckets[0].get(&peer).unwrap();
        assert!(entry.last_useful_at.is_some());
    }

    #[tokio::test]
    async fn full_bucket_split_separates_cpls() {
        // One bucket of 20: nineteen CPL-0 peers plus one CPL-3 peer. Admitting
        // a CPL-5 peer must split the catch-all so the deep peers move out.
        let local_peer = PeerId::new(b"local node".to_vec());
        let local = KadId::from_peer_id(&local_peer);
        let table = RoutingTable::new(local_peer, RoutingTableConfig::default());

        let shallow = peers_with_cpl(&local, 0, 19);
        let deep3 = peers_with_cpl(&local, 3, 1).remove(0);
        let deep5 = peers_with_cpl(&local, 5, 1).remove(0);

        for peer in &shallow {
            assert_eq!(table.try_add_peer(peer, false, false).await, Ok(true));
        }
        assert_eq!(table.try_add_peer(&deep3, false, false).await, Ok(true));
        assert_eq!(table.bucket_sizes().await, vec![20]);

        assert_eq!(table.try_add_peer(&deep5, false, false).await, Ok(true));

        let sizes = table.bucket_sizes().await;
        assert_eq!(sizes[0], 19);
        assert_eq!(sizes.last(), Some(&2));
        assert!(table.contains(&deep3).await);
        assert!(table.contains(&deep5).await);
    }

    #[tokio::test]
    async fn full_bucket_without_replaceables_refuses() {
        let local_peer = PeerId::new(b"local node".to_vec());
        let local = KadId::from_peer_id(&local_peer);
        let table = RoutingTable::new(local_peer, RoutingTableConfig::default());

        // 21 peers all at CPL 0: a split cannot separate them.
        let peers = peers_with_cpl(&local, 0, 21);
        for peer in &peers[..20] {
            assert_eq!(table.try_add_peer(peer, false, false).await, Ok(true));
        }
        assert_eq!(
            table.try_add_peer(&peers[20], false, false).await,
            Err(DhtError::NoCapacity)
        );
    }

    #[tokio::test]
    async fn full_bucket_evicts_first_replaceable() {
        let local_peer = PeerId::new(b"local node".to_vec());
        let local = KadId::from_peer_id(&local_peer);
        let table = RoutingTable::new(local_peer, RoutingTableConfig::default());

        let peers = peers_with_cpl(&local, 0, 21);
        table.try_add_peer(&peers[0], false, true).await.unwrap();
        for peer in &peers[1..20] {
            table.try_add_peer(peer, false, false).await.unwrap();
        }

        assert_eq!(table.try_add_peer(&peers[20], false, false).await, Ok(true));
        assert!(!table.contains(&peers[0]).await);
        assert!(table.contains(&peers[20]).await);
        assert_eq!(table.len().await, 20);
    }

    #[tokio::test]
    async fn removal_consolidates_trailing_buckets() {
        let local_peer = PeerId::new(b"local node".to_vec());
        let local = KadId::from_peer_id(&local_peer);
        let table = RoutingTable::new(local_peer, RoutingTableConfig::default());

        let shallow = peers_with_cpl(&local, 0, 19);
        let deep3 = peers_with_cpl(&local, 3, 1).remove(0);
        let deep5 = peers_with_cpl(&local, 5, 1).remove(0);
        for peer in shallow.iter().chain([&deep3, &deep5]) {
            table.try_add_peer(peer, false, false).await.unwrap();
        }
        assert!(table.bucket_sizes().await.len() > 1);

        // Dropping both deep peers empties everything past bucket 0.
        assert!(table.remove_peer(&deep3).await);
        assert!(table.remove_peer(&deep5).await);

        let sizes = table.bucket_sizes().await;
        assert_eq!(sizes.len(), 1);
        assert_eq!(sizes[0], 19);
        // Either a single bucket remains or the trailing ones are non-empty.
        assert!(!table.remove_peer(&deep3).await);
    }

    #[tokio::test]
    async fn nearest_peers_sorted_and_bounded() {
        let table = table();
        let peers: Vec<PeerId> = (1u8..=30).map(|i| PeerId::new(vec![i])).collect();
        for peer in &peers {
            let _ = table.try_add_peer(peer, false, false).await;
        }
        let stored = table.len().await;

        let target = KadId::from_bytes(b"lookup target");
        let nearest = table.nearest_peers(&target, 10).await;
        assert_eq!(nearest.len(), 10.min(stored));

        let mut last = None;
        for peer in &nearest {
            let d = KadId::from_peer_id(peer).distance(&target);
            if let Some(prev) = last {
                assert!(prev <= d);
            }
            last = Some(d);
        }

        let all = table.nearest_peers(&target, 1000).await;
        assert_eq!(all.len(), stored);
    }

    #[tokio::test]
    async fn useful_new_peer_tracks_capacity_and_split_potential() {
        let local_peer = PeerId::new(b"local node".to_vec());
        let local = KadId::from_peer_id(&local_peer);
        let table = RoutingTable::new(local_peer, RoutingTableConfig::default());

        let newcomer = peers_with_cpl(&local, 1, 1).remove(0);
        assert!(table.useful_new_peer(&newcomer).await);

        table.try_add_peer(&newcomer, false, false).await.unwrap();
        assert!(!table.useful_new_peer(&newcomer).await);

        // Fill the catch-all with CPL-0 peers only: no split potential left.
        let shallow = peers_with_cpl(&local, 0, 20);
        for peer in &shallow[..19] {
            table.try_add_peer(peer, false, false).await.unwrap();
        }
        // 20 residents now, one of them CPL-1: a split would separate them.
        assert!(table.useful_new_peer(&shallow[19]).await);

        table.remove_peer(&newcomer).await;
        table.try_add_peer(&shallow[19], false, false).await.unwrap();
        let another = peers_with_cpl(&local, 0, 21).remove(20);
        assert!(!table.useful_new_peer(&another).await);
    }

    #[tokio::test]
    async fn high_latency_peers_are_refused() {
        struct SlowOracle;
        impl LatencyEstimator for SlowOracle {
            fn latency_ewma(&self, _peer: &PeerId) -> Option<Duration> {
                Some(Duration::from_secs(30))
            }
        }

        let table = table().with_latency_estimator(Arc::new(SlowOracle));
        let result = table.try_add_peer(&PeerId::new(vec![1]), false, false).await;
        assert!(matches!(result, Err(DhtError::HighLatency { .. })));
    }

    #[tokio::test]
    async fn diversity_rejection_surfaces_and_release_on_remove() {
        let book = Arc::new(MemoryAddressBook::new());
        let filter = Arc::new(DiversityFilter::new(
            DiversityConfig {
                max_per_cpl: 1,
                max_for_table: 1,
            },
            book.clone(),
            Arc::new(NoAsnResolver),
        ));
        let table = table().with_diversity_filter(filter);

        let first = PeerId::new(vec![1]);
        let second = PeerId::new(vec![2]);
        for (peer, host) in [(&first, "203.0.113.1:4001"), (&second, "203.0.113.2:4001")] {
            book.add_addresses(
                peer,
                vec![PeerAddress::new("tcp", host)],
                Duration::from_secs(600),
            )
            .await;
        }

        assert_eq!(table.try_add_peer(&first, false, false).await, Ok(true));
        assert_eq!(
            table.try_add_peer(&second, false, false).await,
            Err(DhtError::DiversityRejected)
        );

        table.remove_peer(&first).await;
        assert_eq!(table.try_add_peer(&second, false, false).await, Ok(true));
    }

    #[tokio::test]
    async fn hooks_fire_on_admission_and_removal() {
        static ADDED: AtomicUsize = AtomicUsize::new(0);
        static REMOVED: AtomicUsize = AtomicUsize::new(0);

        let table = table()
            .with_peer_added_hook(Box::new(|_| {
                ADDED.fetch_add(1, Ordering::SeqCst);
            }))
            .with_peer_removed_hook(Box::new(|_| {
                REMOVED.fetch_add(1, Ordering::SeqCst);
            }));

        let peer = PeerId::new(vec![1]);
        table.try_add_peer(&peer, false, false).await.unwrap();
        table.remove_peer(&peer).await;

        assert_eq!(ADDED.load(Ordering::SeqCst), 1);
        assert_eq!(REMOVED.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn info_reports_shape() {
        let table = table();
        for id in 1u8..=5 {
            table
                .try_add_peer(&PeerId::new(vec![id]), false, false)
                .await
                .unwrap();
        }
        let info = table.info().await;
        assert_eq!(info.total_peers, 5);
        assert_eq!(info.bucket_sizes.iter().sum::<usize>(), 5);
        assert_eq!(&info.local_key, table.local_key());
    }

    #[tokio::test]
    async fn refresh_times_are_tracked_per_cpl() {
        let table = table();
        let times = table.cpl_refresh_times().await;
        assert_eq!(times.len(), 16);
        assert!(times.iter().all(Option::is_none));

        let now = Instant::now();
        table.reset_cpl_refreshed_at(3, now).await;
        let times = table.cpl_refresh_times().await;
        assert_eq!(times[3], Some(now));
        assert!(times[0].is_none());
    }

    #[tokio::test]
    async fn random_kad_id_matches_requested_cpl() {
        let table = table();
        for cpl in 0..16 {
            let id = table.random_kad_id_for_cpl(cpl);
            assert_eq!(table.local_key().common_prefix_len(&id), cpl);
        }
    }
}
