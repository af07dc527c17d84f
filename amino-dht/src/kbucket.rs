// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! K-bucket: an ordered list of peer entries sharing a CPL range.

use std::{collections::VecDeque, time::Instant};

use crate::{
    keyspace::KadId,
    types::PeerId,
};

/// Entry in a k-bucket.
///
/// The cached `kad_id` is derived from `peer_id` at construction and immutable
/// thereafter.
#[derive(Clone, Debug)]
pub struct PeerEntry {
    /// The peer's identifier.
    pub peer_id: PeerId,
    /// Cached keyspace position of the peer.
    pub kad_id: KadId,
    /// When the entry was admitted.
    pub added_at: Instant,
    /// Last time the peer was useful to us (answered a query we needed).
    /// `None` if never.
    pub last_useful_at: Option<Instant>,
    /// Last time an outbound query to this peer succeeded.
    pub last_successful_outbound_query_at: Instant,
    /// Whether the entry may be evicted to admit a newcomer.
    pub replaceable: bool,
}

impl PeerEntry {
    /// Create an entry for a peer, stamping both timestamps with now.
    pub fn new(peer_id: PeerId, replaceable: bool) -> Self {
        let kad_id = KadId::from_peer_id(&peer_id);
        let now = Instant::now();
        Self {
            peer_id,
            kad_id,
            added_at: now,
            last_useful_at: None,
            last_successful_outbound_query_at: now,
            replaceable,
        }
    }
}

/// An ordered sequence of peer entries. Capacity is a soft limit enforced by
/// the routing table, not the bucket itself.
#[derive(Clone, Debug, Default)]
pub struct Bucket {
    entries: VecDeque<PeerEntry>,
}

impl Bucket {
    /// Create an empty bucket.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defensive copy of all entries, front to back.
    pub fn peers(&self) -> Vec<PeerEntry> {
        self.entries.iter().cloned().collect()
    }

    /// The peer ids held, front to back.
    pub fn ids(&self) -> Vec<PeerId> {
        self.entries.iter().map(|e| e.peer_id.clone()).collect()
    }

    /// Look up an entry by peer id.
    pub fn get(&self, peer_id: &PeerId) -> Option<&PeerEntry> {
        self.entries.iter().find(|e| e.peer_id == *peer_id)
    }

    /// Mutable lookup by peer id.
    pub fn get_mut(&mut self, peer_id: &PeerId) -> Option<&mut PeerEntry> {
        self.entries.iter_mut().find(|e| e.peer_id == *peer_id)
    }

    /// Remove the entry for a peer. Returns whether anything was removed.
    pub fn remove(&mut self, peer_id: &PeerId) -> bool {
        if let Some(pos) = self.entries.iter().position(|e| e.peer_id == *peer_id) {
            self.entries.remove(pos);
            true
        } else {
            false
        }
    }

    /// Insert an entry at the front. The caller is responsible for the
    /// no-duplicate-peer invariant.
    pub fn push_front(&mut self, entry: PeerEntry) {
        self.entries.push_front(entry);
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the bucket holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The minimum entry under the supplied strict ordering, or `None` when
    /// empty.
    pub fn min_by(&self, less_than: impl Fn(&PeerEntry, &PeerEntry) -> bool) -> Option<&PeerEntry> {
        let mut min: Option<&PeerEntry> = None;
        for entry in &self.entries {
            match min {
                Some(current) if !less_than(entry, current) => {}
                _ => min = Some(entry),
            }
        }
        min
    }

    /// Apply a mutation to every entry.
    pub fn update_all(&mut self, mut apply: impl FnMut(&mut PeerEntry)) {
        for entry in &mut self.entries {
            apply(entry);
        }
    }

    /// The largest common prefix length any resident shares with `target`, or
    /// `None` when the bucket is empty.
    pub fn max_common_prefix(&self, target: &KadId) -> Option<u32> {
        self.entries
            .iter()
            .map(|e| e.kad_id.common_prefix_len(target))
            .max()
    }

    /// Split off the entries whose CPL with `target` exceeds `cpl` into a new
    /// bucket, preserving their relative order. Entries at exactly `cpl` stay.
    pub fn split(&mut self, cpl: u32, target: &KadId) -> Bucket {
        let mut moved = VecDeque::new();
        let mut kept = VecDeque::new();
        for entry in self.entries.drain(..) {
            if entry.kad_id.common_prefix_len(target) > cpl {
                moved.push_back(entry);
            } else {
                kept.push_back(entry);
            }
        }
        self.entries = kept;
        Bucket { entries: moved }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyspace;

    fn entry(id: u8) -> PeerEntry {
        PeerEntry::new(PeerId::new(vec![id]), false)
    }

    /// Find a peer id whose CPL with `target` equals `want`, by brute force
    /// over two-byte ids.
    fn peer_with_cpl(target: &KadId, want: u32) -> PeerEntry {
        for hi in 0..=255u8 {
            for lo in 0..=255u8 {
                let peer = PeerId::new(vec![hi, lo]);
                if KadId::from_peer_id(&peer).common_prefix_len(target) == want {
                    return PeerEntry::new(peer, false);
                }
            }
        }
        panic!("no two-byte peer with cpl {want}");
    }

    #[test]
    fn push_front_orders_and_get_finds() {
        let mut bucket = Bucket::new();
        bucket.push_front(entry(1));
        bucket.push_front(entry(2));

        assert_eq!(bucket.len(), 2);
        assert_eq!(bucket.ids()[0], PeerId::new(vec![2]));
        assert!(bucket.get(&PeerId::new(vec![1])).is_some());
        assert!(bucket.get(&PeerId::new(vec![9])).is_none());
    }

    #[test]
    fn remove_reports_presence() {
        let mut bucket = Bucket::new();
        bucket.push_front(entry(1));

        assert!(bucket.remove(&PeerId::new(vec![1])));
        assert!(!bucket.remove(&PeerId::new(vec![1])));
        assert!(bucket.is_empty());
    }

    #[test]
    fn min_by_returns_minimum_under_ordering() {
        let mut bucket = Bucket::new();
        bucket.push_front(entry(3));
        bucket.push_front(entry(1));
        bucket.push_front(entry(2));

        let min = bucket
            .min_by(|a, b| a.peer_id.as_bytes() < b.peer_id.as_bytes())
            .unwrap();
        assert_eq!(min.peer_id, PeerId::new(vec![1]));

        let empty = Bucket::new();
        assert!(empty
            .min_by(|a, b| a.peer_id.as_bytes() < b.peer_id.as_bytes())
            .is_none());
    }

    #[test]
    fn update_all_touches_every_entry() {
        let mut bucket = Bucket::new();
        bucket.push_front(entry(1));
        bucket.push_front(entry(2));

        bucket.update_all(|e| e.replaceable = true);
        assert!(bucket.peers().iter().all(|e| e.replaceable));
    }

    #[test]
    fn split_moves_deeper_entries_and_preserves_order() {
        let local = keyspace::KadId::from_bytes(b"split test local");
        let mut bucket = Bucket::new();

        // Mixed CPLs around the split point.
        let shallow_a = peer_with_cpl(&local, 0);
        let shallow_b = peer_with_cpl(&local, 1);
        let deep_a = peer_with_cpl(&local, 2);
        let deep_b = peer_with_cpl(&local, 3);

        bucket.push_front(shallow_a.clone());
        bucket.push_front(deep_a.clone());
        bucket.push_front(shallow_b.clone());
        bucket.push_front(deep_b.clone());
        let before = bucket.len();

        let moved = bucket.split(1, &local);

        assert_eq!(bucket.len() + moved.len(), before);
        // Entries at CPL <= 1 stay, deeper ones move, both keeping order.
        assert_eq!(bucket.ids(), vec![shallow_b.peer_id, shallow_a.peer_id]);
        assert_eq!(moved.ids(), vec![deep_b.peer_id, deep_a.peer_id]);
    }

    #[test]
    fn max_common_prefix_tracks_deepest_resident() {
        let local = keyspace::KadId::from_bytes(b"mcp local");
        let mut bucket = Bucket::new();
        assert_eq!(bucket.max_common_prefix(&local), None);

        bucket.push_front(peer_with_cpl(&local, 0));
        bucket.push_front(peer_with_cpl(&local, 4));
        assert_eq!(bucket.max_common_prefix(&local), Some(4));
    }
}
