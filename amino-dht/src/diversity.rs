// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Peer-diversity filter: IP-group admission policy layered on the routing
//! table.
//!
//! Peers are grouped by where they sit in the network (IPv4 /16, legacy
//! Class-A /8, IPv6 ASN) and the default policy caps how many routing-table
//! residents may share a group, both per CPL bucket and table-wide.

use std::{
    collections::{HashMap, HashSet},
    net::IpAddr,
    sync::Arc,
};

use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::{
    host::{AddressBook, AsnResolver},
    types::PeerId,
};

/// Legacy Class-A /8 networks still routed as a single allocation; peers in
/// these are grouped at /8 rather than /16.
const LEGACY_CLASS_A: [u8; 8] = [12, 17, 19, 38, 48, 53, 56, 73];

/// The IP group a single address falls into.
pub type GroupKey = String;

/// A peer's membership of one IP group at one CPL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupInfo {
    /// The peer being admitted.
    pub peer_id: PeerId,
    /// The peer's CPL with the local node.
    pub cpl: u32,
    /// The IP group key.
    pub group_key: GroupKey,
}

/// Group-admission policy. The default is [`UpperBoundFilter`]; callers may
/// supply their own.
pub trait GroupFilter: Send + Sync {
    /// Whether a peer in this group may be admitted.
    fn allow(&mut self, group: &GroupInfo) -> bool;
    /// Record an admission into this group.
    fn increment(&mut self, group: &GroupInfo);
    /// Record a removal from this group.
    fn decrement(&mut self, group: &GroupInfo);
}

/// Configuration for the default group policy.
#[derive(Clone, Copy, Debug)]
pub struct DiversityConfig {
    /// Maximum residents of one IP group within a single CPL bucket.
    pub max_per_cpl: usize,
    /// Maximum residents of one IP group across the whole table.
    pub max_for_table: usize,
}

impl Default for DiversityConfig {
    fn default() -> Self {
        Self {
            max_per_cpl: 2,
            max_for_table: 3,
        }
    }
}

/// Default policy: two ceilings, per CPL and per table.
#[derive(Debug, Default)]
pub struct UpperBoundFilter {
    max_per_cpl: usize,
    max_for_table: usize,
    table_counts: HashMap<GroupKey, usize>,
    cpl_counts: HashMap<(u32, GroupKey), usize>,
}

impl UpperBoundFilter {
    /// Create the policy with the supplied ceilings.
    pub fn new(config: DiversityConfig) -> Self {
        Self {
            max_per_cpl: config.max_per_cpl,
            max_for_table: config.max_for_table,
            table_counts: HashMap::new(),
            cpl_counts: HashMap::new(),
        }
    }
}

impl GroupFilter for UpperBoundFilter {
    fn allow(&mut self, group: &GroupInfo) -> bool {
        let in_table = self
            .table_counts
            .get(&group.group_key)
            .copied()
            .unwrap_or(0);
        if in_table >= self.max_for_table {
            return false;
        }
        let in_cpl = self
            .cpl_counts
            .get(&(group.cpl, group.group_key.clone()))
            .copied()
            .unwrap_or(0);
        in_cpl < self.max_per_cpl
    }

    fn increment(&mut self, group: &GroupInfo) {
        *self.table_counts.entry(group.group_key.clone()).or_insert(0) += 1;
        *self
            .cpl_counts
            .entry((group.cpl, group.group_key.clone()))
            .or_insert(0) += 1;
    }

    fn decrement(&mut self, group: &GroupInfo) {
        if let Some(count) = self.table_counts.get_mut(&group.group_key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.table_counts.remove(&group.group_key);
            }
        }
        let key = (group.cpl, group.group_key.clone());
        if let Some(count) = self.cpl_counts.get_mut(&key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.cpl_counts.remove(&key);
            }
        }
    }
}

/// Derive the group key for one IP address.
///
/// IPv4 in a legacy Class-A network keys at /8, otherwise /16. IPv6 keys by
/// ASN when the resolver knows one, falling back to the /32 prefix.
pub fn group_key(ip: &IpAddr, asn: &dyn AsnResolver) -> Option<GroupKey> {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            if LEGACY_CLASS_A.contains(&octets[0]) {
                Some(format!("{}.0.0.0/8", octets[0]))
            } else {
                Some(format!("{}.{}.0.0/16", octets[0], octets[1]))
            }
        }
        IpAddr::V6(v6) => {
            if let Some(asn) = asn.asn(v6) {
                Some(format!("as{asn}"))
            } else {
                let segments = v6.segments();
                Some(format!("{:04x}:{:04x}::/32", segments[0], segments[1]))
            }
        }
    }
}

struct FilterState {
    filter: Box<dyn GroupFilter>,
    peer_groups: HashMap<PeerId, Vec<GroupInfo>>,
    whitelist: HashSet<PeerId>,
    cpl_peer_groups: HashMap<u32, HashMap<PeerId, Vec<GroupKey>>>,
}

/// The peer-diversity filter the routing table consults on admission.
///
/// Addresses are resolved through the host's address book; the filter never
/// reaches back into the routing table.
pub struct DiversityFilter {
    address_book: Arc<dyn AddressBook>,
    asn: Arc<dyn AsnResolver>,
    state: Mutex<FilterState>,
}

impl DiversityFilter {
    /// Create a filter with the default upper-bound policy.
    pub fn new(
        config: DiversityConfig,
        address_book: Arc<dyn AddressBook>,
        asn: Arc<dyn AsnResolver>,
    ) -> Self {
        Self::with_filter(Box::new(UpperBoundFilter::new(config)), address_book, asn)
    }

    /// Create a filter with a caller-supplied policy.
    pub fn with_filter(
        filter: Box<dyn GroupFilter>,
        address_book: Arc<dyn AddressBook>,
        asn: Arc<dyn AsnResolver>,
    ) -> Self {
        Self {
            address_book,
            asn,
            state: Mutex::new(FilterState {
                filter,
                peer_groups: HashMap::new(),
                whitelist: HashSet::new(),
                cpl_peer_groups: HashMap::new(),
            }),
        }
    }

    /// Exempt a peer from the policy entirely.
    pub async fn whitelist(&self, peer: PeerId) {
        self.state.lock().await.whitelist.insert(peer);
    }

    /// Run the admission policy for `peer` at `cpl`. On success the peer's
    /// groups are reserved; [`DiversityFilter::remove`] releases them.
    pub async fn try_add(&self, peer: &PeerId, cpl: u32) -> bool {
        let addresses = self.address_book.addresses(peer).await.unwrap_or_default();

        let mut state = self.state.lock().await;
        if state.whitelist.contains(peer) {
            trace!("diversity: {peer} whitelisted");
            return true;
        }
        if addresses.is_empty() {
            debug!("diversity: rejecting {peer}, no known addresses");
            return false;
        }

        let mut keys: Vec<GroupKey> = Vec::new();
        for address in &addresses {
            let Some(ip) = address.ip() else {
                debug!("diversity: rejecting {peer}, address {address} has no IP");
                return false;
            };
            let Some(key) = group_key(&ip, self.asn.as_ref()) else {
                debug!("diversity: rejecting {peer}, no group for {ip}");
                return false;
            };
            if !keys.contains(&key) {
                keys.push(key);
            }
        }

        let groups: Vec<GroupInfo> = keys
            .into_iter()
            .map(|group_key| GroupInfo {
                peer_id: peer.clone(),
                cpl,
                group_key,
            })
            .collect();

        for group in &groups {
            if !state.filter.allow(group) {
                debug!(
                    "diversity: rejecting {peer}, group {} over limit",
                    group.group_key
                );
                return false;
            }
        }

        for group in &groups {
            state.filter.increment(group);
        }
        let keys: Vec<GroupKey> = groups.iter().map(|g| g.group_key.clone()).collect();
        state
            .cpl_peer_groups
            .entry(cpl)
            .or_default()
            .insert(peer.clone(), keys);
        state.peer_groups.insert(peer.clone(), groups);
        true
    }

    /// Release the reservations made for `peer`. No-op if the peer was never
    /// admitted through the policy.
    pub async fn remove(&self, peer: &PeerId) {
        let mut state = self.state.lock().await;
        let Some(groups) = state.peer_groups.remove(peer) else {
            return;
        };
        for group in &groups {
            state.filter.decrement(group);
        }
        for peers in state.cpl_peer_groups.values_mut() {
            peers.remove(peer);
        }
    }
}
